//! Session processing loop.
//!
//! One runner per active session drives the whole pipeline: discover the
//! next completed chunk, wait for it to stabilize, transcribe it, append
//! to the transcript logs, advance the ledger watermark, then publish and
//! run coaching, periodically folding new text into the rolling summary.
//! The watermark save is the durability checkpoint: it lands on disk
//! before any event or alert for the chunk is visible. All steps for
//! one chunk run in strict sequence; two chunks from the same session are
//! never processed concurrently, which is what keeps watermark
//! advancement safe without extra locking.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::{LiveBroadcast, NullBroadcast, Summarizer, Transcriber};
use crate::core::bus::{Event, EventBus, EventKind};
use crate::core::coaching::CoachingEngine;
use crate::core::ledger::{self, SessionLedger, SessionPaths};
use crate::domain::{
    AlertType, CoachingAlert, MeetingPrepContext, SessionStatus, StopReason, TranscriptRecord,
};
use crate::ingest::watcher::{
    find_next_chunk, find_next_completed_chunk, wait_for_file_stable, ChunkFile,
    StabilityConfig, WatcherError,
};
use crate::ingest::CaptureHandle;

/// Tunables for one session's processing loop
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Target seconds between summary refreshes; converted to a chunk
    /// cadence of at least one
    pub summary_interval_secs: u32,

    /// Keep processed chunk files instead of deleting them
    pub keep_audio: bool,

    pub language: Option<String>,
    pub diarize: bool,

    /// Sleep between idle polls of the chunks directory
    pub poll_interval: Duration,

    pub stability: StabilityConfig,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            summary_interval_secs: 60,
            keep_audio: false,
            language: None,
            diarize: true,
            poll_interval: Duration::from_secs(2),
            stability: StabilityConfig::default(),
        }
    }
}

/// Outcome of one poll iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStep {
    /// No completed chunk available
    Idle,
    /// One chunk fully processed (successfully or quarantined)
    Processed,
    /// A chunk was found but never stabilized; will retry
    Unstable,
}

/// Drives the processing loop for a single session.
pub struct SessionRunner {
    session_id: String,
    paths: SessionPaths,
    ledger: SessionLedger,
    options: RunnerOptions,
    transcriber: Arc<dyn Transcriber>,
    summarizer: Arc<dyn Summarizer>,
    coaching: CoachingEngine,
    prep: Option<MeetingPrepContext>,
    bus: EventBus,
    broadcast: Arc<dyn LiveBroadcast>,
}

impl SessionRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        paths: SessionPaths,
        ledger: SessionLedger,
        options: RunnerOptions,
        transcriber: Arc<dyn Transcriber>,
        summarizer: Arc<dyn Summarizer>,
        coaching: CoachingEngine,
        prep: Option<MeetingPrepContext>,
        bus: EventBus,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            paths,
            ledger,
            options,
            transcriber,
            summarizer,
            coaching,
            prep,
            bus,
            broadcast: Arc::new(NullBroadcast),
        }
    }

    /// Attach an outbound transport, e.g. a WebSocket bridge.
    pub fn with_broadcast(mut self, broadcast: Arc<dyn LiveBroadcast>) -> Self {
        self.broadcast = broadcast;
        self
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    /// Summary cadence in chunks, never below one.
    fn summary_cadence(&self) -> i64 {
        ((self.options.summary_interval_secs / self.ledger.chunk_seconds.max(1)).max(1)) as i64
    }

    async fn publish(&self, kind: EventKind, data: serde_json::Value) {
        let event = Event::new(kind, self.session_id.clone(), data);
        self.bus.publish(event.clone());
        // Outbound transport is best-effort
        if let Err(e) = self.broadcast.broadcast(&event).await {
            warn!(kind = ?event.kind, error = %e, "Broadcast failed");
        }
    }

    /// One poll: find the next completed chunk, stabilize, process.
    pub async fn poll_once(&mut self) -> Result<LoopStep> {
        let chunk =
            find_next_completed_chunk(&self.paths.chunks_dir, self.ledger.last_processed_index)?;
        let Some(chunk) = chunk else {
            return Ok(LoopStep::Idle);
        };

        match wait_for_file_stable(&chunk.path, &self.options.stability).await {
            Ok(()) => {}
            Err(WatcherError::StabilityTimeout(path)) => {
                warn!(chunk = %path.display(), "Chunk never stabilized, will retry");
                return Ok(LoopStep::Unstable);
            }
            Err(e) => return Err(e.into()),
        }

        self.process_chunk(&chunk).await?;
        self.maybe_summarize(false).await?;
        Ok(LoopStep::Processed)
    }

    /// Process one chunk end to end and advance the watermark.
    ///
    /// A transcription failure quarantines the chunk file and records an
    /// error-shaped transcript entry, but still advances the watermark:
    /// one bad chunk must never wedge the session.
    async fn process_chunk(&mut self, chunk: &ChunkFile) -> Result<()> {
        let chunk_file = chunk
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| chunk.path.display().to_string());

        let audio = tokio::fs::read(&chunk.path)
            .await
            .with_context(|| format!("Failed to read chunk: {}", chunk.path.display()))?;

        let result = self
            .transcriber
            .transcribe(
                &audio,
                "audio/wav",
                self.options.language.as_deref(),
                self.options.diarize,
            )
            .await;

        match result {
            Ok(transcript) => {
                let display_text = transcript.format_with_speakers();

                let record = TranscriptRecord::success(
                    chunk.index,
                    &chunk_file,
                    &transcript,
                    self.transcriber.model(),
                    self.options.language.clone(),
                );
                ledger::append_record(&self.paths, &record).await?;

                if !display_text.trim().is_empty() {
                    ledger::append_transcript_line(
                        &self.paths,
                        chunk.index,
                        self.ledger.chunk_seconds,
                        &display_text,
                    )
                    .await?;
                }

                // Durability checkpoint: the watermark must be on disk
                // before anything downstream can observe this chunk,
                // or a crash mid-publish would reprocess it on resume
                self.ledger.last_processed_index = chunk.index as i64;
                ledger::save_ledger(&self.paths, &self.ledger)?;

                self.publish(
                    EventKind::ChunkTranscribed,
                    json!({ "index": chunk.index, "text": display_text }),
                )
                .await;

                self.run_coaching(&display_text).await?;

                if self.options.keep_audio {
                    debug!(index = chunk.index, "Keeping processed chunk");
                } else if let Err(e) = tokio::fs::remove_file(&chunk.path).await {
                    warn!(chunk = %chunk.path.display(), error = %e, "Failed to delete chunk");
                }
            }
            Err(e) => {
                error!(index = chunk.index, error = %e, "Transcription failed, quarantining chunk");

                let record = TranscriptRecord::failure(
                    chunk.index,
                    &chunk_file,
                    e.to_string(),
                    self.transcriber.model(),
                    self.options.language.clone(),
                );
                ledger::append_record(&self.paths, &record).await?;

                self.quarantine(&chunk.path, &chunk_file).await;

                self.ledger.last_processed_index = chunk.index as i64;
                ledger::save_ledger(&self.paths, &self.ledger)?;
            }
        }

        Ok(())
    }

    async fn quarantine(&self, path: &Path, chunk_file: &str) {
        let target = self.paths.quarantine_dir.join(chunk_file);
        if let Err(e) = tokio::fs::rename(path, &target).await {
            warn!(
                chunk = %path.display(),
                error = %e,
                "Failed to move chunk to quarantine"
            );
        }
    }

    /// Coaching pass for one chunk's display text. Alerts are made
    /// durable in the alert log before they are published.
    async fn run_coaching(&mut self, display_text: &str) -> Result<()> {
        let Some(prep) = self.prep.as_mut() else {
            return Ok(());
        };

        let outcome = self.coaching.analyze(prep, display_text).await;

        if !outcome.topics_covered.is_empty() {
            info!(topics = ?outcome.topics_covered, "Talking points covered");
            ledger::save_prep(&self.paths, prep).await?;
        }

        for alert in &outcome.alerts {
            ledger::append_alert(&self.paths, alert).await?;
            self.publish_alert(alert).await;
        }

        Ok(())
    }

    async fn publish_alert(&self, alert: &CoachingAlert) {
        let data = serde_json::to_value(alert).unwrap_or_else(|_| json!({}));
        self.publish(EventKind::CoachingAlert, data.clone()).await;

        // Specialized kinds for listeners that only care about one signal
        match alert.alert_type {
            AlertType::PaceWarning => self.publish(EventKind::PaceWarning, data).await,
            AlertType::CompetitorMention => {
                self.publish(EventKind::CompetitorMention, data).await
            }
            _ => {}
        }
    }

    /// Refresh the rolling summary when enough chunks have accumulated,
    /// or unconditionally when `force` is set.
    pub async fn maybe_summarize(&mut self, force: bool) -> Result<()> {
        let pending = self.ledger.last_processed_index - self.ledger.last_summarized_index;
        if pending <= 0 {
            return Ok(());
        }
        if !force && pending < self.summary_cadence() {
            return Ok(());
        }

        let rows =
            ledger::load_transcript_since(&self.paths, self.ledger.last_summarized_index).await?;
        let new_text: String = rows
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if new_text.trim().is_empty() {
            // Nothing worth summarizing; advance so we do not rescan
            self.ledger.last_summarized_index = self.ledger.last_processed_index;
            ledger::save_ledger(&self.paths, &self.ledger)?;
            return Ok(());
        }

        match self.summarizer.summarize(&self.ledger.summary, &new_text).await {
            Ok(summary) => {
                ledger::write_summary(&self.paths, &summary).await?;
                self.ledger.summary = summary.clone();
                self.ledger.last_summarized_index = self.ledger.last_processed_index;
                ledger::save_ledger(&self.paths, &self.ledger)?;

                self.publish(
                    EventKind::SummaryUpdated,
                    json!({ "summary": summary, "through_index": self.ledger.last_summarized_index }),
                )
                .await;
            }
            Err(e) => {
                // Watermark stays put; the next cadence retries over the
                // same (plus newer) text
                warn!(error = %e, "Summarization failed, will retry next cadence");
            }
        }

        Ok(())
    }

    /// Drain mode: process every remaining chunk, newest included, then
    /// force a final summary pass.
    pub async fn drain(&mut self) -> Result<()> {
        loop {
            let chunk = find_next_chunk(&self.paths.chunks_dir, self.ledger.last_processed_index)?;
            let Some(chunk) = chunk else { break };

            match wait_for_file_stable(&chunk.path, &self.options.stability).await {
                Ok(()) => self.process_chunk(&chunk).await?,
                Err(WatcherError::StabilityTimeout(path)) => {
                    // Capture is gone; a file still changing now will
                    // never finish. Quarantine and move on.
                    warn!(chunk = %path.display(), "Chunk never stabilized during drain, quarantining");
                    let chunk_file = chunk
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| chunk.path.display().to_string());
                    let record = TranscriptRecord::failure(
                        chunk.index,
                        &chunk_file,
                        "file never stabilized",
                        self.transcriber.model(),
                        self.options.language.clone(),
                    );
                    ledger::append_record(&self.paths, &record).await?;
                    self.quarantine(&chunk.path, &chunk_file).await;
                    self.ledger.last_processed_index = chunk.index as i64;
                    ledger::save_ledger(&self.paths, &self.ledger)?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.maybe_summarize(true).await
    }

    /// Run until stopped or the capture process dies, then drain.
    async fn run_loop(
        mut self,
        mut capture: Option<CaptureHandle>,
        mut stop_rx: mpsc::Receiver<()>,
    ) -> Result<StopReason> {
        self.ledger.status = SessionStatus::Recording;
        self.ledger.stop_reason = None;
        ledger::save_ledger(&self.paths, &self.ledger)?;

        self.publish(
            EventKind::SessionStarted,
            json!({ "resume_from": self.ledger.last_processed_index }),
        )
        .await;
        info!(
            session = %self.session_id,
            resume_from = self.ledger.last_processed_index,
            "Session loop started"
        );

        let reason = loop {
            if stop_rx.try_recv().is_ok() {
                break StopReason::Requested;
            }

            let capture_exit = match capture.as_mut() {
                Some(handle) => handle.try_exited()?,
                None => None,
            };
            if let Some(status) = capture_exit {
                error!(%status, "Capture process exited unexpectedly");
                capture = None;
                break StopReason::CaptureDied;
            }

            match self.poll_once().await {
                Ok(LoopStep::Processed) => {}
                Ok(LoopStep::Idle) | Ok(LoopStep::Unstable) => {
                    tokio::time::sleep(self.options.poll_interval).await;
                }
                Err(e) => {
                    // Per-chunk failures are absorbed inside poll_once;
                    // an error here is environmental (disk, ledger)
                    error!(error = %e, "Processing loop error");
                    tokio::time::sleep(self.options.poll_interval).await;
                }
            }
        };

        // Stop capture before draining so no new chunks appear mid-drain
        if let Some(handle) = capture {
            if let Err(e) = handle.stop().await {
                warn!(error = %e, "Failed to stop capture cleanly");
            }
        }

        self.drain().await?;

        self.ledger.status = SessionStatus::Stopped;
        self.ledger.stop_reason = Some(reason);
        ledger::save_ledger(&self.paths, &self.ledger)?;

        self.publish(
            EventKind::SessionStopped,
            json!({
                "reason": reason.as_str(),
                "last_processed_index": self.ledger.last_processed_index,
            }),
        )
        .await;
        info!(session = %self.session_id, reason = reason.as_str(), "Session loop stopped");

        Ok(reason)
    }

    /// Spawn the loop onto the runtime.
    pub fn spawn(self, capture: Option<CaptureHandle>) -> RunnerHandle {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.run_loop(capture, stop_rx));
        RunnerHandle { stop_tx, task }
    }
}

/// Handle to a spawned session loop
pub struct RunnerHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<Result<StopReason>>,
}

impl RunnerHandle {
    /// Request a stop and wait for the drain to finish.
    pub async fn stop(self) -> Result<StopReason> {
        // Loop may already be gone if capture died
        let _ = self.stop_tx.send(()).await;
        self.task.await.context("Session loop panicked")?
    }

    /// Wait for the loop to finish on its own (capture exit).
    pub async fn join(self) -> Result<StopReason> {
        self.task.await.context("Session loop panicked")?
    }
}
