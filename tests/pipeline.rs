//! Pipeline Integration Tests
//!
//! End-to-end tests of the session processing loop against a real
//! session directory, with fake transcription/summarization/coaching
//! backends. Chunk files carry their "audio" as UTF-8 text; the fake
//! transcriber echoes it back, or fails when the text starts with FAIL.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use livecoach::adapters::{
    CoachAnalyzer, CoachingCategories, ObjectionEntry, Summarizer, Transcriber,
};
use livecoach::core::bus::{EventBus, EventKind};
use livecoach::core::coaching::{CoachingConfig, CoachingEngine};
use livecoach::core::ledger::{self, SessionPaths};
use livecoach::core::runner::{LoopStep, RunnerOptions, SessionRunner};
use livecoach::domain::{MeetingPrepContext, MeetingType, TranscriptResult};
use livecoach::ingest::StabilityConfig;
use tempfile::TempDir;

struct EchoTranscriber;

#[async_trait]
impl Transcriber for EchoTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        _mime_type: &str,
        _language: Option<&str>,
        _diarize: bool,
    ) -> anyhow::Result<TranscriptResult> {
        let text = String::from_utf8_lossy(audio).into_owned();
        if text.starts_with("FAIL") {
            anyhow::bail!("transcription backend rejected chunk");
        }
        Ok(TranscriptResult {
            text,
            segments: Vec::new(),
        })
    }

    fn model(&self) -> &str {
        "echo-model"
    }
}

#[derive(Default)]
struct RecordingSummarizer {
    calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Summarizer for RecordingSummarizer {
    async fn summarize(
        &self,
        previous_summary: &str,
        new_text: &str,
    ) -> anyhow::Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((previous_summary.to_string(), new_text.to_string()));
        Ok(format!("summary of: {}", new_text.replace('\n', " / ")))
    }
}

struct QuietAnalyzer;

#[async_trait]
impl CoachAnalyzer for QuietAnalyzer {
    async fn analyze(
        &self,
        _context: &str,
        _window: &str,
        _chunk: &str,
    ) -> anyhow::Result<CoachingCategories> {
        Ok(CoachingCategories::default())
    }
}

/// Returns one scripted response per call, then empty categories.
struct ScriptedAnalyzer {
    responses: Mutex<VecDeque<CoachingCategories>>,
}

#[async_trait]
impl CoachAnalyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        _context: &str,
        _window: &str,
        _chunk: &str,
    ) -> anyhow::Result<CoachingCategories> {
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

struct Harness {
    paths: SessionPaths,
    summarizer: Arc<RecordingSummarizer>,
    bus: EventBus,
    _temp: TempDir,
}

fn fast_stability() -> StabilityConfig {
    StabilityConfig {
        stable_for: Duration::from_millis(20),
        poll_interval: Duration::from_millis(5),
        timeout: Duration::from_secs(2),
    }
}

fn setup(
    summary_interval_secs: u32,
    prep: Option<MeetingPrepContext>,
    analyzer: Arc<dyn CoachAnalyzer>,
) -> (Harness, SessionRunner) {
    let temp = TempDir::new().unwrap();
    let paths = SessionPaths::resolve(temp.path().join("session"));
    paths.init_dirs().unwrap();

    let ledger = ledger::resume_or_new(&paths, 30).unwrap();
    ledger::save_ledger(&paths, &ledger).unwrap();

    let summarizer = Arc::new(RecordingSummarizer::default());
    let bus = EventBus::new();

    let options = RunnerOptions {
        summary_interval_secs,
        keep_audio: false,
        language: None,
        diarize: false,
        poll_interval: Duration::from_millis(10),
        stability: fast_stability(),
    };

    let coaching = CoachingEngine::new(CoachingConfig::default(), analyzer);
    let runner = SessionRunner::new(
        "test-session",
        paths.clone(),
        ledger,
        options,
        Arc::new(EchoTranscriber),
        Arc::clone(&summarizer) as Arc<dyn Summarizer>,
        coaching,
        prep,
        bus.clone(),
    );

    (
        Harness {
            paths,
            summarizer,
            bus,
            _temp: temp,
        },
        runner,
    )
}

fn write_chunk(paths: &SessionPaths, index: u64, text: &str) {
    let name = format!("out{:05}.wav", index);
    std::fs::write(paths.chunks_dir.join(name), text.as_bytes()).unwrap();
}

#[tokio::test]
async fn test_two_chunks_trigger_cadence_summary() {
    // chunk_seconds=30, interval=60 -> summary every 2 chunks
    let (h, mut runner) = setup(60, None, Arc::new(QuietAnalyzer));

    write_chunk(&h.paths, 0, "hello");
    write_chunk(&h.paths, 1, "world");
    // Newest file is treated as possibly still being written
    write_chunk(&h.paths, 2, "in progress");

    assert_eq!(runner.poll_once().await.unwrap(), LoopStep::Processed);
    assert_eq!(runner.ledger().last_processed_index, 0);
    // One chunk processed, cadence of 2 not reached yet
    assert_eq!(runner.ledger().last_summarized_index, -1);

    assert_eq!(runner.poll_once().await.unwrap(), LoopStep::Processed);
    assert_eq!(runner.ledger().last_processed_index, 1);
    assert_eq!(runner.ledger().last_summarized_index, 1);

    let calls = h.summarizer.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "");
    assert_eq!(calls[0].1, "hello\nworld");

    let summary = std::fs::read_to_string(&h.paths.summary_md).unwrap();
    assert!(summary.contains("summary of: hello / world"));
}

#[tokio::test]
async fn test_transcript_artifacts_written() {
    let (h, mut runner) = setup(600, None, Arc::new(QuietAnalyzer));

    write_chunk(&h.paths, 0, "first words");
    write_chunk(&h.paths, 1, "sentinel");

    runner.poll_once().await.unwrap();

    let txt = std::fs::read_to_string(&h.paths.transcript_txt).unwrap();
    assert_eq!(txt, "[00:00:00] first words\n");

    let jsonl = std::fs::read_to_string(&h.paths.transcript_jsonl).unwrap();
    assert!(jsonl.contains("\"index\":0"));
    assert!(jsonl.contains("first words"));
    assert!(jsonl.contains("echo-model"));

    // Processed chunk was deleted, sentinel remains
    assert!(!h.paths.chunks_dir.join("out00000.wav").exists());
    assert!(h.paths.chunks_dir.join("out00001.wav").exists());
}

#[tokio::test]
async fn test_failed_chunk_quarantined_and_watermark_advances() {
    let (h, mut runner) = setup(600, None, Arc::new(QuietAnalyzer));

    write_chunk(&h.paths, 0, "FAIL unreadable");
    write_chunk(&h.paths, 1, "good chunk");
    write_chunk(&h.paths, 2, "sentinel");

    assert_eq!(runner.poll_once().await.unwrap(), LoopStep::Processed);
    // Quarantined chunk still advances the watermark past it
    assert_eq!(runner.ledger().last_processed_index, 0);
    assert!(h.paths.quarantine_dir.join("out00000.wav").exists());
    assert!(!h.paths.chunks_dir.join("out00000.wav").exists());

    let jsonl = std::fs::read_to_string(&h.paths.transcript_jsonl).unwrap();
    assert!(jsonl.contains("\"error\""));

    // Session keeps running
    assert_eq!(runner.poll_once().await.unwrap(), LoopStep::Processed);
    assert_eq!(runner.ledger().last_processed_index, 1);

    let txt = std::fs::read_to_string(&h.paths.transcript_txt).unwrap();
    assert!(txt.contains("good chunk"));
    assert!(!txt.contains("FAIL"));
}

#[tokio::test]
async fn test_drain_processes_newest_and_forces_summary() {
    // Interval far above cadence so only the forced pass summarizes
    let (h, mut runner) = setup(6000, None, Arc::new(QuietAnalyzer));

    write_chunk(&h.paths, 0, "alpha");
    write_chunk(&h.paths, 1, "omega");

    runner.drain().await.unwrap();

    assert_eq!(runner.ledger().last_processed_index, 1);
    assert_eq!(runner.ledger().last_summarized_index, 1);

    let calls = h.summarizer.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, "alpha\nomega");
}

#[tokio::test]
async fn test_idle_when_no_completed_chunk() {
    let (h, mut runner) = setup(60, None, Arc::new(QuietAnalyzer));

    assert_eq!(runner.poll_once().await.unwrap(), LoopStep::Idle);

    // A single chunk might still be mid-write
    write_chunk(&h.paths, 0, "maybe incomplete");
    assert_eq!(runner.poll_once().await.unwrap(), LoopStep::Idle);
}

#[tokio::test]
async fn test_resume_continues_from_watermark() {
    let (h, mut runner) = setup(600, None, Arc::new(QuietAnalyzer));

    write_chunk(&h.paths, 0, "before crash");
    write_chunk(&h.paths, 1, "sentinel");
    runner.poll_once().await.unwrap();
    assert_eq!(runner.ledger().last_processed_index, 0);
    drop(runner);

    // Resume is idempotent: same ledger twice with no new chunks
    let resumed = ledger::resume_or_new(&h.paths, 30).unwrap();
    let again = ledger::resume_or_new(&h.paths, 30).unwrap();
    assert_eq!(resumed, again);
    assert_eq!(resumed.last_processed_index, 0);

    // New runner picks up at chunk 1, never reprocesses 0
    let options = RunnerOptions {
        summary_interval_secs: 600,
        keep_audio: false,
        language: None,
        diarize: false,
        poll_interval: Duration::from_millis(10),
        stability: fast_stability(),
    };
    let summarizer = Arc::new(RecordingSummarizer::default());
    let mut runner = SessionRunner::new(
        "test-session",
        h.paths.clone(),
        resumed,
        options,
        Arc::new(EchoTranscriber),
        summarizer,
        CoachingEngine::new(CoachingConfig::default(), Arc::new(QuietAnalyzer)),
        None,
        EventBus::new(),
    );

    write_chunk(&h.paths, 2, "after restart");
    runner.poll_once().await.unwrap();
    assert_eq!(runner.ledger().last_processed_index, 1);

    let txt = std::fs::read_to_string(&h.paths.transcript_txt).unwrap();
    let occurrences = txt.matches("before crash").count();
    assert_eq!(occurrences, 1);
    assert!(txt.contains("[00:00:30] sentinel"));
}

#[tokio::test]
async fn test_watermark_durable_before_publish() {
    let (h, mut runner) = setup(600, None, Arc::new(QuietAnalyzer));

    // Snapshot the on-disk watermark at the moment each chunk event is
    // delivered; a crash at that point must not reprocess the chunk
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = Arc::clone(&seen);
    let paths = h.paths.clone();
    h.bus.subscribe_fn(Some(EventKind::ChunkTranscribed), move |event| {
        let on_disk = ledger::load_ledger(&paths)
            .unwrap()
            .map(|l| l.last_processed_index);
        let index = event.data["index"].as_i64().unwrap();
        seen_cb.lock().unwrap().push((index, on_disk));
    });

    write_chunk(&h.paths, 0, "first");
    write_chunk(&h.paths, 1, "second");
    write_chunk(&h.paths, 2, "sentinel");

    runner.poll_once().await.unwrap();
    runner.poll_once().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![(0, Some(0)), (1, Some(1))]);
}

#[tokio::test]
async fn test_events_published_in_pipeline_order() {
    let mut prep = MeetingPrepContext::new(MeetingType::SalesCall);
    prep.competitors = vec!["Acme".to_string()];

    let (h, mut runner) = setup(600, Some(prep), Arc::new(QuietAnalyzer));
    let mut sub = h.bus.subscribe(None);

    write_chunk(&h.paths, 0, "they mentioned Acme today");
    write_chunk(&h.paths, 1, "sentinel");
    runner.poll_once().await.unwrap();

    let kinds: Vec<EventKind> = sub.drain().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::ChunkTranscribed,
            EventKind::CoachingAlert,
            EventKind::CompetitorMention,
        ]
    );
}

#[tokio::test]
async fn test_alerts_durable_in_session_log() {
    let mut prep = MeetingPrepContext::new(MeetingType::Negotiation);
    prep.competitors = vec!["Acme".to_string()];

    let scripted = ScriptedAnalyzer {
        responses: Mutex::new(VecDeque::from([CoachingCategories {
            objections: vec![ObjectionEntry {
                detected: "price pushback".to_string(),
                response: Some("anchor on value".to_string()),
            }],
            ..Default::default()
        }])),
    };

    let (h, mut runner) = setup(600, Some(prep), Arc::new(scripted));

    write_chunk(&h.paths, 0, "I think Acme is cheaper than you");
    write_chunk(&h.paths, 1, "sentinel");
    runner.poll_once().await.unwrap();

    let alerts = ledger::load_alerts(&h.paths).await.unwrap();
    // Competitor heuristic fires first, then the scripted objection
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0].alert_type, livecoach::domain::AlertType::CompetitorMention);
    assert_eq!(alerts[1].alert_type, livecoach::domain::AlertType::Objection);
    assert_eq!(alerts[1].content, "price pushback");
    assert_eq!(alerts[1].suggestion.as_deref(), Some("anchor on value"));
}

#[tokio::test]
async fn test_topic_coverage_persists_prep() {
    let mut prep = MeetingPrepContext::new(MeetingType::SalesCall);
    prep.talking_points
        .push(livecoach::domain::TalkingPoint::new("pricing", 1));

    let (h, mut runner) = setup(600, Some(prep), Arc::new(QuietAnalyzer));

    write_chunk(&h.paths, 0, "let's go over pricing now");
    write_chunk(&h.paths, 1, "sentinel");
    runner.poll_once().await.unwrap();

    let saved = ledger::load_prep(&h.paths).await.unwrap().unwrap();
    assert!(saved.talking_points[0].mentioned);
    assert!(saved.talking_points[0].mentioned_at.is_some());
}

#[tokio::test]
async fn test_spawned_loop_stops_on_request() {
    let (h, runner) = setup(600, None, Arc::new(QuietAnalyzer));
    let mut sub = h.bus.subscribe(None);

    write_chunk(&h.paths, 0, "only chunk");

    let handle = runner.spawn(None);
    // Let the loop start and go idle
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reason = handle.stop().await.unwrap();
    assert_eq!(reason, livecoach::domain::StopReason::Requested);

    // Drain picked up the chunk the non-drain heuristic had to skip
    let ledger = ledger::load_ledger(&h.paths).unwrap().unwrap();
    assert_eq!(ledger.last_processed_index, 0);
    assert_eq!(ledger.status, livecoach::domain::SessionStatus::Stopped);
    assert_eq!(
        ledger.stop_reason,
        Some(livecoach::domain::StopReason::Requested)
    );

    let kinds: Vec<EventKind> = sub.drain().iter().map(|e| e.kind).collect();
    assert_eq!(kinds.first(), Some(&EventKind::SessionStarted));
    assert_eq!(kinds.last(), Some(&EventKind::SessionStopped));
}
