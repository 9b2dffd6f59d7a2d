//! Durable per-session ledger and the session directory layout.
//!
//! The ledger is the source of truth for pipeline progress: two
//! watermarks (`last_processed_index`, `last_summarized_index`) and the
//! rolling summary text. It is written after every mutation via an
//! atomic temp-file-and-rename so a reader can never observe a
//! half-written ledger, and a crash loses at most the in-flight chunk.
//!
//! The other per-session artifacts live alongside it: an append-only
//! JSONL transcript log (superset of the plain-text line log), a
//! rendered summary document, an append-only alert log, and the optional
//! meeting prep document.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::domain::{
    CoachingAlert, MeetingPrepContext, SessionStatus, StopReason, TranscriptRecord,
};

/// Errors from ledger and session-file operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(
        "Watermark invariant violated: last_summarized_index {summarized} > last_processed_index {processed}"
    )]
    WatermarkInvariant { processed: i64, summarized: i64 },
}

/// Durable record of session progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLedger {
    pub created_at: DateTime<Utc>,

    /// Fixed chunk duration; constant for the session's lifetime because
    /// transcript offset math depends on it
    pub chunk_seconds: u32,

    #[serde(default = "default_status")]
    pub status: SessionStatus,

    /// Why the session last stopped, when it has
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,

    /// Highest chunk index fully processed; -1 = none
    pub last_processed_index: i64,

    /// Highest chunk index covered by the rolling summary; -1 = none
    pub last_summarized_index: i64,

    #[serde(default)]
    pub summary: String,
}

impl SessionLedger {
    /// Fresh ledger with both watermarks at -1 and an empty summary.
    pub fn new(chunk_seconds: u32) -> Self {
        Self {
            created_at: Utc::now(),
            chunk_seconds,
            status: SessionStatus::Created,
            stop_reason: None,
            last_processed_index: -1,
            last_summarized_index: -1,
            summary: String::new(),
        }
    }
}

fn default_status() -> SessionStatus {
    SessionStatus::Created
}

/// Resolved locations of every per-session artifact
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub session_dir: PathBuf,
    pub chunks_dir: PathBuf,
    pub quarantine_dir: PathBuf,
    pub transcript_txt: PathBuf,
    pub transcript_jsonl: PathBuf,
    pub summary_md: PathBuf,
    pub ledger_json: PathBuf,
    pub alerts_jsonl: PathBuf,
    pub prep_json: PathBuf,
    pub capture_log: PathBuf,
}

impl SessionPaths {
    pub fn resolve(session_dir: impl Into<PathBuf>) -> Self {
        let session_dir = session_dir.into();
        Self {
            chunks_dir: session_dir.join("chunks"),
            quarantine_dir: session_dir.join("failed_chunks"),
            transcript_txt: session_dir.join("transcript.txt"),
            transcript_jsonl: session_dir.join("transcript.jsonl"),
            summary_md: session_dir.join("summary.md"),
            ledger_json: session_dir.join("ledger.json"),
            alerts_jsonl: session_dir.join("alerts.jsonl"),
            prep_json: session_dir.join("meeting_prep.json"),
            capture_log: session_dir.join("capture.log"),
            session_dir,
        }
    }

    /// Create the session, chunks, and quarantine directories.
    pub fn init_dirs(&self) -> Result<(), LedgerError> {
        std::fs::create_dir_all(&self.session_dir)?;
        std::fs::create_dir_all(&self.chunks_dir)?;
        std::fs::create_dir_all(&self.quarantine_dir)?;
        Ok(())
    }
}

/// Load the ledger, or `None` when the session has no ledger yet.
pub fn load_ledger(paths: &SessionPaths) -> Result<Option<SessionLedger>, LedgerError> {
    let content = match std::fs::read_to_string(&paths.ledger_json) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&content)?))
}

/// Persist the ledger with an atomic replace.
///
/// Writes to a temp file in the session directory and renames over the
/// target, so readers see either the old or the new ledger, never a
/// partial write. Rejects any state where the summarization watermark
/// has run ahead of the processing watermark.
pub fn save_ledger(paths: &SessionPaths, ledger: &SessionLedger) -> Result<(), LedgerError> {
    if ledger.last_summarized_index > ledger.last_processed_index {
        return Err(LedgerError::WatermarkInvariant {
            processed: ledger.last_processed_index,
            summarized: ledger.last_summarized_index,
        });
    }

    let json = serde_json::to_string_pretty(ledger)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&paths.session_dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.persist(&paths.ledger_json).map_err(|e| e.error)?;

    Ok(())
}

/// Load the existing ledger or seed a fresh one.
///
/// An existing ledger's `chunk_seconds` wins over a conflicting runtime
/// value: chunk duration cannot change mid-session.
pub fn resume_or_new(
    paths: &SessionPaths,
    requested_chunk_seconds: u32,
) -> Result<SessionLedger, LedgerError> {
    match load_ledger(paths)? {
        Some(ledger) => {
            if ledger.chunk_seconds != requested_chunk_seconds {
                warn!(
                    session = %paths.session_dir.display(),
                    existing = ledger.chunk_seconds,
                    requested = requested_chunk_seconds,
                    "Session chunk_seconds differs from requested value; using session value"
                );
            }
            Ok(ledger)
        }
        None => Ok(SessionLedger::new(requested_chunk_seconds)),
    }
}

/// Zero-padded `HH:MM:SS` offset.
pub fn format_hhmmss(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

async fn append_line(path: &Path, line: &str) -> Result<(), LedgerError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await?;
    Ok(())
}

/// Append one human-readable line to the plain-text transcript.
pub async fn append_transcript_line(
    paths: &SessionPaths,
    chunk_index: u64,
    chunk_seconds: u32,
    text: &str,
) -> Result<(), LedgerError> {
    let offset = format_hhmmss(chunk_index * chunk_seconds as u64);
    append_line(
        &paths.transcript_txt,
        &format!("[{}] {}", offset, text.trim()),
    )
    .await
}

/// Append one structured record to the transcript log.
pub async fn append_record(
    paths: &SessionPaths,
    record: &TranscriptRecord,
) -> Result<(), LedgerError> {
    let json = serde_json::to_string(record)?;
    append_line(&paths.transcript_jsonl, &json).await
}

/// Collect transcript text for indices strictly after `after_index`,
/// sorted by index. Error-shaped records and blank text are skipped, as
/// are unparseable lines.
pub async fn load_transcript_since(
    paths: &SessionPaths,
    after_index: i64,
) -> Result<Vec<(u64, String)>, LedgerError> {
    let content = match tokio::fs::read_to_string(&paths.transcript_jsonl).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut out: Vec<(u64, String)> = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<TranscriptRecord>(line) else {
            continue;
        };
        let Some(text) = record.text else { continue };
        if (record.index as i64) > after_index && !text.trim().is_empty() {
            out.push((record.index, text));
        }
    }

    out.sort_by_key(|(index, _)| *index);
    Ok(out)
}

/// Regenerate the rendered summary document.
pub async fn write_summary(paths: &SessionPaths, summary: &str) -> Result<(), LedgerError> {
    let updated_at = Utc::now().format("%Y-%m-%dT%H:%M:%S");
    let content = format!(
        "# Running summary\n\nLast updated: {}\n\n{}\n",
        updated_at,
        summary.trim()
    );
    tokio::fs::write(&paths.summary_md, content).await?;
    Ok(())
}

/// Append an alert to the per-session alert log. Called before the alert
/// is published, so listeners never see an alert that isn't durable.
pub async fn append_alert(
    paths: &SessionPaths,
    alert: &CoachingAlert,
) -> Result<(), LedgerError> {
    let json = serde_json::to_string(alert)?;
    append_line(&paths.alerts_jsonl, &json).await
}

/// Load the full alert history, oldest first.
pub async fn load_alerts(paths: &SessionPaths) -> Result<Vec<CoachingAlert>, LedgerError> {
    let content = match tokio::fs::read_to_string(&paths.alerts_jsonl).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut alerts = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        alerts.push(serde_json::from_str(line)?);
    }
    Ok(alerts)
}

/// Persist the meeting prep document.
pub async fn save_prep(
    paths: &SessionPaths,
    prep: &MeetingPrepContext,
) -> Result<(), LedgerError> {
    let json = serde_json::to_string_pretty(prep)?;
    tokio::fs::write(&paths.prep_json, format!("{}\n", json)).await?;
    Ok(())
}

/// Load the meeting prep document, if the session has one.
pub async fn load_prep(paths: &SessionPaths) -> Result<Option<MeetingPrepContext>, LedgerError> {
    let content = match tokio::fs::read_to_string(&paths.prep_json).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&content)?))
}
