//! Transcript records and segments.
//!
//! One record per processed chunk, appended to an immutable JSONL log.
//! Failed chunks produce error-shaped records with no text, so the log
//! stays dense in chunk indices even when transcription fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A diarized span of speech within one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker: String,
    pub text: String,

    /// Offset in seconds relative to the chunk start.
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
}

/// Output of the transcription contract for one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptResult {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
}

impl TranscriptResult {
    /// Render the transcript with inline speaker labels, e.g.
    /// `[Speaker 1] hello [Speaker 2] hi`.
    pub fn format_with_speakers(&self) -> String {
        if self.segments.is_empty() {
            return self.text.clone();
        }
        self.segments
            .iter()
            .map(|s| format!("[{}] {}", s.speaker, s.text))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One durable entry in the per-session transcript log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    /// Chunk index this record covers
    pub index: u64,

    /// File name of the source chunk (relative to the session dir)
    pub chunk_file: String,

    /// Raw transcript text; absent for failed chunks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Error message; present only for failed chunks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<TranscriptSegment>,

    /// Model that produced (or failed to produce) this transcript
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    pub recorded_at: DateTime<Utc>,
}

impl TranscriptRecord {
    /// Record for a successfully transcribed chunk.
    pub fn success(
        index: u64,
        chunk_file: impl Into<String>,
        result: &TranscriptResult,
        model: impl Into<String>,
        language: Option<String>,
    ) -> Self {
        Self {
            index,
            chunk_file: chunk_file.into(),
            text: Some(result.text.clone()),
            error: None,
            segments: result.segments.clone(),
            model: model.into(),
            language,
            recorded_at: Utc::now(),
        }
    }

    /// Error-shaped record for a chunk whose transcription exhausted retries.
    pub fn failure(
        index: u64,
        chunk_file: impl Into<String>,
        error: impl Into<String>,
        model: impl Into<String>,
        language: Option<String>,
    ) -> Self {
        Self {
            index,
            chunk_file: chunk_file.into(),
            text: None,
            error: Some(error.into()),
            segments: Vec::new(),
            model: model.into(),
            language,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
