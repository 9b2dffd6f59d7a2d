//! External collaborator contracts.
//!
//! The pipeline only sees these traits; the Gemini-backed implementations
//! live in [`gemini`], and tests substitute fakes.

pub mod gemini;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::bus::Event;
use crate::domain::TranscriptResult;

pub use gemini::{
    GeminiClient, GeminiCoachAnalyzer, GeminiError, GeminiSummarizer, GeminiTranscriber,
    ParsedTranscript,
};

/// Turns one audio chunk into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &[u8],
        mime_type: &str,
        language: Option<&str>,
        diarize: bool,
    ) -> anyhow::Result<TranscriptResult>;

    /// Model name recorded alongside each transcript.
    fn model(&self) -> &str;
}

/// Folds new transcript text into a running summary.
///
/// Must be safe to re-invoke with the same inputs; the pipeline may retry
/// after a crash that lost the watermark advance but kept the call.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        previous_summary: &str,
        new_text: &str,
    ) -> anyhow::Result<String>;
}

/// Structured categories returned by the coaching analysis call.
///
/// Every field is independent and optional; empty entries are dropped
/// before alert conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoachingCategories {
    #[serde(default)]
    pub objections: Vec<ObjectionEntry>,
    #[serde(default)]
    pub suggested_questions: Vec<SuggestionEntry>,
    #[serde(default)]
    pub missing_topics: Vec<MissingTopicEntry>,
    #[serde(default)]
    pub competitor_insights: Vec<CompetitorInsightEntry>,
    #[serde(default)]
    pub observations: Vec<ObservationEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectionEntry {
    /// The objection or concern raised
    #[serde(default)]
    pub detected: String,
    /// Suggested response to address it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionEntry {
    #[serde(default)]
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingTopicEntry {
    #[serde(default)]
    pub topic: String,
    /// How to naturally bring it up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorInsightEntry {
    #[serde(default)]
    pub competitor: String,
    /// What was said about them
    #[serde(default)]
    pub context: String,
    /// How to respond or position against them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub talking_point: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationEntry {
    /// "opportunity" or "warning"
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// Best-effort coaching analysis over meeting context and recent text.
/// A failure is swallowed by the caller, never retried.
#[async_trait]
pub trait CoachAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        meeting_context: &str,
        recent_window: &str,
        new_chunk: &str,
    ) -> anyhow::Result<CoachingCategories>;
}

/// Outbound fan-out for events, e.g. a WebSocket bridge.
#[async_trait]
pub trait LiveBroadcast: Send + Sync {
    async fn broadcast(&self, event: &Event) -> anyhow::Result<()>;
}

/// Broadcast sink that discards everything.
pub struct NullBroadcast;

#[async_trait]
impl LiveBroadcast for NullBroadcast {
    async fn broadcast(&self, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }
}
