//! Gemini-backed implementations of the collaborator contracts.
//!
//! One HTTP client serves transcription, summarization, and coaching.
//! Transcription and summarization retry with capped exponential backoff;
//! coaching is single-attempt because its caller swallows failures anyway.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::adapters::{CoachAnalyzer, CoachingCategories, Summarizer, Transcriber};
use crate::domain::{TranscriptResult, TranscriptSegment};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const MAX_ATTEMPTS: u32 = 3;

const TRANSCRIPTION_PROMPT: &str = r#"Transcribe this audio verbatim and accurately.

Return your response as valid JSON with this exact format:
{
  "text": "the complete transcript as a single string",
  "segments": [
    {"speaker": "Speaker 1", "text": "what they said", "start": 0.0, "end": 2.5},
    {"speaker": "Speaker 2", "text": "what they said", "start": 2.5, "end": 5.0}
  ]
}

Instructions:
- Transcribe ALL spoken words exactly as said
- Identify distinct speakers and label them consistently (Speaker 1, Speaker 2, etc.)
- If only one speaker, still include segments with "Speaker 1"
- Estimate start/end times in seconds relative to the audio start
- If the audio is silent or contains no speech, return: {"text": "(silence)", "segments": []}
- Return ONLY valid JSON, no other text or markdown"#;

const SUMMARY_PROMPT: &str = r#"You are a careful meeting summarizer.

Task:
- Update the running summary so it reflects everything covered so far.
- Prefer concise, factual bullet points.
- If the new transcript adds nothing, keep the summary effectively unchanged.

Output format (Markdown):
## Summary
- ...

## Decisions
- ...

## Action items
- ...

## Open questions
- ..."#;

const COACHING_PROMPT_HEADER: &str = "You are a real-time meeting coach. Analyze the latest \
transcript segment and provide ONLY high-priority, critical coaching.";

const COACHING_PROMPT_RULES: &str = r#"Provide coaching in JSON format. BE VERY SELECTIVE - only flag items that are:
- Clear objections that need immediate response
- Critical questions that would significantly move the conversation forward
- Important topics from meeting prep that are overdue to mention
- Direct competitor mentions that need addressing

{
  "objections": [{"detected": "...", "response": "..."}],
  "suggested_questions": [{"question": "...", "reason": "..."}],
  "missing_topics": [{"topic": "...", "suggestion": "..."}],
  "competitor_insights": [{"competitor": "...", "context": "...", "talking_point": "..."}],
  "observations": [{"type": "opportunity|warning", "content": "..."}]
}

CRITICAL RULES:
- Return empty arrays for categories with nothing important - this is expected and good
- Maximum 1-2 items total across ALL categories - less is more
- Do NOT suggest questions just to fill space - only if truly valuable
- If the conversation is flowing well, return all empty arrays
- Only return valid JSON, no other text"#;

/// Errors from the Gemini API boundary
#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("GEMINI_API_KEY not set")]
    MissingApiKey,

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Malformed transcript response: {0}")]
    MalformedTranscript(String),
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

/// Shared Gemini HTTP client.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    transcribe_model: String,
    text_model: String,
}

impl GeminiClient {
    /// Build a client from the `GEMINI_API_KEY` environment variable.
    pub fn from_env(transcribe_model: &str, text_model: &str) -> Result<Self, GeminiError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| GeminiError::MissingApiKey)?;
        Ok(Self::new(api_key, transcribe_model, text_model))
    }

    pub fn new(
        api_key: impl Into<String>,
        transcribe_model: &str,
        text_model: &str,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            transcribe_model: transcribe_model.to_string(),
            text_model: text_model.to_string(),
        }
    }

    /// Point the client at a different endpoint, e.g. a local mock.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// One generateContent call; returns the concatenated candidate text.
    async fn generate_content(&self, model: &str, body: &Value) -> Result<String, GeminiError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, model
        );

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeminiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();

        if text.trim().is_empty() {
            return Err(GeminiError::EmptyResponse);
        }
        Ok(text)
    }

    /// generateContent with capped exponential backoff.
    async fn generate_with_retry(
        &self,
        model: &str,
        body: &Value,
    ) -> Result<String, GeminiError> {
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.generate_content(model, body).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    debug!(attempt, model, error = %e, "Gemini call failed");
                    last_err = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        let secs = (1u64 << attempt).min(8);
                        tokio::time::sleep(Duration::from_secs(secs)).await;
                    }
                }
            }
        }
        // Loop body always sets last_err before falling through
        Err(last_err.unwrap_or(GeminiError::EmptyResponse))
    }
}

/// Strip a surrounding markdown code fence from a model response.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Explicit outcome of parsing a transcription response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedTranscript {
    /// Valid JSON matching the requested schema
    Structured(TranscriptResult),

    /// Not JSON at all; the model returned prose. Used as-is.
    PlainText(String),

    /// Looked like JSON but failed to parse; unusable
    ParseError { raw: String, error: String },
}

#[derive(Deserialize)]
struct WireTranscript {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<WireSegment>,
}

#[derive(Deserialize)]
struct WireSegment {
    #[serde(default)]
    speaker: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
}

/// Parse a transcription response into an explicit outcome.
pub fn parse_transcript_response(content: &str) -> ParsedTranscript {
    let content = strip_code_fences(content);

    let looks_like_json = content.starts_with('{') || content.starts_with('[');
    match serde_json::from_str::<WireTranscript>(content) {
        Ok(wire) => {
            let segments = wire
                .segments
                .into_iter()
                .map(|s| TranscriptSegment {
                    speaker: if s.speaker.is_empty() {
                        "Speaker 1".to_string()
                    } else {
                        s.speaker
                    },
                    text: s.text,
                    start: s.start,
                    end: s.end,
                })
                .collect();
            ParsedTranscript::Structured(TranscriptResult {
                text: wire.text,
                segments,
            })
        }
        Err(e) if looks_like_json => ParsedTranscript::ParseError {
            raw: content.to_string(),
            error: e.to_string(),
        },
        Err(_) => ParsedTranscript::PlainText(content.to_string()),
    }
}

/// Normalize the silence sentinel to an empty transcript.
fn normalize_silence(mut result: TranscriptResult) -> TranscriptResult {
    if result.text.trim() == "(silence)" {
        result.text.clear();
        result.segments.clear();
    }
    result
}

/// Gemini multimodal transcription.
pub struct GeminiTranscriber {
    client: GeminiClient,
}

impl GeminiTranscriber {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }

    fn build_prompt(language: Option<&str>, diarize: bool) -> String {
        let mut prompt = TRANSCRIPTION_PROMPT.to_string();
        if let Some(language) = language {
            prompt.push_str(&format!("\n\nThe audio is in {}.", language));
        }
        if !diarize {
            prompt = prompt.replace(
                "Identify distinct speakers and label them consistently",
                "Label all speech as 'Speaker 1'",
            );
        }
        prompt
    }
}

#[async_trait]
impl Transcriber for GeminiTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        mime_type: &str,
        language: Option<&str>,
        diarize: bool,
    ) -> anyhow::Result<TranscriptResult> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(audio);
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": Self::build_prompt(language, diarize) },
                    { "inline_data": { "mime_type": mime_type, "data": encoded } }
                ]
            }],
            "generationConfig": {
                "temperature": 0.1,
                "maxOutputTokens": 4000,
                "responseMimeType": "application/json"
            }
        });

        let content = self
            .client
            .generate_with_retry(&self.client.transcribe_model, &body)
            .await?;

        match parse_transcript_response(&content) {
            ParsedTranscript::Structured(result) => Ok(normalize_silence(result)),
            ParsedTranscript::PlainText(text) => {
                warn!("Transcription response was not JSON, using as plain text");
                Ok(normalize_silence(TranscriptResult {
                    text,
                    segments: Vec::new(),
                }))
            }
            ParsedTranscript::ParseError { error, .. } => {
                Err(GeminiError::MalformedTranscript(error).into())
            }
        }
    }

    fn model(&self) -> &str {
        &self.client.transcribe_model
    }
}

/// Gemini running-summary updater.
pub struct GeminiSummarizer {
    client: GeminiClient,
}

impl GeminiSummarizer {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Summarizer for GeminiSummarizer {
    async fn summarize(
        &self,
        previous_summary: &str,
        new_text: &str,
    ) -> anyhow::Result<String> {
        if new_text.trim().is_empty() {
            return Ok(previous_summary.trim().to_string());
        }

        let previous = previous_summary.trim();
        let prompt = format!(
            "{}\n\nPrevious summary:\n{}\n\nNew transcript:\n{}\n\n\
             Updated running summary (includes everything so far):",
            SUMMARY_PROMPT,
            if previous.is_empty() { "(none)" } else { previous },
            new_text.trim(),
        );

        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": 0.2,
                "maxOutputTokens": 2000
            }
        });

        let content = self
            .client
            .generate_with_retry(&self.client.text_model, &body)
            .await?;
        Ok(content.trim().to_string())
    }
}

/// Gemini coaching analysis. Single attempt, no retry: the caller treats
/// any failure as "no alerts this chunk."
pub struct GeminiCoachAnalyzer {
    client: GeminiClient,
}

impl GeminiCoachAnalyzer {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CoachAnalyzer for GeminiCoachAnalyzer {
    async fn analyze(
        &self,
        meeting_context: &str,
        recent_window: &str,
        new_chunk: &str,
    ) -> anyhow::Result<CoachingCategories> {
        let prompt = format!(
            "{}\n\nMEETING CONTEXT:\n{}\n\nTRANSCRIPT SO FAR:\n{}\n\n\
             NEW SEGMENT TO ANALYZE:\n{}\n\n{}",
            COACHING_PROMPT_HEADER, meeting_context, recent_window, new_chunk,
            COACHING_PROMPT_RULES,
        );

        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": 0.3,
                "maxOutputTokens": 1000,
                "responseMimeType": "application/json"
            }
        });

        let content = self
            .client
            .generate_content(&self.client.text_model, &body)
            .await?;

        let cleaned = strip_code_fences(&content);
        let categories: CoachingCategories = serde_json::from_str(cleaned)?;
        Ok(categories)
    }
}
