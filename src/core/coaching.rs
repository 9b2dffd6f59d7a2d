//! Rate-limited coaching analysis.
//!
//! Per chunk, the engine runs cheap local heuristics first (pace,
//! competitor mentions, topic coverage) and a best-effort LLM pass
//! second, then squeezes everything through one rate limiter: a hard
//! per-chunk alert cap plus a per-alert-type cooldown. Candidates are
//! considered in a fixed order (pace, then competitor, then LLM) so the
//! cap always favors the cheapest, most reliable signals.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::adapters::{CoachAnalyzer, CoachingCategories};
use crate::domain::{
    find_competitor_mentions, update_topic_coverage, AlertType, CoachingAlert,
    MeetingPrepContext,
};

/// Coaching engine settings
#[derive(Debug, Clone)]
pub struct CoachingConfig {
    pub enabled: bool,

    /// Model used for the LLM coaching pass
    pub model: String,

    /// Hard cap on alerts emitted per chunk
    pub max_alerts_per_chunk: usize,

    /// Quiet period per alert type after one fires
    pub alert_cooldown: Duration,

    /// Rolling-window size, in chunks, fed to the LLM as context
    pub window_size: usize,

    pub pace: PaceConfig,
}

impl Default for CoachingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gemini-3-flash-preview".to_string(),
            max_alerts_per_chunk: 2,
            alert_cooldown: Duration::from_secs(180),
            window_size: 10,
            pace: PaceConfig::default(),
        }
    }
}

/// Monologue pace detection settings.
///
/// Off by default: chunk text carries no reliable speaker identity, so
/// "one side talking too long" is an approximation of "anyone talking
/// continuously."
#[derive(Debug, Clone)]
pub struct PaceConfig {
    pub enabled: bool,

    /// Continuous-speech duration that triggers a warning
    pub monologue_threshold: Duration,

    /// Quiet period between pace warnings
    pub cooldown: Duration,
}

impl Default for PaceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            monologue_threshold: Duration::from_secs(240),
            cooldown: Duration::from_secs(120),
        }
    }
}

/// Enforces the per-chunk cap and per-type cooldown.
///
/// The cap is checked and consumed per candidate; once spent, remaining
/// candidates for the chunk are discarded, not queued.
#[derive(Debug)]
pub struct AlertLimiter {
    max_per_chunk: usize,
    cooldown: Duration,
    emitted_this_chunk: usize,
    last_fired: HashMap<AlertType, Instant>,
}

impl AlertLimiter {
    pub fn new(max_per_chunk: usize, cooldown: Duration) -> Self {
        Self {
            max_per_chunk,
            cooldown,
            emitted_this_chunk: 0,
            last_fired: HashMap::new(),
        }
    }

    /// Reset the per-chunk counter; cooldowns persist across chunks.
    pub fn begin_chunk(&mut self) {
        self.emitted_this_chunk = 0;
    }

    /// Try to emit one alert of `alert_type` at `now`. Consumes one slot
    /// of the chunk cap and starts the type cooldown on success.
    pub fn try_acquire(&mut self, alert_type: AlertType, now: Instant) -> bool {
        if self.emitted_this_chunk >= self.max_per_chunk {
            return false;
        }
        if let Some(fired) = self.last_fired.get(&alert_type) {
            if now.duration_since(*fired) < self.cooldown {
                return false;
            }
        }
        self.emitted_this_chunk += 1;
        self.last_fired.insert(alert_type, now);
        true
    }
}

/// Tracks continuous speech for pace warnings.
#[derive(Debug)]
pub struct PaceTracker {
    config: PaceConfig,
    speech_started: Option<Instant>,
    last_warned: Option<Instant>,
}

impl PaceTracker {
    pub fn new(config: PaceConfig) -> Self {
        Self {
            config,
            speech_started: None,
            last_warned: None,
        }
    }

    /// Feed one chunk observation. Returns `true` when a pace warning
    /// should be raised.
    pub fn observe(&mut self, chunk_has_speech: bool, now: Instant) -> bool {
        if !self.config.enabled {
            return false;
        }

        if !chunk_has_speech {
            self.speech_started = None;
            return false;
        }

        let started = *self.speech_started.get_or_insert(now);
        if now.duration_since(started) < self.config.monologue_threshold {
            return false;
        }

        let cooled = self
            .last_warned
            .map(|warned| now.duration_since(warned) >= self.config.cooldown)
            .unwrap_or(true);
        if cooled {
            self.last_warned = Some(now);
        }
        cooled
    }
}

/// Result of analyzing one chunk
#[derive(Debug, Default)]
pub struct CoachingOutcome {
    pub alerts: Vec<CoachingAlert>,

    /// Talking points newly flipped to covered. Non-empty means the
    /// caller must persist the prep document.
    pub topics_covered: Vec<String>,
}

/// Per-session coaching engine. One instance per session loop; holds no
/// cross-session state.
pub struct CoachingEngine {
    config: CoachingConfig,
    limiter: AlertLimiter,
    pace: PaceTracker,
    window: VecDeque<String>,
    analyzer: Arc<dyn CoachAnalyzer>,
}

impl CoachingEngine {
    pub fn new(config: CoachingConfig, analyzer: Arc<dyn CoachAnalyzer>) -> Self {
        let limiter = AlertLimiter::new(config.max_alerts_per_chunk, config.alert_cooldown);
        let pace = PaceTracker::new(config.pace.clone());
        Self {
            config,
            limiter,
            pace,
            window: VecDeque::new(),
            analyzer,
        }
    }

    /// Analyze one chunk of transcript text against the meeting prep.
    ///
    /// Infallible: LLM failures are logged and treated as "no LLM alerts
    /// this chunk." With coaching disabled this returns immediately with
    /// no side effects.
    pub async fn analyze(
        &mut self,
        prep: &mut MeetingPrepContext,
        chunk_text: &str,
    ) -> CoachingOutcome {
        if !self.config.enabled {
            return CoachingOutcome::default();
        }

        let now = Instant::now();
        self.limiter.begin_chunk();
        let mut outcome = CoachingOutcome::default();

        // Pace first: cheapest signal, and time-sensitive
        let has_speech = !chunk_text.trim().is_empty();
        if self.pace.observe(has_speech, now)
            && self.limiter.try_acquire(AlertType::PaceWarning, now)
        {
            outcome.alerts.push(
                CoachingAlert::new(
                    AlertType::PaceWarning,
                    "Extended monologue detected. Consider pausing to ask a question.",
                )
                .with_metadata(
                    "threshold_secs",
                    json!(self.config.pace.monologue_threshold.as_secs()),
                ),
            );
        }

        // Local competitor detection, one candidate per occurrence
        for mention in find_competitor_mentions(chunk_text, &prep.competitors) {
            if !self.limiter.try_acquire(AlertType::CompetitorMention, now) {
                break;
            }
            outcome.alerts.push(
                CoachingAlert::new(
                    AlertType::CompetitorMention,
                    format!("Competitor mentioned: {}", mention.competitor),
                )
                .with_metadata("competitor", json!(mention.competitor))
                .with_metadata("context", json!(mention.context)),
            );
        }

        // Topic coverage mutates prep; the caller persists it
        outcome.topics_covered = update_topic_coverage(prep, chunk_text, Utc::now());

        // LLM pass last, over the rolling window of prior chunks
        let recent_window: Vec<&str> = self.window.iter().map(String::as_str).collect();
        match self
            .analyzer
            .analyze(&prep.format_for_prompt(), &recent_window.join("\n"), chunk_text)
            .await
        {
            Ok(categories) => {
                for alert in categories_to_alerts(&categories) {
                    if !self.limiter.try_acquire(alert.alert_type, now) {
                        continue;
                    }
                    outcome.alerts.push(alert);
                }
            }
            Err(e) => {
                warn!(error = %e, "Coaching analysis failed, skipping LLM alerts for chunk");
            }
        }

        self.push_window(chunk_text);

        debug!(
            alerts = outcome.alerts.len(),
            covered = outcome.topics_covered.len(),
            "Coaching pass complete"
        );
        outcome
    }

    fn push_window(&mut self, chunk_text: &str) {
        self.window.push_back(chunk_text.to_string());
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }
    }
}

/// Map structured analysis categories to alerts, dropping entries whose
/// required text is empty.
pub fn categories_to_alerts(categories: &CoachingCategories) -> Vec<CoachingAlert> {
    let mut alerts = Vec::new();

    for entry in &categories.objections {
        if entry.detected.trim().is_empty() {
            continue;
        }
        alerts.push(
            CoachingAlert::new(AlertType::Objection, entry.detected.clone())
                .with_suggestion(entry.response.clone()),
        );
    }

    for entry in &categories.suggested_questions {
        if entry.question.trim().is_empty() {
            continue;
        }
        let mut alert =
            CoachingAlert::new(AlertType::SuggestedQuestion, entry.question.clone());
        if let Some(reason) = &entry.reason {
            alert = alert.with_metadata("reason", json!(reason));
        }
        alerts.push(alert);
    }

    for entry in &categories.missing_topics {
        if entry.topic.trim().is_empty() {
            continue;
        }
        alerts.push(
            CoachingAlert::new(
                AlertType::MissingTopic,
                format!("Haven't mentioned: {}", entry.topic),
            )
            .with_suggestion(entry.suggestion.clone()),
        );
    }

    for entry in &categories.competitor_insights {
        if entry.context.trim().is_empty() {
            continue;
        }
        alerts.push(
            CoachingAlert::new(
                AlertType::CompetitorMention,
                format!("{}: {}", entry.competitor, entry.context),
            )
            .with_metadata("competitor", json!(entry.competitor))
            .with_suggestion(entry.talking_point.clone()),
        );
    }

    for entry in &categories.observations {
        if entry.content.trim().is_empty() {
            continue;
        }
        let mut alert = CoachingAlert::new(AlertType::CustomReminder, entry.content.clone());
        if let Some(kind) = &entry.kind {
            alert = alert.with_metadata("observation_type", json!(kind));
        }
        alerts.push(alert);
    }

    alerts
}
