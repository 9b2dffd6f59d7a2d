//! Meeting prep context and the local text heuristics built on it.
//!
//! Holds the pre-session input (attendees, objectives, talking points,
//! competitors) plus the whole-word matching used for topic coverage and
//! competitor detection. Prompt formatting for the LLM coaching pass also
//! lives here so the engine stays free of prompt assembly.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Type of meeting, affects coaching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingType {
    SalesCall,
    ProductDemo,
    DiscoveryCall,
    Negotiation,
    CustomerSuccess,
    InternalMeeting,
    OneOnOne,
}

impl MeetingType {
    /// One-line description used in the coaching prompt.
    pub fn description(&self) -> &'static str {
        match self {
            Self::SalesCall => "Sales call - focus on qualification, value prop, next steps",
            Self::ProductDemo => {
                "Product demo - focus on features, use cases, addressing concerns"
            }
            Self::DiscoveryCall => {
                "Discovery call - focus on understanding needs, pain points, current solutions"
            }
            Self::Negotiation => "Negotiation - focus on terms, objection handling, closing",
            Self::CustomerSuccess => {
                "Customer success - focus on value realization, adoption, expansion"
            }
            Self::InternalMeeting => "Internal meeting - focus on decisions, action items",
            Self::OneOnOne => "1:1 meeting - focus on feedback, career development, blockers",
        }
    }

    /// Coaching focus hints per meeting type, appended to the prompt context.
    pub fn coaching_hints(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::SalesCall => &[
                ("focus", "Qualification and moving to next steps"),
                (
                    "good_questions",
                    "Budget, timeline, decision makers, current solution pain points",
                ),
                ("watch_for", "Buying signals, objections, competitor mentions"),
            ],
            Self::ProductDemo => &[
                ("focus", "Showing value through relevant features"),
                (
                    "good_questions",
                    "Which features matter most, current workflow, success criteria",
                ),
                ("watch_for", "Confusion, feature requests, comparison questions"),
            ],
            Self::DiscoveryCall => &[
                ("focus", "Understanding their situation deeply"),
                (
                    "good_questions",
                    "Current challenges, ideal outcome, stakeholders affected",
                ),
                ("watch_for", "Pain points, urgency indicators, budget hints"),
            ],
            Self::Negotiation => &[
                ("focus", "Finding mutually beneficial terms"),
                (
                    "good_questions",
                    "Key priorities, flexibility areas, timeline constraints",
                ),
                ("watch_for", "Anchoring attempts, deadlines, walk-away signals"),
            ],
            Self::CustomerSuccess => &[
                ("focus", "Ensuring they're getting value"),
                (
                    "good_questions",
                    "Usage patterns, challenges faced, expansion opportunities",
                ),
                ("watch_for", "Churn signals, upsell opportunities, reference potential"),
            ],
            Self::InternalMeeting => &[
                ("focus", "Making decisions and assigning actions"),
                ("good_questions", "Blockers, dependencies, priorities"),
                ("watch_for", "Unclear ownership, scope creep, missing stakeholders"),
            ],
            Self::OneOnOne => &[
                ("focus", "Supporting the other person"),
                (
                    "good_questions",
                    "How can I help, what's blocking you, career goals",
                ),
                ("watch_for", "Unspoken concerns, morale signals, growth opportunities"),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendee {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A topic to cover during the meeting. `mentioned` flips false to true
/// exactly once, when the topic first appears in chunk text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TalkingPoint {
    pub topic: String,

    /// 1 = high, 2 = medium, 3 = low
    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default)]
    pub mentioned: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mentioned_at: Option<DateTime<Utc>>,
}

fn default_priority() -> u8 {
    1
}

impl TalkingPoint {
    pub fn new(topic: impl Into<String>, priority: u8) -> Self {
        Self {
            topic: topic.into(),
            priority,
            notes: None,
            mentioned: false,
            mentioned_at: None,
        }
    }
}

/// Pre-session context the coaching engine works from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingPrepContext {
    pub meeting_type: MeetingType,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub talking_points: Vec<TalkingPoint>,
    #[serde(default)]
    pub competitors: Vec<String>,
    #[serde(default)]
    pub custom_reminders: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

impl MeetingPrepContext {
    pub fn new(meeting_type: MeetingType) -> Self {
        Self {
            meeting_type,
            attendees: Vec::new(),
            objectives: Vec::new(),
            talking_points: Vec::new(),
            competitors: Vec::new(),
            custom_reminders: Vec::new(),
            pricing_notes: None,
            discount_authority: None,
            additional_context: None,
        }
    }

    pub fn uncovered_talking_points(&self) -> Vec<&TalkingPoint> {
        self.talking_points.iter().filter(|tp| !tp.mentioned).collect()
    }

    pub fn high_priority_uncovered(&self) -> Vec<&TalkingPoint> {
        self.talking_points
            .iter()
            .filter(|tp| !tp.mentioned && tp.priority == 1)
            .collect()
    }

    /// Format the prep for inclusion in the coaching prompt, with
    /// talking points ranked by priority and coverage state.
    pub fn format_for_prompt(&self) -> String {
        let mut sections = Vec::new();

        sections.push(format!("Meeting type: {}", self.meeting_type.description()));

        if !self.attendees.is_empty() {
            let lines: Vec<String> = self
                .attendees
                .iter()
                .map(|a| {
                    let mut parts = vec![a.name.clone()];
                    if let Some(role) = &a.role {
                        parts.push(format!("({})", role));
                    }
                    if let Some(company) = &a.company {
                        parts.push(format!("at {}", company));
                    }
                    if let Some(notes) = &a.notes {
                        parts.push(format!("- {}", notes));
                    }
                    format!("  - {}", parts.join(" "))
                })
                .collect();
            sections.push(format!("Attendees:\n{}", lines.join("\n")));
        }

        if !self.objectives.is_empty() {
            let lines: Vec<String> =
                self.objectives.iter().map(|o| format!("  - {}", o)).collect();
            sections.push(format!("Meeting objectives:\n{}", lines.join("\n")));
        }

        if !self.talking_points.is_empty() {
            let mut ranked: Vec<&TalkingPoint> = self.talking_points.iter().collect();
            ranked.sort_by_key(|tp| tp.priority);

            let lines: Vec<String> = ranked
                .iter()
                .map(|tp| {
                    let status = if tp.mentioned { "[COVERED]" } else { "[NOT YET]" };
                    let priority = match tp.priority {
                        1 => "[HIGH]",
                        2 => "[MED]",
                        _ => "[LOW]",
                    };
                    let mut line = format!("  - {} {} {}", status, priority, tp.topic);
                    if let Some(notes) = &tp.notes {
                        line.push_str(&format!(" - {}", notes));
                    }
                    line
                })
                .collect();
            sections.push(format!("Talking points to cover:\n{}", lines.join("\n")));
        }

        if !self.competitors.is_empty() {
            sections.push(format!(
                "Watch for competitor mentions: {}",
                self.competitors.join(", ")
            ));
        }

        if let Some(pricing) = &self.pricing_notes {
            sections.push(format!("Pricing context: {}", pricing));
        }

        if let Some(authority) = &self.discount_authority {
            sections.push(format!("Discount authority: {}", authority));
        }

        if let Some(extra) = &self.additional_context {
            sections.push(format!("Additional context: {}", extra));
        }

        if !self.custom_reminders.is_empty() {
            let lines: Vec<String> = self
                .custom_reminders
                .iter()
                .map(|r| format!("  - {}", r))
                .collect();
            sections.push(format!("Custom reminders:\n{}", lines.join("\n")));
        }

        let hints = self.meeting_type.coaching_hints();
        if !hints.is_empty() {
            let lines: Vec<String> = hints
                .iter()
                .map(|(key, value)| format!("  - {}: {}", key, value))
                .collect();
            sections.push(format!("Coaching focus:\n{}", lines.join("\n")));
        }

        sections.join("\n\n")
    }
}

/// A competitor name found in chunk text, with surrounding context.
#[derive(Debug, Clone, PartialEq)]
pub struct CompetitorMention {
    pub competitor: String,
    pub context: String,
}

fn word_pattern(term: &str) -> Option<Regex> {
    match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term))) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(term, error = %e, "Failed to build word-match pattern");
            None
        }
    }
}

/// Case-insensitive whole-word check for a topic in transcript text.
pub fn topic_mentioned(transcript: &str, topic: &str) -> bool {
    word_pattern(topic)
        .map(|re| re.is_match(transcript))
        .unwrap_or(false)
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Find all competitor mentions in transcript text.
///
/// Each occurrence yields its own mention with roughly 50 characters of
/// context on either side, ellipsis-affixed when truncated.
pub fn find_competitor_mentions(transcript: &str, competitors: &[String]) -> Vec<CompetitorMention> {
    let mut mentions = Vec::new();

    for competitor in competitors {
        let Some(re) = word_pattern(competitor) else {
            continue;
        };

        for m in re.find_iter(transcript) {
            let start = floor_char_boundary(transcript, m.start().saturating_sub(50));
            let end = ceil_char_boundary(transcript, (m.end() + 50).min(transcript.len()));

            let mut context = transcript[start..end].to_string();
            if start > 0 {
                context = format!("...{}", context);
            }
            if end < transcript.len() {
                context.push_str("...");
            }

            mentions.push(CompetitorMention {
                competitor: competitor.clone(),
                context,
            });
        }
    }

    mentions
}

/// Flip any newly mentioned talking points to covered.
///
/// Returns the topics that flipped. The caller is responsible for
/// persisting the prep when the returned list is non-empty.
pub fn update_topic_coverage(
    prep: &mut MeetingPrepContext,
    transcript_chunk: &str,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut newly_covered = Vec::new();

    for tp in &mut prep.talking_points {
        if !tp.mentioned && topic_mentioned(transcript_chunk, &tp.topic) {
            tp.mentioned = true;
            tp.mentioned_at = Some(now);
            newly_covered.push(tp.topic.clone());
        }
    }

    newly_covered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_mentioned_whole_word() {
        assert!(topic_mentioned("let's talk about pricing today", "pricing"));
        assert!(topic_mentioned("PRICING is the issue", "pricing"));
        // Substring is not a whole-word match
        assert!(!topic_mentioned("repricing happened", "pricing"));
    }

    #[test]
    fn test_competitor_mentions_with_context() {
        let text = "We also looked at Acme last quarter.";
        let mentions =
            find_competitor_mentions(text, &["Acme".to_string(), "Globex".to_string()]);

        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].competitor, "Acme");
        assert!(mentions[0].context.contains("Acme last quarter"));
        // Full text fits inside the window, no ellipsis
        assert!(!mentions[0].context.starts_with("..."));
    }

    #[test]
    fn test_competitor_context_truncation() {
        let filler = "a ".repeat(60);
        let text = format!("{}Acme {}", filler, filler);
        let mentions = find_competitor_mentions(&text, &["Acme".to_string()]);

        assert_eq!(mentions.len(), 1);
        assert!(mentions[0].context.starts_with("..."));
        assert!(mentions[0].context.ends_with("..."));
    }

    #[test]
    fn test_multiple_occurrences_yield_multiple_mentions() {
        let text = "Acme here, and Acme there";
        let mentions = find_competitor_mentions(text, &["Acme".to_string()]);
        assert_eq!(mentions.len(), 2);
    }

    #[test]
    fn test_update_topic_coverage_flips_once() {
        let mut prep = MeetingPrepContext::new(MeetingType::SalesCall);
        prep.talking_points.push(TalkingPoint::new("pricing", 1));

        let covered = update_topic_coverage(&mut prep, "about pricing now", Utc::now());
        assert_eq!(covered, vec!["pricing".to_string()]);
        assert!(prep.talking_points[0].mentioned);
        assert!(prep.talking_points[0].mentioned_at.is_some());

        // Already covered: mentioning again changes nothing
        let first_at = prep.talking_points[0].mentioned_at;
        let covered = update_topic_coverage(&mut prep, "pricing again", Utc::now());
        assert!(covered.is_empty());
        assert_eq!(prep.talking_points[0].mentioned_at, first_at);
    }

    #[test]
    fn test_prompt_ranks_talking_points_by_priority() {
        let mut prep = MeetingPrepContext::new(MeetingType::DiscoveryCall);
        prep.talking_points.push(TalkingPoint::new("low topic", 3));
        prep.talking_points.push(TalkingPoint::new("high topic", 1));

        let prompt = prep.format_for_prompt();
        let high_pos = prompt.find("high topic").unwrap();
        let low_pos = prompt.find("low topic").unwrap();
        assert!(high_pos < low_pos);
        assert!(prompt.contains("[NOT YET]"));
        assert!(prompt.contains("Coaching focus:"));
    }

    #[test]
    fn test_uncovered_helpers() {
        let mut prep = MeetingPrepContext::new(MeetingType::SalesCall);
        prep.talking_points.push(TalkingPoint::new("a", 1));
        prep.talking_points.push(TalkingPoint::new("b", 2));
        prep.talking_points[0].mentioned = true;

        assert_eq!(prep.uncovered_talking_points().len(), 1);
        assert!(prep.high_priority_uncovered().is_empty());
    }

    #[test]
    fn test_multibyte_context_slicing() {
        let text = format!("{} Acme {}", "é".repeat(40), "ü".repeat(40));
        let mentions = find_competitor_mentions(&text, &["Acme".to_string()]);
        assert_eq!(mentions.len(), 1);
        // Snippet boundaries must land on char boundaries, not split a codepoint
        assert!(mentions[0].context.contains("Acme"));
    }
}
