//! Coaching alert types.
//!
//! Alerts are appended to a per-session JSONL log; after creation only
//! the `dismissed` flag may change.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category of a coaching alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Objection,
    SuggestedQuestion,
    MissingTopic,
    CompetitorMention,
    PaceWarning,
    CustomReminder,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Objection => "objection",
            Self::SuggestedQuestion => "suggested_question",
            Self::MissingTopic => "missing_topic",
            Self::CompetitorMention => "competitor_mention",
            Self::PaceWarning => "pace_warning",
            Self::CustomReminder => "custom_reminder",
        }
    }
}

/// A single coaching suggestion produced by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachingAlert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub dismissed: bool,

    /// Free-form details kept open only at the serialization boundary
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CoachingAlert {
    pub fn new(alert_type: AlertType, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            content: content.into(),
            suggestion: None,
            timestamp: Utc::now(),
            dismissed: false,
            metadata: HashMap::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: Option<String>) -> Self {
        self.suggestion = suggestion;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_type_serialization() {
        let json = serde_json::to_string(&AlertType::CompetitorMention).unwrap();
        assert_eq!(json, "\"competitor_mention\"");

        let parsed: AlertType = serde_json::from_str("\"pace_warning\"").unwrap();
        assert_eq!(parsed, AlertType::PaceWarning);
    }

    #[test]
    fn test_alert_roundtrip() {
        let alert = CoachingAlert::new(AlertType::Objection, "Price concern raised")
            .with_suggestion(Some("Reframe around total cost of ownership".to_string()))
            .with_metadata("observation_type", serde_json::json!("warning"));

        let json = serde_json::to_string(&alert).unwrap();
        let parsed: CoachingAlert = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, alert.id);
        assert_eq!(parsed.alert_type, AlertType::Objection);
        assert!(!parsed.dismissed);
        assert_eq!(
            parsed.metadata.get("observation_type"),
            Some(&serde_json::json!("warning"))
        );
    }

    #[test]
    fn test_empty_metadata_omitted() {
        let alert = CoachingAlert::new(AlertType::PaceWarning, "slow down");
        let json = serde_json::to_string(&alert).unwrap();
        assert!(!json.contains("metadata"));
    }
}
