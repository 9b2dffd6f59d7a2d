//! Session lifecycle types.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a transcription session.
///
/// Only `Recording` runs the processing loop. `Stopped` is terminal;
/// restarting requires an explicit start which re-derives the capture
/// start index from the chunks already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    /// Meeting prep submitted
    Prepared,
    Recording,
    Paused,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Prepared => "prepared",
            Self::Recording => "recording",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

/// Why a session transitioned to `Stopped`, so operators can tell an
/// explicit stop apart from the capture process dying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    CaptureDied,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::CaptureDied => "capture_died",
        }
    }
}

/// Timestamped session directory name, e.g. `2026-08-23_141502`.
pub fn session_stamp(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%d_%H%M%S").to_string()
}
