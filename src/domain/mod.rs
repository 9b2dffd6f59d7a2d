//! Domain data structures.
//!
//! Types shared across the pipeline: transcripts, coaching alerts,
//! meeting prep, and session lifecycle.

pub mod alerts;
pub mod prep;
pub mod session;
pub mod transcript;

pub use alerts::{AlertType, CoachingAlert};
pub use prep::{
    find_competitor_mentions, topic_mentioned, update_topic_coverage, Attendee,
    CompetitorMention, MeetingPrepContext, MeetingType, TalkingPoint,
};
pub use session::{session_stamp, SessionStatus, StopReason};
pub use transcript::{TranscriptRecord, TranscriptResult, TranscriptSegment};
