//! Pipeline core: durable session state, the event bus, coaching, and
//! the per-session processing loop.

pub mod bus;
pub mod coaching;
pub mod ledger;
pub mod runner;

pub use bus::{Event, EventBus, EventKind, Subscription};
pub use coaching::{
    AlertLimiter, CoachingConfig, CoachingEngine, CoachingOutcome, PaceConfig, PaceTracker,
};
pub use ledger::{LedgerError, SessionLedger, SessionPaths};
pub use runner::{LoopStep, RunnerHandle, RunnerOptions, SessionRunner};
