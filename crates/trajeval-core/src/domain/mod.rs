//! Domain models for trajeval.
//!
//! Canonical definitions for the core entities:
//! - `Event`: one immutable trace record
//! - `SessionLog`: the ordered events of one session
//! - `Episode`: one failure plus its retries within a session

pub mod episode;
pub mod error;
pub mod event;
pub mod session;

// Re-export main types and errors
pub use episode::{judgeable_coverage, Episode, Issue, IssueKind, Mode};
pub use error::{Result, TrajevalError};
pub use event::{sort_events, Event, EventMetrics, EventType, TokenUsage, ToolResultStatus};
pub use session::{model_label, SessionAggregates, SessionLog, UNKNOWN_MODEL};
