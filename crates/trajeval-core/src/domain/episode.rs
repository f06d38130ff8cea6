//! Failure → recovery episodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the hint feature was active for an episode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Off,
    On,
}

impl Mode {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "on" => Some(Self::On),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::On => "on",
        }
    }
}

/// Kinds of issue a retry can be classified as.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    BenignProbe,
    TransientExternal,
    CommandMismatch,
    EnvironmentMismatch,
    MissingContext,
    UnknownFailure,
}

/// A judged retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub kind: IssueKind,
    pub harmful: bool,
}

/// One failure occurrence plus its retry sequence within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    /// `<sessionId>#<ordinal>`, unique within one extraction run.
    pub id: String,
    pub session_id: String,
    pub family_signature: String,
    /// Coarse tool-surface category of the family (stratification only).
    pub tool_surface: String,
    pub mode: Mode,
    /// Model label of the owning session (`unknown` when none was recorded).
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub total_retries: u64,
    pub harmful_retries: u64,
    pub benign_retries: u64,
    pub abstained_retries: u64,
    pub wall_time_ms: f64,
    pub token_count: u64,
    pub token_proxy: f64,
    pub cost_usd: f64,
    pub success: bool,
    pub issues: Vec<Issue>,
}

impl Episode {
    /// Ordering key used by chronological walks.
    pub fn chrono_key(&self) -> (DateTime<Utc>, &str) {
        (self.started_at, self.id.as_str())
    }
}

/// `(totalRetries − abstainedRetries) / totalRetries`, 0 when there are no retries.
pub fn judgeable_coverage(episodes: &[Episode]) -> f64 {
    let total: u64 = episodes.iter().map(|e| e.total_retries).sum();
    let abstained: u64 = episodes.iter().map(|e| e.abstained_retries).sum();
    coverage_ratio(total, abstained)
}

pub(crate) fn coverage_ratio(total: u64, abstained: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        total.saturating_sub(abstained) as f64 / total as f64
    }
}
