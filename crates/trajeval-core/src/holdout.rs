//! Leakage-safe partitioning: long-horizon filtering, chronological
//! train/eval split, and the family-disjoint eval slice.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Episode, SessionLog};

pub const DEFAULT_EVAL_RATIO: f64 = 0.3;
pub const MIN_EVAL_RATIO: f64 = 0.05;
pub const MAX_EVAL_RATIO: f64 = 0.95;

/// Minimum size a session must reach to take part in holdout evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LongHorizonCriteria {
    pub min_duration_ms: i64,
    pub min_total_latency_ms: f64,
    pub min_tool_results: usize,
}

impl Default for LongHorizonCriteria {
    fn default() -> Self {
        Self {
            min_duration_ms: 0,
            min_total_latency_ms: 0.0,
            min_tool_results: 1,
        }
    }
}

impl LongHorizonCriteria {
    pub fn is_eligible(&self, session: &SessionLog) -> bool {
        let agg = session.aggregates();
        agg.duration_ms >= self.min_duration_ms
            && agg.total_latency_ms >= self.min_total_latency_ms
            && agg.tool_result_count >= self.min_tool_results
    }
}

/// Partition sessions into `(eligible, dropped_count)`.
pub fn filter_long_horizon(
    sessions: Vec<SessionLog>,
    criteria: &LongHorizonCriteria,
) -> (Vec<SessionLog>, usize) {
    let before = sessions.len();
    let eligible: Vec<SessionLog> = sessions
        .into_iter()
        .filter(|s| criteria.is_eligible(s))
        .collect();
    let dropped = before - eligible.len();
    (eligible, dropped)
}

/// Clamp an eval ratio into `[0.05, 0.95]`; non-finite values fall back to
/// the default.
pub fn clamp_eval_ratio(ratio: f64) -> f64 {
    if ratio.is_finite() {
        ratio.clamp(MIN_EVAL_RATIO, MAX_EVAL_RATIO)
    } else {
        DEFAULT_EVAL_RATIO
    }
}

/// `ceil(ratio · n)` for an already-clamped ratio.
pub fn eval_count(n: usize, ratio: f64) -> usize {
    // Absorb float noise such as 0.3 * 10 = 3.0000000000000004.
    let raw = (ratio * n as f64 - 1e-9).ceil();
    (raw.max(0.0) as usize).min(n)
}

/// Summary of one holdout split.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HoldoutReport {
    pub enabled: bool,
    pub eval_ratio: f64,
    pub eligible_sessions: usize,
    pub dropped_sessions: usize,
    pub train_sessions: usize,
    pub eval_sessions: usize,
    pub train_session_ids: Vec<String>,
    pub eval_session_ids: Vec<String>,
    /// Start time of the earliest eval session.
    pub split_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct HoldoutSplit {
    pub train: Vec<SessionLog>,
    pub eval: Vec<SessionLog>,
    pub report: HoldoutReport,
}

/// Deterministic chronological split: the last `ceil(r·n)` sessions by
/// `(startedAt, sessionId)` become eval, the rest train.
pub fn split_chronologically(mut sessions: Vec<SessionLog>, ratio: f64) -> HoldoutSplit {
    let ratio = clamp_eval_ratio(ratio);
    sessions.sort_by(|a, b| {
        (a.started_at(), a.session_id.as_str()).cmp(&(b.started_at(), b.session_id.as_str()))
    });

    let n = sessions.len();
    let eval = sessions.split_off(n - eval_count(n, ratio));
    let train = sessions;

    let report = HoldoutReport {
        enabled: true,
        eval_ratio: ratio,
        eligible_sessions: n,
        dropped_sessions: 0,
        train_sessions: train.len(),
        eval_sessions: eval.len(),
        train_session_ids: train.iter().map(|s| s.session_id.clone()).collect(),
        eval_session_ids: eval.iter().map(|s| s.session_id.clone()).collect(),
        split_at: eval.first().and_then(|s| s.started_at()),
    };

    HoldoutSplit {
        train,
        eval,
        report,
    }
}

/// Filter by `criteria`, then split chronologically.
pub fn holdout_split(
    sessions: Vec<SessionLog>,
    criteria: &LongHorizonCriteria,
    ratio: f64,
) -> HoldoutSplit {
    let (eligible, dropped) = filter_long_horizon(sessions, criteria);
    let mut split = split_chronologically(eligible, ratio);
    split.report.dropped_sessions = dropped;
    split
}

// ---------------------------------------------------------------------------
// Family-disjoint slice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DisjointSliceReport {
    pub disjoint_eval_family_count: usize,
    pub removed_episode_count: usize,
    pub removed_eval_family_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DisjointSlice {
    pub episodes: Vec<Episode>,
    pub report: DisjointSliceReport,
}

/// Drop every eval episode whose family also occurs in train.
pub fn build_family_disjoint_slice(train: &[Episode], eval: &[Episode]) -> DisjointSlice {
    let train_families: BTreeSet<&str> =
        train.iter().map(|e| e.family_signature.as_str()).collect();

    let mut removed_families = BTreeSet::new();
    let mut kept_families = BTreeSet::new();
    let mut episodes = Vec::with_capacity(eval.len());

    for episode in eval {
        let family = episode.family_signature.as_str();
        if train_families.contains(family) {
            removed_families.insert(family);
        } else {
            kept_families.insert(family);
            episodes.push(episode.clone());
        }
    }

    let report = DisjointSliceReport {
        disjoint_eval_family_count: kept_families.len(),
        removed_episode_count: eval.len() - episodes.len(),
        removed_eval_family_count: removed_families.len(),
    };

    DisjointSlice { episodes, report }
}
