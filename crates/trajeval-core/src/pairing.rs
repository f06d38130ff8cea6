//! OFF→ON pairing of episodes within a failure family.
//!
//! Each family's episodes are walked in `(startedAt, id)` order and every
//! adjacent OFF→ON transition becomes a candidate. Candidates are dropped by
//! the cross-session requirement first and by the outlier-ratio guard second;
//! the survivors are the pairs.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{model_label, Episode, Mode, UNKNOWN_MODEL};
use crate::metrics::METRICS;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PairingOptions {
    pub min_occurrences_per_family: usize,
    pub require_cross_session: bool,
    /// `None` disables the wall-time outlier guard.
    pub max_wall_time_ratio: Option<f64>,
    /// `None` disables the token-count outlier guard.
    pub max_token_count_ratio: Option<f64>,
}

impl Default for PairingOptions {
    fn default() -> Self {
        Self {
            min_occurrences_per_family: 2,
            require_cross_session: true,
            max_wall_time_ratio: Some(20.0),
            max_token_count_ratio: Some(20.0),
        }
    }
}

/// One OFF episode matched with the next ON episode of the same family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pair {
    pub family_signature: String,
    pub tool_surface: String,
    /// Model label across both sides; `mixed:<a,b>` when they differ.
    pub model: String,
    pub off_episode_id: String,
    pub on_episode_id: String,
    pub off_session_id: String,
    pub on_session_id: String,
    pub off_started_at: DateTime<Utc>,
    pub on_started_at: DateTime<Utc>,
    pub total_retries_off: u64,
    pub total_retries_on: u64,
    pub harmful_retries_off: u64,
    pub harmful_retries_on: u64,
    pub benign_retries_off: u64,
    pub benign_retries_on: u64,
    pub abstained_retries_off: u64,
    pub abstained_retries_on: u64,
    pub wall_time_ms_off: f64,
    pub wall_time_ms_on: f64,
    pub token_count_off: u64,
    pub token_count_on: u64,
    pub token_proxy_off: f64,
    pub token_proxy_on: f64,
    pub cost_usd_off: f64,
    pub cost_usd_on: f64,
    pub success_off: bool,
    pub success_on: bool,
}

impl Pair {
    pub fn from_episodes(off: &Episode, on: &Episode) -> Self {
        Self {
            family_signature: off.family_signature.clone(),
            tool_surface: off.tool_surface.clone(),
            model: pair_model_label(&off.model, &on.model),
            off_episode_id: off.id.clone(),
            on_episode_id: on.id.clone(),
            off_session_id: off.session_id.clone(),
            on_session_id: on.session_id.clone(),
            off_started_at: off.started_at,
            on_started_at: on.started_at,
            total_retries_off: off.total_retries,
            total_retries_on: on.total_retries,
            harmful_retries_off: off.harmful_retries,
            harmful_retries_on: on.harmful_retries,
            benign_retries_off: off.benign_retries,
            benign_retries_on: on.benign_retries,
            abstained_retries_off: off.abstained_retries,
            abstained_retries_on: on.abstained_retries,
            wall_time_ms_off: off.wall_time_ms,
            wall_time_ms_on: on.wall_time_ms,
            token_count_off: off.token_count,
            token_count_on: on.token_count,
            token_proxy_off: off.token_proxy,
            token_proxy_on: on.token_proxy,
            cost_usd_off: off.cost_usd,
            cost_usd_on: on.cost_usd,
            success_off: off.success,
            success_on: on.success,
        }
    }
}

/// Merge two episode model labels into one pair label.
fn pair_model_label(off: &str, on: &str) -> String {
    let mut models = BTreeSet::new();
    for label in [off, on] {
        let names = label.strip_prefix("mixed:").unwrap_or(label);
        models.extend(
            names
                .split(',')
                .filter(|m| !m.is_empty() && *m != UNKNOWN_MODEL)
                .map(str::to_string),
        );
    }
    model_label(&models)
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PairingDiagnostics {
    pub families_seen: usize,
    pub families_eligible: usize,
    pub candidate_transitions: usize,
    pub dropped_same_session: usize,
    pub dropped_outlier_ratio: usize,
    pub pairs_built: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PairingOutcome {
    pub pairs: Vec<Pair>,
    pub diagnostics: PairingDiagnostics,
}

/// `max(a, b) / max(min(a, b), 1)`.
pub fn outlier_ratio(a: f64, b: f64) -> f64 {
    a.max(b) / a.min(b).max(1.0)
}

fn exceeds(bound: Option<f64>, a: f64, b: f64) -> bool {
    bound.is_some_and(|max| outlier_ratio(a, b) > max)
}

/// Pair episodes of one lane.
pub fn pair_episodes(episodes: &[Episode], options: &PairingOptions) -> PairingOutcome {
    let mut families: BTreeMap<&str, Vec<&Episode>> = BTreeMap::new();
    for episode in episodes {
        families
            .entry(episode.family_signature.as_str())
            .or_default()
            .push(episode);
    }

    let mut diagnostics = PairingDiagnostics {
        families_seen: families.len(),
        ..PairingDiagnostics::default()
    };
    let mut pairs = Vec::new();

    for members in families.values_mut() {
        if members.len() < options.min_occurrences_per_family {
            continue;
        }
        diagnostics.families_eligible += 1;
        members.sort_by(|a, b| a.chrono_key().cmp(&b.chrono_key()));

        for window in members.windows(2) {
            let (off, on) = (window[0], window[1]);
            if off.mode != Mode::Off || on.mode != Mode::On {
                continue;
            }
            diagnostics.candidate_transitions += 1;

            if options.require_cross_session && off.session_id == on.session_id {
                diagnostics.dropped_same_session += 1;
                continue;
            }
            if exceeds(options.max_wall_time_ratio, off.wall_time_ms, on.wall_time_ms)
                || exceeds(
                    options.max_token_count_ratio,
                    off.token_count as f64,
                    on.token_count as f64,
                )
            {
                diagnostics.dropped_outlier_ratio += 1;
                continue;
            }
            pairs.push(Pair::from_episodes(off, on));
        }
    }

    diagnostics.pairs_built = pairs.len();
    METRICS.add_pairs_built(pairs.len() as u64);
    PairingOutcome { pairs, diagnostics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn episode(session: &str, minute: i64, mode: Mode, wall: f64) -> Episode {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap() + Duration::minutes(minute);
        Episode {
            id: format!("{session}#{minute}"),
            session_id: session.to_string(),
            family_signature: "git-push-rejected".to_string(),
            tool_surface: "git".to_string(),
            mode,
            model: "unknown".to_string(),
            started_at: at,
            ended_at: at,
            total_retries: 2,
            harmful_retries: 1,
            benign_retries: 0,
            abstained_retries: 0,
            wall_time_ms: wall,
            token_count: 100,
            token_proxy: 100.0,
            cost_usd: 0.0003,
            success: true,
            issues: vec![],
        }
    }

    #[test]
    fn test_interleaved_cross_session_transitions() {
        let episodes = vec![
            episode("s1", 0, Mode::Off, 100.0),
            episode("s2", 1, Mode::On, 100.0),
            episode("s1", 2, Mode::Off, 100.0),
            episode("s2", 3, Mode::On, 100.0),
        ];
        let outcome = pair_episodes(&episodes, &PairingOptions::default());
        assert_eq!(outcome.pairs.len(), 2);
        assert!(outcome.pairs.iter().all(|p| p.off_session_id != p.on_session_id));
        assert_eq!(outcome.diagnostics.candidate_transitions, 2);
        assert_eq!(outcome.diagnostics.families_eligible, 1);
    }

    #[test]
    fn test_same_session_checked_before_outlier_guard() {
        let episodes = vec![
            episode("s1", 0, Mode::Off, 10.0),
            episode("s1", 1, Mode::On, 10_000.0),
        ];
        let d = pair_episodes(&episodes, &PairingOptions::default()).diagnostics;
        assert_eq!(d.dropped_same_session, 1);
        assert_eq!(d.dropped_outlier_ratio, 0);

        let relaxed = PairingOptions {
            require_cross_session: false,
            ..PairingOptions::default()
        };
        let d = pair_episodes(&episodes, &relaxed).diagnostics;
        assert_eq!(d.dropped_outlier_ratio, 1);

        let unguarded = PairingOptions {
            require_cross_session: false,
            max_wall_time_ratio: None,
            ..PairingOptions::default()
        };
        assert_eq!(pair_episodes(&episodes, &unguarded).pairs.len(), 1);
    }

    #[test]
    fn test_families_below_min_occurrences_are_skipped() {
        let episodes = vec![episode("s1", 0, Mode::Off, 1.0)];
        let d = pair_episodes(&episodes, &PairingOptions::default()).diagnostics;
        assert_eq!(d.families_seen, 1);
        assert_eq!(d.families_eligible, 0);
        assert_eq!(d.candidate_transitions, 0);
    }

    #[test]
    fn test_on_to_off_is_not_a_candidate() {
        let episodes = vec![
            episode("s2", 0, Mode::On, 1.0),
            episode("s1", 1, Mode::Off, 1.0),
            episode("s3", 2, Mode::Off, 1.0),
        ];
        assert_eq!(
            pair_episodes(&episodes, &PairingOptions::default())
                .diagnostics
                .candidate_transitions,
            0
        );
    }

    #[test]
    fn test_outlier_ratio_floors_denominator() {
        assert_eq!(outlier_ratio(0.0, 0.0), 0.0);
        assert_eq!(outlier_ratio(0.0, 5.0), 5.0);
        assert_eq!(outlier_ratio(40.0, 2.0), 20.0);
    }

    #[test]
    fn test_pair_model_label() {
        assert_eq!(pair_model_label("unknown", "unknown"), "unknown");
        assert_eq!(pair_model_label("m-a", "unknown"), "m-a");
        assert_eq!(pair_model_label("m-b", "m-a"), "mixed:m-a,m-b");
        assert_eq!(pair_model_label("mixed:m-a,m-c", "m-b"), "mixed:m-a,m-b,m-c");
    }
}
