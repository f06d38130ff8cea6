//! Stratified re-aggregation by model identity and tool surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregate::{aggregate, AggregateStats};
use crate::bootstrap::{
    bootstrap_confidence_intervals, derive_stratum_seed, TrustOptions, TrustSummary,
};
use crate::domain::Episode;
use crate::gate::{evaluate_gate, GateResult, Thresholds};
use crate::pairing::Pair;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StratumDimension {
    Model,
    ToolSurface,
    ModelXToolSurface,
}

impl StratumDimension {
    pub const ALL: [StratumDimension; 3] = [
        StratumDimension::Model,
        StratumDimension::ToolSurface,
        StratumDimension::ModelXToolSurface,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::ToolSurface => "tool_surface",
            Self::ModelXToolSurface => "model_x_tool_surface",
        }
    }

    fn key(self, model: &str, surface: &str) -> String {
        match self {
            Self::Model => model.to_string(),
            Self::ToolSurface => surface.to_string(),
            Self::ModelXToolSurface => format!("{model}|{surface}"),
        }
    }

    fn episode_key(self, episode: &Episode) -> String {
        self.key(&episode.model, &episode.tool_surface)
    }

    fn pair_key(self, pair: &Pair) -> String {
        self.key(&pair.model, &pair.tool_surface)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StratumGroup {
    pub key: String,
    pub pair_count: usize,
    pub episode_count: usize,
    pub aggregate: AggregateStats,
    pub gate_result: GateResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_summary: Option<TrustSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stratification {
    pub dimension: StratumDimension,
    pub groups: Vec<StratumGroup>,
}

/// Group episodes and pairs along one dimension.
///
/// Pairs carry their own model label (possibly `mixed:`), so a pair's group
/// may hold zero episodes of the same label; such groups are still reported.
pub fn stratify_dimension(
    dimension: StratumDimension,
    episodes: &[Episode],
    pairs: &[Pair],
    thresholds: &Thresholds,
    trust: Option<&TrustOptions>,
) -> Stratification {
    let mut episode_counts: BTreeMap<String, usize> = BTreeMap::new();
    for episode in episodes {
        *episode_counts.entry(dimension.episode_key(episode)).or_default() += 1;
    }
    let mut pair_groups: BTreeMap<String, Vec<Pair>> = BTreeMap::new();
    for pair in pairs {
        pair_groups
            .entry(dimension.pair_key(pair))
            .or_default()
            .push(pair.clone());
    }

    let keys: Vec<String> = episode_counts
        .keys()
        .chain(pair_groups.keys())
        .cloned()
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut groups: Vec<StratumGroup> = keys
        .into_iter()
        .map(|key| {
            let members = pair_groups.remove(&key).unwrap_or_default();
            let stats = aggregate(&members);
            let gate_result = evaluate_gate(thresholds, &stats);
            let trust_summary = trust.map(|options| {
                let stratum = TrustOptions {
                    seed: derive_stratum_seed(
                        options.seed,
                        &format!("{}={}", dimension.as_str(), key),
                    ),
                    ..*options
                };
                bootstrap_confidence_intervals(&members, &stratum)
            });
            StratumGroup {
                pair_count: members.len(),
                episode_count: episode_counts.get(&key).copied().unwrap_or(0),
                aggregate: stats,
                gate_result,
                trust_summary,
                key,
            }
        })
        .collect();

    groups.sort_by(|a, b| {
        b.pair_count
            .cmp(&a.pair_count)
            .then(b.episode_count.cmp(&a.episode_count))
            .then_with(|| a.key.cmp(&b.key))
    });

    Stratification { dimension, groups }
}

/// All three dimensions.
pub fn stratify(
    episodes: &[Episode],
    pairs: &[Pair],
    thresholds: &Thresholds,
    trust: Option<&TrustOptions>,
) -> Vec<Stratification> {
    StratumDimension::ALL
        .iter()
        .map(|d| stratify_dimension(*d, episodes, pairs, thresholds, trust))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Mode;
    use chrono::Utc;

    fn episode(model: &str, surface: &str) -> Episode {
        let now = Utc::now();
        Episode {
            id: "s#0".to_string(),
            session_id: "s".to_string(),
            family_signature: format!("{surface}-x-error"),
            tool_surface: surface.to_string(),
            mode: Mode::Off,
            model: model.to_string(),
            started_at: now,
            ended_at: now,
            total_retries: 1,
            harmful_retries: 0,
            benign_retries: 0,
            abstained_retries: 0,
            wall_time_ms: 0.0,
            token_count: 0,
            token_proxy: 0.0,
            cost_usd: 0.0,
            success: true,
            issues: vec![],
        }
    }

    fn pair(model: &str, surface: &str) -> Pair {
        let off = episode(model, surface);
        let mut on = episode(model, surface);
        on.mode = Mode::On;
        Pair::from_episodes(&off, &on)
    }

    #[test]
    fn test_groups_sorted_by_power_then_key() {
        let episodes = vec![
            episode("m-a", "git"),
            episode("m-a", "git"),
            episode("m-b", "k8s"),
            episode("m-b", "k8s"),
            episode("m-b", "k8s"),
            episode("m-c", "shell"),
        ];
        let pairs = vec![pair("m-a", "git"), pair("m-b", "k8s")];
        let s = stratify_dimension(
            StratumDimension::Model,
            &episodes,
            &pairs,
            &Thresholds::default(),
            None,
        );
        let keys: Vec<&str> = s.groups.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["m-b", "m-a", "m-c"]);
        assert_eq!(s.groups[0].pair_count, 1);
        assert_eq!(s.groups[2].pair_count, 0);
        assert!(!s.groups[0].gate_result.pass);
    }

    #[test]
    fn test_all_three_dimensions_and_cross_key() {
        let episodes = vec![episode("m-a", "git")];
        let pairs = vec![pair("m-a", "git")];
        let all = stratify(&episodes, &pairs, &Thresholds::default(), Some(&TrustOptions::default()));
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].dimension, StratumDimension::ModelXToolSurface);
        assert_eq!(all[2].groups[0].key, "m-a|git");
        assert!(all[0].groups[0].trust_summary.is_some());
    }
}
