//! End-to-end evaluation flows.
//!
//! The trajectory lane runs ingest → extract → holdout split →
//! family-disjoint slice → pairing → aggregate → bootstrap / stratify → gate.
//! The benchmark lane swaps the holdout, slice and pairing stages for
//! session-id pairing. Both return plain structured results; versioning and
//! timestamps are stamped later by [`crate::report`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregate::{aggregate, AggregateStats};
use crate::bootstrap::{bootstrap_confidence_intervals, TrustSummary};
use crate::classifier::IssueClassifier;
use crate::config::EvalConfig;
use crate::domain::{judgeable_coverage, Episode, Result, TrajevalError};
use crate::extract::extract_episodes;
use crate::gate::{evaluate_gate, GateResult, Thresholds};
use crate::holdout::{
    build_family_disjoint_slice, clamp_eval_ratio, holdout_split, DisjointSliceReport,
    HoldoutReport,
};
use crate::ingest::{ingest, ScanCounts, TraceFormat, TranscriptAdapter};
use crate::metrics::METRICS;
use crate::obs;
use crate::pairing::{pair_episodes, Pair, PairingDiagnostics, PairingOptions};
use crate::stratify::{stratify, Stratification};
use crate::swebench::{pair_swebench_sessions, ContaminationPolicy, SweBenchDiagnostics};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryEvaluation {
    pub trace_root: PathBuf,
    pub format: TraceFormat,
    pub tool_name: String,
    pub classifier_policy: String,
    pub files: ScanCounts,
    pub holdout: HoldoutReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_disjoint: Option<DisjointSliceReport>,
    pub train_episode_count: usize,
    pub eval_episode_count: usize,
    pub thresholds: Thresholds,
    pub pairing: PairingOptions,
    pub pairing_diagnostics: PairingDiagnostics,
    pub aggregate: AggregateStats,
    pub trust_summary: TrustSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strata: Option<Vec<Stratification>>,
    pub gate_result: GateResult,
    pub pairs: Vec<Pair>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SweBenchEvaluation {
    pub trace_root: PathBuf,
    pub format: TraceFormat,
    pub tool_name: String,
    pub classifier_policy: String,
    pub files: ScanCounts,
    pub episode_count: usize,
    pub thresholds: Thresholds,
    pub diagnostics: SweBenchDiagnostics,
    /// Aggregated over qualified pairs only.
    pub aggregate: AggregateStats,
    pub trust_summary: TrustSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strata: Option<Vec<Stratification>>,
    pub gate_result: GateResult,
    pub pairs: Vec<Pair>,
}

fn trace_root(config: &EvalConfig) -> Result<&Path> {
    config.ingest.root.as_deref().ok_or_else(|| {
        TrajevalError::InvalidConfiguration("no trace root configured".to_string())
    })
}

/// Aggregate, bootstrap, stratify and gate one pair set.
struct Evidence {
    aggregate: AggregateStats,
    trust_summary: TrustSummary,
    strata: Option<Vec<Stratification>>,
    gate_result: GateResult,
}

fn weigh_evidence(
    config: &EvalConfig,
    episodes: &[Episode],
    pairs: &[Pair],
) -> Evidence {
    let stats = aggregate(pairs);
    let trust_summary = bootstrap_confidence_intervals(pairs, &config.trust);
    obs::emit_bootstrap_completed(pairs.len(), config.trust.bootstrap_samples, config.trust.seed);

    let strata = config.stratify.enabled.then(|| {
        let trust = config.stratify.bootstrap.then_some(&config.trust);
        stratify(episodes, pairs, &config.thresholds, trust)
    });

    let gate_result = evaluate_gate(&config.thresholds, &stats);
    obs::emit_gate_evaluated(stats.total_pairs, &gate_result);

    Evidence {
        aggregate: stats,
        trust_summary,
        strata,
        gate_result,
    }
}

/// Run the trajectory lane.
pub fn evaluate_trajectories(
    config: &EvalConfig,
    classifier: &dyn IssueClassifier,
    adapter: &dyn TranscriptAdapter,
) -> Result<TrajectoryEvaluation> {
    config.validate()?;
    let root = trace_root(config)?;
    let _span = obs::EvalSpan::enter("trajectory", &root.display().to_string());

    let ingested = ingest(root, &config.ingest.options, adapter)?;

    let (train_sessions, eval_sessions, holdout) = if config.holdout.enabled {
        let split = holdout_split(
            ingested.sessions,
            &config.holdout.criteria,
            config.holdout.eval_ratio,
        );
        obs::emit_holdout_split(&split.report);
        (split.train, split.eval, split.report)
    } else {
        let n = ingested.sessions.len();
        let report = HoldoutReport {
            enabled: false,
            eval_ratio: clamp_eval_ratio(config.holdout.eval_ratio),
            eligible_sessions: n,
            eval_sessions: n,
            eval_session_ids: ingested.sessions.iter().map(|s| s.session_id.clone()).collect(),
            ..HoldoutReport::default()
        };
        (Vec::new(), ingested.sessions, report)
    };

    let train = extract_episodes(&train_sessions, classifier, config.tokens);
    let eval = extract_episodes(&eval_sessions, classifier, config.tokens);
    obs::emit_episodes_extracted("train", train.len(), judgeable_coverage(&train));
    obs::emit_episodes_extracted("eval", eval.len(), judgeable_coverage(&eval));

    let (eval, family_disjoint) = if config.holdout.enabled && config.holdout.family_disjoint {
        let slice = build_family_disjoint_slice(&train, &eval);
        obs::emit_disjoint_slice(&slice.report);
        (slice.episodes, Some(slice.report))
    } else {
        (eval, None)
    };

    let paired = pair_episodes(&eval, &config.pairing);
    obs::emit_pairing_completed(&paired.diagnostics);

    let evidence = weigh_evidence(config, &eval, &paired.pairs);
    METRICS.flush();

    Ok(TrajectoryEvaluation {
        trace_root: root.to_path_buf(),
        format: config.ingest.options.format,
        tool_name: config.ingest.options.tool_name.clone(),
        classifier_policy: classifier.policy_version().to_string(),
        files: ingested.counts,
        holdout,
        family_disjoint,
        train_episode_count: train.len(),
        eval_episode_count: eval.len(),
        thresholds: config.thresholds,
        pairing: config.pairing,
        pairing_diagnostics: paired.diagnostics,
        aggregate: evidence.aggregate,
        trust_summary: evidence.trust_summary,
        strata: evidence.strata,
        gate_result: evidence.gate_result,
        pairs: paired.pairs,
    })
}

/// Run the benchmark lane.
pub fn evaluate_swebench(
    config: &EvalConfig,
    classifier: &dyn IssueClassifier,
    adapter: &dyn TranscriptAdapter,
) -> Result<SweBenchEvaluation> {
    config.validate()?;
    let policy = ContaminationPolicy::from_patterns(
        config.swebench.contamination_policy_version.clone(),
        config.swebench.contamination_patterns.as_slice(),
    )?;
    let root = trace_root(config)?;
    let _span = obs::EvalSpan::enter("swebench", &root.display().to_string());

    let ingested = ingest(root, &config.ingest.options, adapter)?;
    let episodes = extract_episodes(&ingested.sessions, classifier, config.tokens);
    obs::emit_episodes_extracted("swebench", episodes.len(), judgeable_coverage(&episodes));

    let outcome = pair_swebench_sessions(
        &ingested.sessions,
        &episodes,
        &config.swebench.options,
        &policy,
    );
    obs::emit_swebench_paired(&outcome.diagnostics);

    let episodes = outcome.clean_episodes(&episodes);
    let evidence = weigh_evidence(config, &episodes, &outcome.qualified_pairs);
    METRICS.flush();

    Ok(SweBenchEvaluation {
        trace_root: root.to_path_buf(),
        format: config.ingest.options.format,
        tool_name: config.ingest.options.tool_name.clone(),
        classifier_policy: classifier.policy_version().to_string(),
        files: ingested.counts,
        episode_count: episodes.len(),
        thresholds: config.thresholds,
        diagnostics: outcome.diagnostics,
        aggregate: evidence.aggregate,
        trust_summary: evidence.trust_summary,
        strata: evidence.strata,
        gate_result: evidence.gate_result,
        pairs: outcome.qualified_pairs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::HeuristicIssueClassifier;
    use crate::ingest::HarnessTranscriptAdapter;

    #[test]
    fn test_missing_root_is_invalid_configuration() {
        let err = evaluate_trajectories(
            &EvalConfig::default(),
            &HeuristicIssueClassifier::standard(),
            &HarnessTranscriptAdapter,
        )
        .expect_err("no root");
        assert!(matches!(err, TrajevalError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_invalid_config_fails_before_io() {
        let mut config = EvalConfig::default();
        config.ingest.root = Some(PathBuf::from("/definitely/not/here"));
        config.trust.confidence_level = 2.0;
        let err = evaluate_trajectories(
            &config,
            &HeuristicIssueClassifier::standard(),
            &HarnessTranscriptAdapter,
        )
        .expect_err("invalid");
        assert!(matches!(err, TrajevalError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_empty_root_is_no_input_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = EvalConfig::default();
        config.ingest.root = Some(dir.path().to_path_buf());
        let err = evaluate_swebench(
            &config,
            &HeuristicIssueClassifier::standard(),
            &HarnessTranscriptAdapter,
        )
        .expect_err("empty");
        assert!(matches!(err, TrajevalError::NoInputFiles { .. }));
    }
}
