//! Structured observability hooks for evaluation runs.
//!
//! This module provides:
//! - Evaluation-scoped tracing spans via the `EvalSpan` RAII guard
//! - Emission functions for each pipeline stage: ingest, extraction, holdout,
//!   pairing, bootstrap, gate evaluation and report output
//!
//! Events are emitted at `info!` level (configurable via `RUST_LOG`).
//! For JSON output, pass `--json` to the CLI.

use std::path::Path;

use tracing::info;

use crate::gate::GateResult;
use crate::holdout::{DisjointSliceReport, HoldoutReport};
use crate::ingest::ScanCounts;
use crate::pairing::PairingDiagnostics;
use crate::swebench::SweBenchDiagnostics;

/// RAII guard that enters an evaluation-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = EvalSpan::enter("trajectory", "traces/");
/// // every event below carries lane = "trajectory"
/// ```
pub struct EvalSpan {
    _span: tracing::span::EnteredSpan,
}

impl EvalSpan {
    pub fn enter(lane: &str, trace_root: &str) -> Self {
        let span = tracing::info_span!("trajeval.eval", lane = %lane, trace_root = %trace_root);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: trace ingestion finished.
pub fn emit_ingest_completed(root: &Path, counts: &ScanCounts) {
    info!(
        event = "ingest.completed",
        root = %root.display(),
        files_discovered = counts.files_discovered,
        files_unsupported = counts.files_unsupported,
        lines_skipped = counts.lines_skipped,
        events = counts.events_ingested,
        sessions = counts.sessions,
    );
}

/// Emit event: episodes extracted for one lane.
pub fn emit_episodes_extracted(lane: &str, episodes: usize, judgeable_coverage: f64) {
    info!(
        event = "episodes.extracted",
        lane = %lane,
        episodes = episodes,
        judgeable_coverage = judgeable_coverage,
    );
}

pub fn emit_holdout_split(report: &HoldoutReport) {
    info!(
        event = "holdout.split",
        eval_ratio = report.eval_ratio,
        eligible = report.eligible_sessions,
        dropped = report.dropped_sessions,
        train = report.train_sessions,
        eval = report.eval_sessions,
    );
}

pub fn emit_disjoint_slice(report: &DisjointSliceReport) {
    info!(
        event = "holdout.family_disjoint",
        disjoint_families = report.disjoint_eval_family_count,
        removed_episodes = report.removed_episode_count,
        removed_families = report.removed_eval_family_count,
    );
}

/// Emit event: pairing finished with its diagnostics.
pub fn emit_pairing_completed(diagnostics: &PairingDiagnostics) {
    info!(
        event = "pairing.completed",
        families_seen = diagnostics.families_seen,
        families_eligible = diagnostics.families_eligible,
        candidates = diagnostics.candidate_transitions,
        dropped_same_session = diagnostics.dropped_same_session,
        dropped_outlier_ratio = diagnostics.dropped_outlier_ratio,
        pairs = diagnostics.pairs_built,
    );
}

pub fn emit_swebench_paired(diagnostics: &SweBenchDiagnostics) {
    info!(
        event = "swebench.paired",
        sessions = diagnostics.sessions_seen,
        unparsable = diagnostics.unparsable_session_ids.len(),
        contaminated = diagnostics.contaminated_sessions,
        pairs = diagnostics.pairs_built,
        qualified = diagnostics.qualified_pairs,
    );
}

pub fn emit_bootstrap_completed(pairs: usize, samples: usize, seed: u64) {
    info!(event = "bootstrap.completed", pairs = pairs, samples = samples, seed = seed);
}

/// Emit event: gate evaluation completed with pair count and verdict.
pub fn emit_gate_evaluated(total_pairs: usize, result: &GateResult) {
    info!(
        event = "gate.evaluated",
        total_pairs = total_pairs,
        passed = result.pass,
        failures = result.failures.len(),
    );
}

/// Emit event: report written.
pub fn emit_report_written(path: &Path, digest: &str) {
    info!(event = "report.written", path = %path.display(), digest = %digest);
}

/// Emit event: a trace file was skipped (warning level).
pub fn emit_file_skipped(error: &dyn std::fmt::Display) {
    tracing::warn!(event = "ingest.file_skipped", error = %error);
}
