//! Observability tests for evaluation tracing.
//!
//! These tests verify that structured tracing events are emitted for each
//! pipeline stage: ingest, extraction, pairing, bootstrap, gate and report.

use std::path::Path;

use trajeval_core::gate::GateResult;
use trajeval_core::holdout::HoldoutReport;
use trajeval_core::obs::{
    emit_bootstrap_completed, emit_file_skipped, emit_gate_evaluated, emit_holdout_split,
    emit_pairing_completed, emit_report_written, EvalSpan,
};
use trajeval_core::{
    evaluate_trajectories, EvalConfig, HarnessTranscriptAdapter, HeuristicIssueClassifier,
    PairingDiagnostics, TrajevalError,
};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_pairing_completed_logs_diagnostics() {
    emit_pairing_completed(&PairingDiagnostics {
        families_seen: 3,
        families_eligible: 2,
        candidate_transitions: 4,
        dropped_same_session: 1,
        dropped_outlier_ratio: 0,
        pairs_built: 3,
    });
    assert!(logs_contain("pairing.completed"));
    assert!(logs_contain("dropped_same_session=1"));
}

#[traced_test]
#[test]
fn test_emit_gate_evaluated_logs_verdict() {
    emit_gate_evaluated(
        2,
        &GateResult {
            pass: false,
            failures: vec!["insufficient evidence: 2 pairs < required 20".to_string()],
        },
    );
    assert!(logs_contain("gate.evaluated"));
    assert!(logs_contain("passed=false"));
}

#[traced_test]
#[test]
fn test_emit_holdout_and_bootstrap() {
    emit_holdout_split(&HoldoutReport {
        enabled: true,
        eval_ratio: 0.3,
        eligible_sessions: 10,
        train_sessions: 7,
        eval_sessions: 3,
        ..HoldoutReport::default()
    });
    emit_bootstrap_completed(12, 1000, 42);
    assert!(logs_contain("holdout.split"));
    assert!(logs_contain("bootstrap.completed"));
    assert!(logs_contain("seed=42"));
}

#[traced_test]
#[test]
fn test_emit_report_written_logs_digest() {
    emit_report_written(Path::new("out/report.json"), "abc123");
    assert!(logs_contain("report.written"));
    assert!(logs_contain("abc123"));
}

#[traced_test]
#[test]
fn test_file_skipped_is_a_warning() {
    let err = TrajevalError::UnsupportedFormat {
        path: "traces/odd.jsonl".into(),
        expected: "canonical".to_string(),
    };
    emit_file_skipped(&err);
    assert!(logs_contain("WARN"));
    assert!(logs_contain("ingest.file_skipped"));
}

#[traced_test]
#[test]
fn test_eval_span_enter_creates_span() {
    let span = EvalSpan::enter("trajectory", "traces/");
    tracing::info!(event = "inside.span");
    drop(span);
    assert!(logs_contain("trajeval.eval"));
}

#[traced_test]
#[test]
fn test_full_run_emits_every_stage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let line = serde_json::json!({
        "id": "e1",
        "timestamp": "2026-03-01T09:00:00Z",
        "sessionId": "s1",
        "type": "tool_result",
        "payload": {"command": "cargo build", "exitCode": 101, "stderr": "error[E0425]"}
    });
    std::fs::write(dir.path().join("s1.jsonl"), format!("{line}\nnot json\n")).expect("write");

    let mut config = EvalConfig::default();
    config.ingest.root = Some(dir.path().to_path_buf());
    config.trust.bootstrap_samples = 10;
    evaluate_trajectories(
        &config,
        &HeuristicIssueClassifier::standard(),
        &HarnessTranscriptAdapter,
    )
    .expect("evaluate");

    for stage in [
        "ingest.completed",
        "holdout.split",
        "episodes.extracted",
        "holdout.family_disjoint",
        "pairing.completed",
        "bootstrap.completed",
        "gate.evaluated",
        "files_scanned=",
    ] {
        assert!(logs_contain(stage), "missing {stage}");
    }
}
