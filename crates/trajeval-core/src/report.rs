//! Report boundary: schema stamping, persistence and markdown rendering.
//!
//! The engine returns plain evaluations; this layer adds `schemaVersion` and
//! `generatedAtUtc` and writes `<name>.json` next to `<name>.digest`
//! (SHA-256 of the JSON bytes, lowercase hex).

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::aggregate::AggregateStats;
use crate::bootstrap::{Interval, TrustSummary};
use crate::domain::{Result, TrajevalError};
use crate::gate::GateResult;
use crate::obs;
use crate::pipeline::{SweBenchEvaluation, TrajectoryEvaluation};
use crate::stratify::Stratification;

/// Bumped on any breaking change to the report shape.
pub const SCHEMA_VERSION: &str = "trajeval.report.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Report<T> {
    pub schema_version: String,
    pub generated_at_utc: DateTime<Utc>,
    #[serde(flatten)]
    pub body: T,
}

pub type TrajectoryReport = Report<TrajectoryEvaluation>;
pub type SweBenchReport = Report<SweBenchEvaluation>;

impl<T> Report<T> {
    /// Stamp an evaluation with the current schema version and time.
    pub fn stamp(body: T) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at_utc: Utc::now(),
            body,
        }
    }
}

/// Fail unless `actual` is the schema version this build understands.
pub fn check_schema_version(actual: &str) -> Result<()> {
    if actual != SCHEMA_VERSION {
        return Err(TrajevalError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Sidecar path holding the digest of `path`.
pub fn digest_path(path: &Path) -> PathBuf {
    path.with_extension("digest")
}

/// Persist the report as pretty JSON plus its digest sidecar.
pub fn write_report_json<T: Serialize>(path: &Path, report: &Report<T>) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(report)?;
    let digest = content_digest(&json);

    std::fs::write(path, &json)?;
    std::fs::write(digest_path(path), digest.as_bytes())?;

    obs::emit_report_written(path, &digest);
    Ok(path.to_path_buf())
}

/// Read a report back, verifying its digest and schema version.
pub fn read_report_json<T: DeserializeOwned>(path: &Path) -> Result<Report<T>> {
    let json = std::fs::read(path)?;
    let expected = std::fs::read_to_string(digest_path(path))?;
    let actual = content_digest(&json);
    if expected.trim() != actual {
        return Err(TrajevalError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    let report: Report<T> = serde_json::from_slice(&json)?;
    check_schema_version(&report.schema_version)?;
    Ok(report)
}

// ---------------------------------------------------------------------------
// Markdown
// ---------------------------------------------------------------------------

/// What the markdown renderer needs from an evaluation.
pub trait ReportBody {
    fn title(&self) -> &'static str;
    fn trace_root(&self) -> &Path;
    fn aggregate(&self) -> &AggregateStats;
    fn trust_summary(&self) -> &TrustSummary;
    fn gate_result(&self) -> &GateResult;
    fn strata(&self) -> Option<&[Stratification]>;
    /// Lane-specific bullet lines shown under the header.
    fn lane_lines(&self) -> Vec<String>;
}

impl ReportBody for TrajectoryEvaluation {
    fn title(&self) -> &'static str {
        "Trajectory Evaluation"
    }
    fn trace_root(&self) -> &Path {
        &self.trace_root
    }
    fn aggregate(&self) -> &AggregateStats {
        &self.aggregate
    }
    fn trust_summary(&self) -> &TrustSummary {
        &self.trust_summary
    }
    fn gate_result(&self) -> &GateResult {
        &self.gate_result
    }
    fn strata(&self) -> Option<&[Stratification]> {
        self.strata.as_deref()
    }
    fn lane_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!(
                "sessions: {} ({} train / {} eval)",
                self.files.sessions, self.holdout.train_sessions, self.holdout.eval_sessions
            ),
            format!(
                "episodes: {} train / {} eval",
                self.train_episode_count, self.eval_episode_count
            ),
        ];
        if let Some(slice) = &self.family_disjoint {
            lines.push(format!(
                "family-disjoint slice dropped {} eval episodes ({} families)",
                slice.removed_episode_count, slice.removed_eval_family_count
            ));
        }
        lines.push(format!(
            "families: {} seen, {} eligible",
            self.pairing_diagnostics.families_seen, self.pairing_diagnostics.families_eligible
        ));
        lines
    }
}

impl ReportBody for SweBenchEvaluation {
    fn title(&self) -> &'static str {
        "SWE-bench Evaluation"
    }
    fn trace_root(&self) -> &Path {
        &self.trace_root
    }
    fn aggregate(&self) -> &AggregateStats {
        &self.aggregate
    }
    fn trust_summary(&self) -> &TrustSummary {
        &self.trust_summary
    }
    fn gate_result(&self) -> &GateResult {
        &self.gate_result
    }
    fn strata(&self) -> Option<&[Stratification]> {
        self.strata.as_deref()
    }
    fn lane_lines(&self) -> Vec<String> {
        let d = &self.diagnostics;
        vec![
            format!(
                "sessions: {} ({} unparsable ids)",
                d.sessions_seen,
                d.unparsable_session_ids.len()
            ),
            format!(
                "contaminated: {} (policy {})",
                d.contaminated_sessions, d.contamination_policy
            ),
            format!(
                "pairs: {} built, {} qualified ({} censored off, {} censored on)",
                d.pairs_built, d.qualified_pairs, d.censored_off, d.censored_on
            ),
        ]
    }
}

fn pct(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

fn interval(i: &Interval) -> String {
    format!("[{}, {}]", pct(i.low), pct(i.high))
}

/// Short markdown summary for PR comments and terminals.
pub fn render_report_md<T: ReportBody>(report: &Report<T>) -> String {
    let body = &report.body;
    let agg = body.aggregate();
    let trust = body.trust_summary();
    let gate = body.gate_result();

    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", body.title());
    let _ = writeln!(out, "- schema: `{}`", report.schema_version);
    let _ = writeln!(
        out,
        "- generated: {}",
        report.generated_at_utc.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    let _ = writeln!(out, "- trace root: `{}`", body.trace_root().display());
    for line in body.lane_lines() {
        let _ = writeln!(out, "- {line}");
    }
    let _ = writeln!(out, "- pairs: {}", agg.total_pairs);
    let _ = writeln!(out, "- gate: {}\n", if gate.pass { "PASS" } else { "FAIL" });

    if !gate.failures.is_empty() {
        out.push_str("## Gate Failures\n");
        for failure in &gate.failures {
            let _ = writeln!(out, "- {failure}");
        }
        out.push('\n');
    }

    let level = pct(trust.confidence_level);
    out.push_str("## Effect\n");
    let _ = writeln!(out, "| metric | off | on | reduction | {level} CI |");
    out.push_str("|---|---|---|---|---|\n");
    let _ = writeln!(
        out,
        "| harmful retries | {} | {} | {} | {} |",
        agg.totals_off.harmful_retries,
        agg.totals_on.harmful_retries,
        pct(agg.relative_harmful_retry_reduction),
        interval(&trust.relative_harmful_retry_reduction)
    );
    let _ = writeln!(
        out,
        "| retries | {} | {} | {} | {} |",
        agg.totals_off.total_retries,
        agg.totals_on.total_retries,
        pct(agg.relative_retry_reduction),
        interval(&trust.relative_retry_reduction)
    );
    let _ = writeln!(
        out,
        "| mean wall time (ms) | {:.0} | {:.0} | {} | {} |",
        agg.mean_wall_time_ms_off,
        agg.mean_wall_time_ms_on,
        pct(agg.relative_wall_time_reduction),
        interval(&trust.relative_wall_time_reduction)
    );
    let _ = writeln!(
        out,
        "| mean tokens | {:.0} | {:.0} | {} | {} |",
        agg.mean_token_count_off,
        agg.mean_token_count_on,
        pct(agg.relative_token_count_reduction),
        interval(&trust.relative_token_count_reduction)
    );
    let _ = writeln!(
        out,
        "| recovery success | {} | {} | {:+.1}pp | {} |",
        pct(agg.recovery_success_rate_off),
        pct(agg.recovery_success_rate_on),
        agg.recovery_success_delta * 100.0,
        interval(&trust.recovery_success_delta)
    );
    let _ = writeln!(
        out,
        "\nDead ends avoided: {:.0} ({:.2} per pair).",
        agg.expected_dead_ends_avoided, agg.expected_dead_ends_avoided_per_pair
    );

    if let Some(strata) = body.strata() {
        out.push_str("\n## Strata\n");
        for stratification in strata {
            let _ = writeln!(out, "### {}", stratification.dimension.as_str());
            for group in &stratification.groups {
                let _ = writeln!(
                    out,
                    "- `{}`: {} pairs, {} episodes, harmful reduction {}, gate {}",
                    group.key,
                    group.pair_count,
                    group.episode_count,
                    pct(group.aggregate.relative_harmful_retry_reduction),
                    if group.gate_result.pass { "pass" } else { "fail" }
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluation() -> TrajectoryEvaluation {
        TrajectoryEvaluation {
            trace_root: PathBuf::from("traces"),
            format: Default::default(),
            tool_name: "claude".to_string(),
            classifier_policy: "heuristic-v1".to_string(),
            files: Default::default(),
            holdout: Default::default(),
            family_disjoint: None,
            train_episode_count: 3,
            eval_episode_count: 4,
            thresholds: Default::default(),
            pairing: Default::default(),
            pairing_diagnostics: Default::default(),
            aggregate: AggregateStats {
                total_pairs: 2,
                relative_harmful_retry_reduction: 1.0,
                ..AggregateStats::default()
            },
            trust_summary: Default::default(),
            strata: None,
            gate_result: GateResult {
                pass: false,
                failures: vec!["insufficient evidence: 2 pairs < required 20".to_string()],
            },
            pairs: Vec::new(),
        }
    }

    fn fixed_report() -> TrajectoryReport {
        Report {
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at_utc: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .expect("parse RFC3339")
                .with_timezone(&Utc),
            body: evaluation(),
        }
    }

    #[test]
    fn test_report_schema_has_flat_top_level_keys() {
        let raw = serde_json::to_value(fixed_report()).expect("serialize");
        let obj = raw.as_object().expect("object");
        for key in [
            "schemaVersion",
            "generatedAtUtc",
            "traceRoot",
            "format",
            "toolName",
            "files",
            "holdout",
            "trainEpisodeCount",
            "evalEpisodeCount",
            "thresholds",
            "pairing",
            "pairingDiagnostics",
            "aggregate",
            "trustSummary",
            "gateResult",
        ] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert!(!obj.contains_key("strata"));
        assert_eq!(raw["schemaVersion"], json!("trajeval.report.v1"));
        assert_eq!(raw["aggregate"]["totalPairs"], json!(2));
        assert_eq!(raw["gateResult"]["pass"], json!(false));
    }

    #[test]
    fn test_written_report_reads_back_with_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out").join("report.json");
        let report = fixed_report();

        let written = write_report_json(&path, &report).expect("write");
        assert_eq!(written, path);
        let digest = std::fs::read_to_string(dir.path().join("out").join("report.digest"))
            .expect("digest sidecar");
        assert_eq!(digest.len(), 64);

        let back: TrajectoryReport = read_report_json(&path).expect("read");
        assert_eq!(back, report);
    }

    #[test]
    fn test_tampered_report_is_digest_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.json");
        write_report_json(&path, &fixed_report()).expect("write");

        let tampered = std::fs::read_to_string(&path)
            .expect("read")
            .replace("\"totalPairs\": 2", "\"totalPairs\": 200");
        std::fs::write(&path, tampered).expect("rewrite");

        let err = read_report_json::<TrajectoryEvaluation>(&path).expect_err("tampered");
        assert!(matches!(err, TrajevalError::DigestMismatch { .. }));
    }

    #[test]
    fn test_foreign_schema_version_is_rejected() {
        assert!(check_schema_version(SCHEMA_VERSION).is_ok());
        let err = check_schema_version("trajeval.report.v0").expect_err("old schema");
        assert!(matches!(err, TrajevalError::SchemaVersionMismatch { .. }));

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.json");
        let mut report = fixed_report();
        report.schema_version = "trajeval.report.v0".to_string();
        write_report_json(&path, &report).expect("write");
        let err = read_report_json::<TrajectoryEvaluation>(&path).expect_err("old schema");
        assert!(matches!(err, TrajevalError::SchemaVersionMismatch { .. }));
    }

    #[test]
    fn test_markdown_lists_gate_failures_and_effect() {
        let md = render_report_md(&fixed_report());
        assert!(md.starts_with("# Trajectory Evaluation\n\n"));
        assert!(md.contains("- generated: 2026-01-01T00:00:00Z\n"));
        assert!(md.contains("- gate: FAIL\n"));
        assert!(md.contains("## Gate Failures\n- insufficient evidence: 2 pairs < required 20\n"));
        assert!(md.contains("| harmful retries | 0 | 0 | 100.0% | [0.0%, 0.0%] |"));
        assert!(!md.contains("## Strata"));
    }
}
