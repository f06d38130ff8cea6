//! Evidence gate.
//!
//! Evaluates [`AggregateStats`] against [`Thresholds`] to produce a
//! [`GateResult`]: the pass/fail decision plus one human-readable reason per
//! violated threshold. Weak evidence is reported here, never raised as an
//! error.

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateStats;

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Floors and ceilings the aggregate must respect. `None` disables a floor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Thresholds {
    pub min_pair_count: usize,
    pub min_relative_harmful_retry_reduction: Option<f64>,
    pub min_relative_retry_reduction: Option<f64>,
    pub min_relative_wall_time_reduction: Option<f64>,
    pub min_relative_token_count_reduction: Option<f64>,
    pub min_recovery_success_rate_on: Option<f64>,
    /// Largest tolerated `recoverySuccessRateOff − recoverySuccessRateOn`.
    pub max_recovery_success_drop: Option<f64>,
    /// Applied to both the OFF and the ON side.
    pub min_judgeable_coverage: Option<f64>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_pair_count: 20,
            min_relative_harmful_retry_reduction: Some(0.10),
            min_relative_retry_reduction: None,
            min_relative_wall_time_reduction: None,
            min_relative_token_count_reduction: None,
            min_recovery_success_rate_on: Some(0.0),
            max_recovery_success_drop: Some(0.05),
            min_judgeable_coverage: Some(0.5),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// A single gate check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateRule {
    MinPairCount,
    MinRelativeHarmfulRetryReduction,
    MinRelativeRetryReduction,
    MinRelativeWallTimeReduction,
    MinRelativeTokenCountReduction,
    MinRecoverySuccessRateOn,
    MaxRecoverySuccessDrop,
    MinJudgeableCoverageOff,
    MinJudgeableCoverageOn,
}

impl GateRule {
    /// Every rule, in evaluation order.
    pub const ALL: [GateRule; 9] = [
        GateRule::MinPairCount,
        GateRule::MinRelativeHarmfulRetryReduction,
        GateRule::MinRelativeRetryReduction,
        GateRule::MinRelativeWallTimeReduction,
        GateRule::MinRelativeTokenCountReduction,
        GateRule::MinRecoverySuccessRateOn,
        GateRule::MaxRecoverySuccessDrop,
        GateRule::MinJudgeableCoverageOff,
        GateRule::MinJudgeableCoverageOn,
    ];
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GateResult {
    pub pass: bool,
    /// One reason per violated threshold (empty when passed).
    pub failures: Vec<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Evaluate every rule; never fails.
pub fn evaluate_gate(thresholds: &Thresholds, stats: &AggregateStats) -> GateResult {
    let failures: Vec<String> = GateRule::ALL
        .iter()
        .filter_map(|rule| check_rule(*rule, thresholds, stats))
        .collect();
    GateResult {
        pass: failures.is_empty(),
        failures,
    }
}

fn floor(label: &str, value: f64, min: Option<f64>) -> Option<String> {
    let min = min?;
    (value < min).then(|| format!("{label} {value:.4} < required {min:.4}"))
}

fn check_rule(rule: GateRule, t: &Thresholds, s: &AggregateStats) -> Option<String> {
    match rule {
        GateRule::MinPairCount => (s.total_pairs < t.min_pair_count).then(|| {
            format!(
                "insufficient evidence: {} pairs < required {}",
                s.total_pairs, t.min_pair_count
            )
        }),
        GateRule::MinRelativeHarmfulRetryReduction => floor(
            "relative harmful-retry reduction",
            s.relative_harmful_retry_reduction,
            t.min_relative_harmful_retry_reduction,
        ),
        GateRule::MinRelativeRetryReduction => floor(
            "relative retry reduction",
            s.relative_retry_reduction,
            t.min_relative_retry_reduction,
        ),
        GateRule::MinRelativeWallTimeReduction => floor(
            "relative wall-time reduction",
            s.relative_wall_time_reduction,
            t.min_relative_wall_time_reduction,
        ),
        GateRule::MinRelativeTokenCountReduction => floor(
            "relative token-count reduction",
            s.relative_token_count_reduction,
            t.min_relative_token_count_reduction,
        ),
        GateRule::MinRecoverySuccessRateOn => floor(
            "recovery success rate (on)",
            s.recovery_success_rate_on,
            t.min_recovery_success_rate_on,
        ),
        GateRule::MaxRecoverySuccessDrop => {
            let max = t.max_recovery_success_drop?;
            let drop = s.recovery_success_rate_off - s.recovery_success_rate_on;
            (drop > max).then(|| {
                format!(
                    "recovery success drop {drop:.4} > allowed {max:.4} (off {:.4} → on {:.4})",
                    s.recovery_success_rate_off, s.recovery_success_rate_on
                )
            })
        }
        GateRule::MinJudgeableCoverageOff => floor(
            "judgeable coverage (off)",
            s.judgeable_coverage_off,
            t.min_judgeable_coverage,
        ),
        GateRule::MinJudgeableCoverageOn => floor(
            "judgeable coverage (on)",
            s.judgeable_coverage_on,
            t.min_judgeable_coverage,
        ),
    }
}
