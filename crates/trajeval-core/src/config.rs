//! Evaluation configuration loaded from TOML.
//!
//! ```toml
//! [ingest]
//! root = "traces/"
//! format = "auto"
//!
//! [holdout]
//! evalRatio = 0.3
//! minToolResults = 2
//!
//! [pairing]
//! minOccurrencesPerFamily = 2
//! maxWallTimeRatio = 20.0
//!
//! [thresholds]
//! minPairCount = 20
//! minRelativeHarmfulRetryReduction = 0.1
//!
//! [trust]
//! bootstrapSamples = 1000
//! seed = 42
//! ```
//!
//! Every section and field is optional; omitted values take the documented
//! defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bootstrap::TrustOptions;
use crate::domain::{Result, TrajevalError};
use crate::extract::TokenWeights;
use crate::gate::Thresholds;
use crate::holdout::{LongHorizonCriteria, DEFAULT_EVAL_RATIO};
use crate::ingest::IngestOptions;
use crate::pairing::PairingOptions;
use crate::swebench::{
    SweBenchOptions, CONTAMINATION_POLICY_VERSION, DEFAULT_CONTAMINATION_PATTERNS,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestConfig {
    /// Trace root; usually supplied on the command line.
    pub root: Option<PathBuf>,
    #[serde(flatten)]
    pub options: IngestOptions,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HoldoutConfig {
    pub enabled: bool,
    /// Requested eval ratio; clamped to `[0.05, 0.95]` when applied.
    pub eval_ratio: f64,
    /// Drop eval episodes whose family also occurs in train.
    pub family_disjoint: bool,
    #[serde(flatten)]
    pub criteria: LongHorizonCriteria,
}

impl Default for HoldoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            eval_ratio: DEFAULT_EVAL_RATIO,
            family_disjoint: true,
            criteria: LongHorizonCriteria::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct StratifyConfig {
    pub enabled: bool,
    /// Also bootstrap each stratum (with derived seeds).
    pub bootstrap: bool,
}

impl Default for StratifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bootstrap: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SweBenchConfig {
    #[serde(flatten)]
    pub options: SweBenchOptions,
    pub contamination_policy_version: String,
    pub contamination_patterns: Vec<String>,
}

impl Default for SweBenchConfig {
    fn default() -> Self {
        Self {
            options: SweBenchOptions::default(),
            contamination_policy_version: CONTAMINATION_POLICY_VERSION.to_string(),
            contamination_patterns: DEFAULT_CONTAMINATION_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

/// Complete evaluation configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvalConfig {
    pub ingest: IngestConfig,
    pub holdout: HoldoutConfig,
    pub pairing: PairingOptions,
    pub thresholds: Thresholds,
    pub trust: TrustOptions,
    pub tokens: TokenWeights,
    pub stratify: StratifyConfig,
    pub swebench: SweBenchConfig,
}

fn invalid(msg: impl Into<String>) -> TrajevalError {
    TrajevalError::InvalidConfiguration(msg.into())
}

fn check_ratio_bound(name: &str, bound: Option<f64>) -> Result<()> {
    match bound {
        Some(v) if !v.is_finite() || v < 1.0 => {
            Err(invalid(format!("pairing.{name} must be >= 1, got {v}")))
        }
        _ => Ok(()),
    }
}

impl EvalConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(event = "config.loaded", path = %path.display());
        Ok(config)
    }

    /// Reject values no evaluation could run with. Called before any I/O.
    pub fn validate(&self) -> Result<()> {
        // Finite ratios are clamped into [0.05, 0.95] by the holdout split.
        let ratio = self.holdout.eval_ratio;
        if !ratio.is_finite() {
            return Err(invalid(format!("holdout.evalRatio must be finite, got {ratio}")));
        }
        let c = &self.holdout.criteria;
        if c.min_duration_ms < 0 || !c.min_total_latency_ms.is_finite() || c.min_total_latency_ms < 0.0 {
            return Err(invalid("holdout criteria must be non-negative"));
        }
        if self.pairing.min_occurrences_per_family < 2 {
            return Err(invalid(format!(
                "pairing.minOccurrencesPerFamily must be >= 2, got {}",
                self.pairing.min_occurrences_per_family
            )));
        }
        check_ratio_bound("maxWallTimeRatio", self.pairing.max_wall_time_ratio)?;
        check_ratio_bound("maxTokenCountRatio", self.pairing.max_token_count_ratio)?;

        let level = self.trust.confidence_level;
        if !level.is_finite() || level <= 0.0 || level >= 1.0 {
            return Err(invalid(format!(
                "trust.confidenceLevel must be in (0, 1), got {level}"
            )));
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("minRelativeHarmfulRetryReduction", t.min_relative_harmful_retry_reduction),
            ("minRelativeRetryReduction", t.min_relative_retry_reduction),
            ("minRelativeWallTimeReduction", t.min_relative_wall_time_reduction),
            ("minRelativeTokenCountReduction", t.min_relative_token_count_reduction),
            ("minRecoverySuccessRateOn", t.min_recovery_success_rate_on),
            ("maxRecoverySuccessDrop", t.max_recovery_success_drop),
            ("minJudgeableCoverage", t.min_judgeable_coverage),
        ] {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(invalid(format!("thresholds.{name} must be finite")));
            }
        }

        let w = &self.tokens;
        if [w.input_uncached, w.input_cached, w.cache_write, w.output, w.thinking, w.usd_per_proxy_token]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(invalid("token weights must be finite and non-negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::TraceFormat;

    #[test]
    fn test_empty_document_is_all_defaults() {
        let config = EvalConfig::from_toml_str("").expect("parse");
        assert_eq!(config, EvalConfig::default());
        assert_eq!(config.thresholds.min_pair_count, 20);
        assert_eq!(config.holdout.eval_ratio, 0.3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = EvalConfig::from_toml_str(
            r#"
            [ingest]
            root = "traces"
            format = "transcript"
            toolName = "claude"

            [holdout]
            evalRatio = 0.5
            minToolResults = 3

            [pairing]
            requireCrossSession = false
            maxTokenCountRatio = 50.0

            [thresholds]
            minPairCount = 5
            minRelativeWallTimeReduction = 0.2

            [trust]
            seed = 9
            "#,
        )
        .expect("parse");
        assert_eq!(config.ingest.root, Some(PathBuf::from("traces")));
        assert_eq!(config.ingest.options.format, TraceFormat::Transcript);
        assert_eq!(config.ingest.options.tool_name, "claude");
        assert_eq!(config.holdout.eval_ratio, 0.5);
        assert_eq!(config.holdout.criteria.min_tool_results, 3);
        assert!(!config.pairing.require_cross_session);
        assert_eq!(config.pairing.max_token_count_ratio, Some(50.0));
        assert_eq!(config.pairing.max_wall_time_ratio, Some(20.0));
        assert_eq!(config.thresholds.min_pair_count, 5);
        assert_eq!(config.thresholds.min_relative_wall_time_reduction, Some(0.2));
        assert_eq!(config.trust.seed, 9);
        assert_eq!(config.trust.bootstrap_samples, 1000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EvalConfig::default();
        config.holdout.eval_ratio = f64::NAN;
        assert!(matches!(config.validate(), Err(TrajevalError::InvalidConfiguration(_))));

        let mut config = EvalConfig::default();
        config.pairing.min_occurrences_per_family = 1;
        assert!(matches!(config.validate(), Err(TrajevalError::InvalidConfiguration(_))));

        let mut config = EvalConfig::default();
        config.trust.confidence_level = 1.0;
        assert!(matches!(config.validate(), Err(TrajevalError::InvalidConfiguration(_))));

        let mut config = EvalConfig::default();
        config.pairing.max_wall_time_ratio = Some(0.5);
        assert!(matches!(config.validate(), Err(TrajevalError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_out_of_range_eval_ratio_is_clamped_not_rejected() {
        for ratio in [-1.0, 0.0, 1.0, 1.5] {
            let mut config = EvalConfig::default();
            config.holdout.eval_ratio = ratio;
            assert!(config.validate().is_ok(), "ratio {ratio} rejected");
        }
        assert_eq!(crate::holdout::clamp_eval_ratio(1.5), 0.95);
        assert_eq!(crate::holdout::clamp_eval_ratio(-1.0), 0.05);
    }

    #[test]
    fn test_malformed_toml_is_config_parse_error() {
        let err = EvalConfig::from_toml_str("[pairing\n").expect_err("malformed");
        assert!(matches!(err, TrajevalError::ConfigParse(_)));
    }
}
