//! Paired bootstrap confidence intervals.
//!
//! Resamples the pair list with replacement and recomputes the headline
//! metrics per resample. The random source is always explicit: callers either
//! inject one or pass a seed, so identical inputs give identical intervals.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::aggregate::{aggregate, AggregateStats};
use crate::pairing::Pair;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrustOptions {
    pub bootstrap_samples: usize,
    pub confidence_level: f64,
    pub seed: u64,
}

impl Default for TrustOptions {
    fn default() -> Self {
        Self {
            bootstrap_samples: 1000,
            confidence_level: 0.95,
            seed: 42,
        }
    }
}

/// Lower tail, median and upper tail of a bootstrap distribution.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Interval {
    pub low: f64,
    pub median: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrustSummary {
    pub bootstrap_samples: usize,
    pub confidence_level: f64,
    pub seed: u64,
    pub pair_count: usize,
    pub relative_harmful_retry_reduction: Interval,
    pub relative_retry_reduction: Interval,
    pub relative_wall_time_reduction: Interval,
    pub relative_token_count_reduction: Interval,
    pub expected_dead_ends_avoided_per_pair: Interval,
    pub recovery_success_delta: Interval,
}

/// Linear-interpolation percentile over an ascending slice; `p` in `[0, 1]`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

fn interval(mut samples: Vec<f64>, confidence_level: f64) -> Interval {
    samples.sort_by(f64::total_cmp);
    let tail = (1.0 - confidence_level.clamp(0.0, 1.0)) / 2.0;
    Interval {
        low: percentile(&samples, tail),
        median: percentile(&samples, 0.5),
        high: percentile(&samples, 1.0 - tail),
    }
}

struct MetricSamples {
    harmful: Vec<f64>,
    retries: Vec<f64>,
    wall_time: Vec<f64>,
    tokens: Vec<f64>,
    dead_ends: Vec<f64>,
    recovery: Vec<f64>,
}

impl MetricSamples {
    fn with_capacity(n: usize) -> Self {
        Self {
            harmful: Vec::with_capacity(n),
            retries: Vec::with_capacity(n),
            wall_time: Vec::with_capacity(n),
            tokens: Vec::with_capacity(n),
            dead_ends: Vec::with_capacity(n),
            recovery: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, stats: &AggregateStats) {
        self.harmful.push(stats.relative_harmful_retry_reduction);
        self.retries.push(stats.relative_retry_reduction);
        self.wall_time.push(stats.relative_wall_time_reduction);
        self.tokens.push(stats.relative_token_count_reduction);
        self.dead_ends.push(stats.expected_dead_ends_avoided_per_pair);
        self.recovery.push(stats.recovery_success_delta);
    }
}

/// Bootstrap with a caller-supplied random source.
pub fn bootstrap_confidence_intervals_with_rng<R: Rng>(
    pairs: &[Pair],
    options: &TrustOptions,
    rng: &mut R,
) -> TrustSummary {
    let mut summary = TrustSummary {
        bootstrap_samples: options.bootstrap_samples,
        confidence_level: options.confidence_level,
        seed: options.seed,
        pair_count: pairs.len(),
        ..TrustSummary::default()
    };
    if pairs.is_empty() || options.bootstrap_samples == 0 {
        return summary;
    }

    let n = pairs.len();
    let mut samples = MetricSamples::with_capacity(options.bootstrap_samples);
    let mut indices = vec![0usize; n];
    for _ in 0..options.bootstrap_samples {
        for slot in indices.iter_mut() {
            *slot = rng.gen_range(0..n);
        }
        samples.push(&aggregate(indices.iter().map(|&i| &pairs[i])));
    }

    let c = options.confidence_level;
    summary.relative_harmful_retry_reduction = interval(samples.harmful, c);
    summary.relative_retry_reduction = interval(samples.retries, c);
    summary.relative_wall_time_reduction = interval(samples.wall_time, c);
    summary.relative_token_count_reduction = interval(samples.tokens, c);
    summary.expected_dead_ends_avoided_per_pair = interval(samples.dead_ends, c);
    summary.recovery_success_delta = interval(samples.recovery, c);
    summary
}

/// Bootstrap seeded from `options.seed`.
pub fn bootstrap_confidence_intervals(pairs: &[Pair], options: &TrustOptions) -> TrustSummary {
    let mut rng = StdRng::seed_from_u64(options.seed);
    bootstrap_confidence_intervals_with_rng(pairs, options, &mut rng)
}

/// Independent seed for one stratum: `seed ^ first8(sha256(key))`.
pub fn derive_stratum_seed(seed: u64, stratum_key: &str) -> u64 {
    let digest = Sha256::digest(stratum_key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    seed ^ u64::from_be_bytes(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pair(off: u64, on: u64) -> Pair {
        let now = Utc::now();
        Pair {
            family_signature: "f".to_string(),
            tool_surface: "other".to_string(),
            model: "unknown".to_string(),
            off_episode_id: "a#0".to_string(),
            on_episode_id: "b#0".to_string(),
            off_session_id: "a".to_string(),
            on_session_id: "b".to_string(),
            off_started_at: now,
            on_started_at: now,
            total_retries_off: off + 1,
            total_retries_on: on + 1,
            harmful_retries_off: off,
            harmful_retries_on: on,
            benign_retries_off: 0,
            benign_retries_on: 0,
            abstained_retries_off: 0,
            abstained_retries_on: 0,
            wall_time_ms_off: off as f64 * 100.0,
            wall_time_ms_on: on as f64 * 100.0,
            token_count_off: off * 10,
            token_count_on: on * 10,
            token_proxy_off: 0.0,
            token_proxy_on: 0.0,
            cost_usd_off: 0.0,
            cost_usd_on: 0.0,
            success_off: off % 2 == 0,
            success_on: true,
        }
    }

    fn sample_pairs() -> Vec<Pair> {
        vec![pair(4, 1), pair(2, 2), pair(6, 0), pair(3, 1), pair(1, 3)]
    }

    #[test]
    fn test_same_seed_same_intervals() {
        let options = TrustOptions {
            bootstrap_samples: 200,
            confidence_level: 0.9,
            seed: 7,
        };
        let a = bootstrap_confidence_intervals(&sample_pairs(), &options);
        let b = bootstrap_confidence_intervals(&sample_pairs(), &options);
        assert_eq!(a, b);
        let r = a.relative_harmful_retry_reduction;
        assert!(r.low <= r.median && r.median <= r.high);
    }

    #[test]
    fn test_injected_rng_matches_seeded_entry() {
        let options = TrustOptions::default();
        let mut rng = StdRng::seed_from_u64(options.seed);
        let injected = bootstrap_confidence_intervals_with_rng(&sample_pairs(), &options, &mut rng);
        assert_eq!(injected, bootstrap_confidence_intervals(&sample_pairs(), &options));
    }

    #[test]
    fn test_empty_pairs_yield_zero_intervals() {
        let summary = bootstrap_confidence_intervals(&[], &TrustOptions::default());
        assert_eq!(summary.pair_count, 0);
        assert_eq!(summary.relative_retry_reduction, Interval::default());
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 1.0), 4.0);
        assert_eq!(percentile(&v, 0.5), 2.5);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_stratum_seeds_differ_by_key() {
        assert_ne!(derive_stratum_seed(42, "model=a"), derive_stratum_seed(42, "model=b"));
        assert_eq!(derive_stratum_seed(42, "x"), derive_stratum_seed(42, "x"));
    }
}
