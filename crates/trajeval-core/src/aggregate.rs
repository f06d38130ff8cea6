//! Aggregate statistics over a pair set.

use serde::{Deserialize, Serialize};

use crate::domain::episode::coverage_ratio;
use crate::pairing::Pair;

/// `(off − on) / off` when `off > 0`; otherwise `0` if `on ≤ 0`, else `−1`.
///
/// The `−1` sentinel marks a regression where the baseline had none.
pub fn relative_reduction(off: f64, on: f64) -> f64 {
    if off > 0.0 {
        (off - on) / off
    } else if on <= 0.0 {
        0.0
    } else {
        -1.0
    }
}

/// Summed metrics for one side (OFF or ON) of a pair set.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SideTotals {
    pub total_retries: u64,
    pub harmful_retries: u64,
    pub benign_retries: u64,
    pub abstained_retries: u64,
    pub wall_time_ms: f64,
    pub token_count: u64,
    pub token_proxy: f64,
    pub cost_usd: f64,
    pub successes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub total_pairs: usize,
    pub totals_off: SideTotals,
    pub totals_on: SideTotals,

    pub retry_rate_off: f64,
    pub retry_rate_on: f64,
    pub harmful_retry_rate_off: f64,
    pub harmful_retry_rate_on: f64,
    pub mean_wall_time_ms_off: f64,
    pub mean_wall_time_ms_on: f64,
    pub mean_token_count_off: f64,
    pub mean_token_count_on: f64,

    pub relative_retry_reduction: f64,
    pub relative_harmful_retry_reduction: f64,
    pub relative_wall_time_reduction: f64,
    pub relative_token_count_reduction: f64,
    pub relative_token_proxy_reduction: f64,
    pub relative_cost_reduction: f64,

    pub recovery_success_rate_off: f64,
    pub recovery_success_rate_on: f64,
    /// `recoverySuccessRateOn − recoverySuccessRateOff`.
    pub recovery_success_delta: f64,

    pub judgeable_coverage_off: f64,
    pub judgeable_coverage_on: f64,

    /// Harmful retries saved in total: `harmfulOff − harmfulOn`.
    pub expected_dead_ends_avoided: f64,
    pub expected_dead_ends_avoided_per_pair: f64,
}

fn per_pair(value: f64, pairs: usize) -> f64 {
    if pairs == 0 {
        0.0
    } else {
        value / pairs as f64
    }
}

/// Reduce a pair set to [`AggregateStats`].
///
/// Accepts any iterator of pair references so resamples can be aggregated
/// without cloning.
pub fn aggregate<'a, I>(pairs: I) -> AggregateStats
where
    I: IntoIterator<Item = &'a Pair>,
{
    let mut n = 0usize;
    let mut off = SideTotals::default();
    let mut on = SideTotals::default();

    for p in pairs {
        n += 1;
        off.total_retries += p.total_retries_off;
        on.total_retries += p.total_retries_on;
        off.harmful_retries += p.harmful_retries_off;
        on.harmful_retries += p.harmful_retries_on;
        off.benign_retries += p.benign_retries_off;
        on.benign_retries += p.benign_retries_on;
        off.abstained_retries += p.abstained_retries_off;
        on.abstained_retries += p.abstained_retries_on;
        off.wall_time_ms += p.wall_time_ms_off;
        on.wall_time_ms += p.wall_time_ms_on;
        off.token_count = off.token_count.saturating_add(p.token_count_off);
        on.token_count = on.token_count.saturating_add(p.token_count_on);
        off.token_proxy += p.token_proxy_off;
        on.token_proxy += p.token_proxy_on;
        off.cost_usd += p.cost_usd_off;
        on.cost_usd += p.cost_usd_on;
        off.successes += usize::from(p.success_off);
        on.successes += usize::from(p.success_on);
    }

    let recovery_off = per_pair(off.successes as f64, n);
    let recovery_on = per_pair(on.successes as f64, n);
    let dead_ends = off.harmful_retries as f64 - on.harmful_retries as f64;

    AggregateStats {
        total_pairs: n,
        retry_rate_off: per_pair(off.total_retries as f64, n),
        retry_rate_on: per_pair(on.total_retries as f64, n),
        harmful_retry_rate_off: per_pair(off.harmful_retries as f64, n),
        harmful_retry_rate_on: per_pair(on.harmful_retries as f64, n),
        mean_wall_time_ms_off: per_pair(off.wall_time_ms, n),
        mean_wall_time_ms_on: per_pair(on.wall_time_ms, n),
        mean_token_count_off: per_pair(off.token_count as f64, n),
        mean_token_count_on: per_pair(on.token_count as f64, n),
        relative_retry_reduction: relative_reduction(
            off.total_retries as f64,
            on.total_retries as f64,
        ),
        relative_harmful_retry_reduction: relative_reduction(
            off.harmful_retries as f64,
            on.harmful_retries as f64,
        ),
        relative_wall_time_reduction: relative_reduction(off.wall_time_ms, on.wall_time_ms),
        relative_token_count_reduction: relative_reduction(
            off.token_count as f64,
            on.token_count as f64,
        ),
        relative_token_proxy_reduction: relative_reduction(off.token_proxy, on.token_proxy),
        relative_cost_reduction: relative_reduction(off.cost_usd, on.cost_usd),
        recovery_success_rate_off: recovery_off,
        recovery_success_rate_on: recovery_on,
        recovery_success_delta: recovery_on - recovery_off,
        judgeable_coverage_off: coverage_ratio(off.total_retries, off.abstained_retries),
        judgeable_coverage_on: coverage_ratio(on.total_retries, on.abstained_retries),
        expected_dead_ends_avoided: dead_ends,
        expected_dead_ends_avoided_per_pair: per_pair(dead_ends, n),
        totals_off: off,
        totals_on: on,
    }
}
