//! Sustained memory growth detection

use crate::config::CollectionConfig;
use crate::events::{RegressionSeverity, Timestamp};
use serde::{Deserialize, Serialize};

const LEAK_MITIGATION_STEPS: [&str; 4] = [
    "Check for event listeners and callbacks that are never released",
    "Verify that components release their resources on teardown",
    "Monitor large object allocations",
    "Review caching strategies and cache eviction limits",
];

/// A flagged period of sustained memory growth
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryLeak {
    pub id: String,
    pub component: String,
    pub severity: RegressionSeverity,
    pub growth_mb: f64,
    pub growth_ratio: f64,
    pub growth_rate_mb_per_min: f64,
    /// Share of consecutive sample pairs that did not decrease
    pub monotonic_ratio: f64,
    pub current_size_mb: f64,
    pub max_size_mb: f64,
    pub sample_count: usize,
    pub detected_at: Timestamp,
    pub resolved: bool,
    pub mitigation_steps: Vec<String>,
}

/// Look for sustained growth in a time-ordered memory series
///
/// Only the most recent `leak_window` readings are considered, and at least
/// `leak_min_samples` of them are required. Growth has to be large (absolute
/// or relative) and steady: noisy spikes with many decreasing pairs are not
/// reported.
///
/// # Arguments
///
/// * `series` - `(timestamp, megabytes)` readings, oldest first
/// * `config` - Leak thresholds
/// * `now` - Detection time stamped on the result
pub fn detect_leak(
    series: &[(Timestamp, f64)],
    config: &CollectionConfig,
    now: Timestamp,
) -> Option<MemoryLeak> {
    let window = &series[series.len().saturating_sub(config.leak_window)..];
    if window.len() < config.leak_min_samples.max(2) {
        return None;
    }

    let (first_at, first) = window[0];
    let (last_at, last) = window[window.len() - 1];
    let growth_mb = last - first;
    if growth_mb <= 0.0 {
        return None;
    }

    let growth_ratio = if first > 0.0 { growth_mb / first } else { 0.0 };
    let non_decreasing = window.windows(2).filter(|pair| pair[1].1 >= pair[0].1).count();
    let monotonic_ratio = non_decreasing as f64 / (window.len() - 1) as f64;

    let large = growth_mb >= config.leak_min_growth_mb || growth_ratio >= config.leak_min_growth_ratio;
    if !large || monotonic_ratio < config.leak_min_monotonic_ratio {
        return None;
    }

    let elapsed_minutes = last_at.signed_duration_since(first_at).num_milliseconds() as f64 / 60_000.0;
    let growth_rate_mb_per_min = growth_mb / elapsed_minutes.max(1.0 / 60.0);
    let severity = if growth_rate_mb_per_min > 5.0 {
        RegressionSeverity::Severe
    } else if growth_rate_mb_per_min > 2.0 {
        RegressionSeverity::Moderate
    } else {
        RegressionSeverity::Minor
    };

    Some(MemoryLeak {
        id: uuid::Uuid::new_v4().to_string(),
        component: "system".to_string(),
        severity,
        growth_mb,
        growth_ratio,
        growth_rate_mb_per_min,
        monotonic_ratio,
        current_size_mb: last,
        max_size_mb: window.iter().map(|(_, v)| *v).fold(f64::MIN, f64::max),
        sample_count: window.len(),
        detected_at: now,
        resolved: false,
        mitigation_steps: LEAK_MITIGATION_STEPS.iter().map(|s| s.to_string()).collect(),
    })
}
