//! Windowed statistics over metric values

use crate::events::{MetricKind, TimeRange, TrendLabel, TREND_STABLE_BAND_PERCENT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimum number of values before a windowed trend can be non-stable
pub const MIN_TREND_VALUES: usize = 5;

/// Statistics for one metric kind over a time window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KindAggregate {
    pub count: usize,
    pub total: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub trend: TrendLabel,
}

impl KindAggregate {
    /// Aggregate a series given in time order
    ///
    /// Returns `None` for an empty series.
    pub fn from_series(kind: MetricKind, values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let total: f64 = values.iter().sum();
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Some(Self {
            count: values.len(),
            total,
            average: total / values.len() as f64,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p50: percentile(&sorted, 0.5),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            trend: midpoint_trend(kind, values),
        })
    }
}

/// Aggregates for every kind present in a window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricAggregates {
    pub range: TimeRange,
    pub sample_count: usize,
    pub metrics: BTreeMap<MetricKind, KindAggregate>,
}

impl MetricAggregates {
    pub fn get(&self, kind: MetricKind) -> Option<&KindAggregate> {
        self.metrics.get(&kind)
    }
}

/// Percentile by sorted-array indexing: `sorted[floor(n * q)]`
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64) * q).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Compare the means of the two halves of a time-ordered series
///
/// A relative change inside the stable band, a short series, or a zero first
/// half mean all yield `Stable`; otherwise the kind's direction decides.
pub fn midpoint_trend(kind: MetricKind, values: &[f64]) -> TrendLabel {
    if values.len() < MIN_TREND_VALUES {
        return TrendLabel::Stable;
    }

    let midpoint = values.len() / 2;
    let (first, second) = values.split_at(midpoint);
    let first_mean = mean(first);
    let second_mean = mean(second);

    if first_mean == 0.0 {
        return TrendLabel::Stable;
    }

    let change_percent = (second_mean - first_mean) / first_mean.abs() * 100.0;
    if change_percent.abs() < TREND_STABLE_BAND_PERCENT {
        TrendLabel::Stable
    } else {
        kind.direction().label(change_percent)
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_indexing() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 0.5), 51.0);
        assert_eq!(percentile(&sorted, 0.95), 96.0);
        assert_eq!(percentile(&sorted, 0.99), 100.0);
        assert_eq!(percentile(&[7.0], 0.99), 7.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_aggregate_five_response_times() {
        let values = [1000.0, 1100.0, 1200.0, 1300.0, 1400.0];
        let aggregate = KindAggregate::from_series(MetricKind::ResponseTime, &values).unwrap();

        assert_eq!(aggregate.average, 1200.0);
        assert_eq!(aggregate.total, 6000.0);
        assert_eq!(aggregate.min, 1000.0);
        assert_eq!(aggregate.max, 1400.0);
        assert_eq!(aggregate.p50, 1200.0);
        assert_eq!(aggregate.trend, TrendLabel::Degrading);
    }

    #[test]
    fn test_trend_respects_direction() {
        let rising = [100.0, 110.0, 120.0, 130.0, 140.0, 150.0];
        assert_eq!(midpoint_trend(MetricKind::ResponseTime, &rising), TrendLabel::Degrading);
        assert_eq!(midpoint_trend(MetricKind::Throughput, &rising), TrendLabel::Improving);

        let falling: Vec<f64> = rising.iter().rev().copied().collect();
        assert_eq!(midpoint_trend(MetricKind::Fps, &falling), TrendLabel::Degrading);
        assert_eq!(midpoint_trend(MetricKind::MemoryUsage, &falling), TrendLabel::Improving);
    }

    #[test]
    fn test_trend_stable_cases() {
        assert_eq!(
            midpoint_trend(MetricKind::ResponseTime, &[1.0, 100.0, 1000.0]),
            TrendLabel::Stable
        );
        assert_eq!(
            midpoint_trend(MetricKind::ResponseTime, &[100.0, 101.0, 99.0, 102.0, 100.0, 101.0]),
            TrendLabel::Stable
        );
        assert_eq!(
            midpoint_trend(MetricKind::ErrorRate, &[0.0, 0.0, 0.1, 0.2, 0.3]),
            TrendLabel::Stable
        );
    }

    #[test]
    fn test_empty_series_has_no_aggregate() {
        assert!(KindAggregate::from_series(MetricKind::Fps, &[]).is_none());
    }
}
