//! Baseline and trend based regression detection
//!
//! Baselines are built once per metric from a historical batch. Every live
//! value then updates that metric's trend record and is compared against its
//! baseline; a deviation in the unfavorable direction larger than the
//! sensitivity yields a `Regression` with root cause and mitigation text.

use super::knowledge;
use super::trend::TrendRecord;
use crate::config::RegressionConfig;
use crate::error::ExportError;
use crate::events::{
    Direction, MetricKind, MetricSample, MetricSnapshot, RegressionSeverity, TimeRange, Timestamp,
    TrendLabel,
};
use crate::export;
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Smoothing factor applied to a confident baseline after a confirmed regression
pub const BASELINE_SMOOTHING: f64 = 0.1;

/// Baseline confidence above which confirmed regressions move the baseline
pub const SMOOTHING_CONFIDENCE: f64 = 0.8;

/// Coefficient of variation (percent) below which a metric is stable
pub const STABLE_VOLATILITY_PERCENT: f64 = 20.0;

/// Minimum trend correlation for a breach prediction
const PREDICTION_MIN_CORRELATION: f64 = 0.7;

const PREDICTION_MIN_PROBABILITY: f64 = 0.5;
const PREDICTION_MAX_PROBABILITY: f64 = 0.95;

/// Reference value for a metric
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Baseline {
    pub kind: MetricKind,
    pub value: f64,
    /// Trust in the baseline, in [0, 1]
    pub confidence: f64,
    pub sample_size: usize,
    pub timestamp: Timestamp,
}

impl Baseline {
    /// Derive a baseline from a batch of readings
    ///
    /// The median is used when the distribution is skewed beyond |1|, the
    /// mean otherwise. Confidence grows with sample size and shrinks with the
    /// coefficient of variation.
    pub fn from_values(kind: MetricKind, values: &[f64], now: Timestamp) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = sorted[sorted.len() / 2];

        let value = if skewness(values, mean, std_dev).abs() > 1.0 {
            median
        } else {
            mean
        };
        let cv = if mean > 0.0 { std_dev / mean } else { 0.0 };
        let confidence = ((n / 100.0) * (1.0 - cv)).clamp(0.0, 1.0);

        Some(Self {
            kind,
            value,
            confidence,
            sample_size: values.len(),
            timestamp: now,
        })
    }
}

fn skewness(values: &[f64], mean: f64, std_dev: f64) -> f64 {
    if std_dev == 0.0 {
        return 0.0;
    }
    values
        .iter()
        .map(|v| ((v - mean) / std_dev).powi(3))
        .sum::<f64>()
        / values.len() as f64
}

/// A detected unfavorable deviation from baseline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Regression {
    pub id: String,
    pub metric: MetricKind,
    pub severity: RegressionSeverity,
    pub current_value: f64,
    pub previous_value: f64,
    pub change_percent: f64,
    pub detected_at: Timestamp,
    pub root_cause: String,
    pub mitigation_plan: Vec<String>,
}

/// Projected threshold breach for a degrading metric
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub metric: MetricKind,
    pub probability: f64,
    /// Value at which the metric counts as regressed
    pub threshold: f64,
    /// Estimated time until the threshold is crossed; zero when already past it
    pub time_to_issue_ms: i64,
    pub severity: RegressionSeverity,
    pub recommendation: String,
}

/// Volatility assessment for one metric
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StabilityReport {
    pub metric: MetricKind,
    pub is_stable: bool,
    /// Coefficient of variation as a percentage
    pub volatility: f64,
    pub coefficient: f64,
    pub recommendations: Vec<String>,
}

/// Regression query filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegressionFilter {
    pub severities: Option<Vec<RegressionSeverity>>,
    pub metrics: Option<Vec<MetricKind>>,
    pub range: Option<TimeRange>,
}

impl RegressionFilter {
    fn matches(&self, regression: &Regression) -> bool {
        self.severities
            .as_ref()
            .map_or(true, |s| s.contains(&regression.severity))
            && self
                .metrics
                .as_ref()
                .map_or(true, |m| m.contains(&regression.metric))
            && self
                .range
                .map_or(true, |range| range.contains(regression.detected_at))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegressionStats {
    pub total: usize,
    pub by_severity: BTreeMap<RegressionSeverity, usize>,
    pub by_metric: BTreeMap<MetricKind, usize>,
    /// Mean absolute change percentage
    pub average_impact: f64,
    pub severe_count: usize,
    pub with_mitigation_count: usize,
}

/// Structured detector export document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegressionExport {
    pub exported_at: Timestamp,
    pub sensitivity: f64,
    pub baselines: Vec<Baseline>,
    pub trends: Vec<TrendRecord>,
    pub regressions: Vec<Regression>,
    pub stats: RegressionStats,
    pub predictions: Vec<Prediction>,
}

/// Baseline, trend and regression state for every metric kind
#[derive(Debug)]
pub struct RegressionDetector {
    config: RegressionConfig,
    enabled: bool,
    sensitivity: f64,
    baselines: BTreeMap<MetricKind, Baseline>,
    trends: BTreeMap<MetricKind, TrendRecord>,
    regressions: Vec<Regression>,
}

impl Default for RegressionDetector {
    fn default() -> Self {
        Self::new(RegressionConfig::default())
    }
}

impl RegressionDetector {
    pub fn new(config: RegressionConfig) -> Self {
        Self {
            enabled: config.enabled,
            sensitivity: config.sensitivity.clamp(0.01, 1.0),
            config,
            baselines: BTreeMap::new(),
            trends: BTreeMap::new(),
            regressions: Vec::new(),
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        info!("Regression detection enabled");
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        info!("Regression detection disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set the relative deviation threshold, clamped to [0.01, 1.0]
    pub fn set_sensitivity(&mut self, sensitivity: f64) {
        self.sensitivity = if sensitivity.is_nan() {
            self.config.sensitivity
        } else {
            sensitivity.clamp(0.01, 1.0)
        };
        info!("Regression sensitivity set to {:.1}%", self.sensitivity * 100.0);
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    /// Build baselines from a historical batch of snapshots
    ///
    /// Kinds with fewer than the minimum sample size are skipped; an
    /// undersized batch establishes nothing.
    ///
    /// # Returns
    ///
    /// Number of baselines established
    pub fn establish_baselines(&mut self, history: &[MetricSnapshot]) -> usize {
        self.establish_baselines_at(history, Utc::now())
    }

    pub fn establish_baselines_at(&mut self, history: &[MetricSnapshot], now: Timestamp) -> usize {
        let mut series: BTreeMap<MetricKind, Vec<f64>> = BTreeMap::new();
        for snapshot in history {
            for (kind, value) in snapshot.iter() {
                series.entry(kind).or_default().push(value);
            }
        }
        self.establish_from_series(series, now)
    }

    /// Build baselines from stored samples
    pub fn establish_baselines_from_samples_at(
        &mut self,
        samples: &[MetricSample],
        now: Timestamp,
    ) -> usize {
        let mut series: BTreeMap<MetricKind, Vec<f64>> = BTreeMap::new();
        for sample in samples {
            series.entry(sample.kind).or_default().push(sample.value);
        }
        self.establish_from_series(series, now)
    }

    fn establish_from_series(
        &mut self,
        series: BTreeMap<MetricKind, Vec<f64>>,
        now: Timestamp,
    ) -> usize {
        let mut established = 0;
        for (kind, values) in series {
            if values.len() < self.config.min_sample_size {
                debug!(
                    "Not enough {} samples for a baseline ({} < {})",
                    kind,
                    values.len(),
                    self.config.min_sample_size
                );
                continue;
            }
            if let Some(baseline) = Baseline::from_values(kind, &values, now) {
                self.baselines.insert(kind, baseline);
                established += 1;
            }
        }

        if established > 0 {
            info!("Established baselines for {} metrics", established);
        }
        established
    }

    /// Install or replace a baseline directly
    pub fn set_baseline(&mut self, baseline: Baseline) {
        self.baselines.insert(baseline.kind, baseline);
    }

    pub fn has_baseline(&self, kind: MetricKind) -> bool {
        self.baselines.contains_key(&kind)
    }

    pub fn get_baseline(&self, kind: MetricKind) -> Option<&Baseline> {
        self.baselines.get(&kind)
    }

    pub fn get_baselines(&self) -> Vec<Baseline> {
        self.baselines.values().cloned().collect()
    }

    /// Append a reading to the metric's trend and refit it
    ///
    /// # Returns
    ///
    /// The trend label after the update
    pub fn update_trend(&mut self, kind: MetricKind, value: f64, timestamp: Timestamp) -> TrendLabel {
        let window = self.config.trend_window;
        let record = self
            .trends
            .entry(kind)
            .or_insert_with(|| TrendRecord::new(kind, window));
        record.push(value, timestamp, self.config.min_sample_size);
        record.label
    }

    pub fn get_trend(&self, kind: MetricKind) -> Option<&TrendRecord> {
        self.trends.get(&kind)
    }

    pub fn get_trends(&self) -> Vec<TrendRecord> {
        self.trends.values().cloned().collect()
    }

    /// Compare a live value against the metric's baseline
    ///
    /// Returns `None` when there is no usable baseline, when the change is
    /// within the sensitivity band, or when it moves in the favorable
    /// direction.
    pub fn check_for_regression(&mut self, kind: MetricKind, value: f64) -> Option<Regression> {
        self.check_for_regression_at(kind, value, Utc::now())
    }

    pub fn check_for_regression_at(
        &mut self,
        kind: MetricKind,
        value: f64,
        now: Timestamp,
    ) -> Option<Regression> {
        let baseline = self.baselines.get_mut(&kind)?;
        if baseline.value == 0.0 || !value.is_finite() {
            return None;
        }

        let change_percent = (value - baseline.value) / baseline.value.abs() * 100.0;
        if change_percent.abs() < self.sensitivity * 100.0 {
            return None;
        }
        if !kind.direction().is_unfavorable(value - baseline.value) {
            return None;
        }

        let severity = RegressionSeverity::from_change_percent(change_percent);
        let regression = Regression {
            id: uuid::Uuid::new_v4().to_string(),
            metric: kind,
            severity,
            current_value: value,
            previous_value: baseline.value,
            change_percent,
            detected_at: now,
            root_cause: knowledge::root_cause(kind, change_percent),
            mitigation_plan: knowledge::mitigation_plan(kind, severity),
        };

        if baseline.confidence > SMOOTHING_CONFIDENCE {
            baseline.value = BASELINE_SMOOTHING * value + (1.0 - BASELINE_SMOOTHING) * baseline.value;
            baseline.timestamp = now;
        }

        warn!(
            "Performance regression detected: {} changed by {:.1}% ({})",
            kind,
            change_percent,
            severity.as_str()
        );

        self.regressions.push(regression.clone());
        self.enforce_capacity();
        Some(regression)
    }

    fn enforce_capacity(&mut self) {
        if self.regressions.len() > self.config.max_regressions {
            let excess = self.regressions.len() - self.config.trim_regressions_to;
            self.regressions.drain(..excess);
        }
    }

    /// Feed every present field of a snapshot through trend and regression checks
    pub fn process(&mut self, snapshot: &MetricSnapshot) -> Vec<Regression> {
        self.process_at(snapshot, Utc::now())
    }

    pub fn process_at(&mut self, snapshot: &MetricSnapshot, now: Timestamp) -> Vec<Regression> {
        if !self.enabled {
            return Vec::new();
        }
        snapshot
            .iter()
            .filter_map(|(kind, value)| {
                self.update_trend(kind, value, now);
                self.check_for_regression_at(kind, value, now)
            })
            .collect()
    }

    /// Feed stored samples, in order, through trend and regression checks
    pub fn process_samples_at(&mut self, samples: &[MetricSample], now: Timestamp) -> Vec<Regression> {
        if !self.enabled {
            return Vec::new();
        }
        samples
            .iter()
            .filter_map(|sample| {
                self.update_trend(sample.kind, sample.value, sample.timestamp);
                self.check_for_regression_at(sample.kind, sample.value, now)
            })
            .collect()
    }

    /// Project threshold breaches for metrics with a strong degrading trend
    ///
    /// # Returns
    ///
    /// Predictions with probability above one half, most likely first
    pub fn predict_issues(&self) -> Vec<Prediction> {
        let mut predictions: Vec<Prediction> = self
            .trends
            .values()
            .filter(|trend| {
                trend.label == TrendLabel::Degrading
                    && trend.correlation > PREDICTION_MIN_CORRELATION
            })
            .filter_map(|trend| self.predict(trend))
            .filter(|prediction| prediction.probability > PREDICTION_MIN_PROBABILITY)
            .collect();

        predictions.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        predictions
    }

    fn predict(&self, trend: &TrendRecord) -> Option<Prediction> {
        let baseline = self.baselines.get(&trend.kind)?;
        if baseline.value == 0.0 {
            return None;
        }
        let current = trend.latest()?;
        let direction = trend.kind.direction();

        let threshold = match direction {
            Direction::IncreaseIsBad => baseline.value * (1.0 + self.sensitivity),
            Direction::IncreaseIsGood => baseline.value * (1.0 - self.sensitivity),
        };

        let slope = trend.slope.abs();
        let already_past = direction.is_unfavorable(current - threshold) || current == threshold;
        let samples_to_threshold = if already_past || slope == 0.0 {
            0.0
        } else {
            (threshold - current).abs() / slope
        };
        let interval_ms = trend
            .mean_interval()
            .map_or(0, |interval| interval.num_milliseconds());
        let time_to_issue_ms = (samples_to_threshold * interval_ms as f64).round() as i64;

        let probability = (trend.correlation * 0.8 + (slope / baseline.value.abs()) * 0.2)
            .min(PREDICTION_MAX_PROBABILITY);

        let projected = current + trend.slope * trend.window() as f64;
        let projected_change = (projected - baseline.value) / baseline.value.abs() * 100.0;
        let severity = RegressionSeverity::from_change_percent(projected_change);

        let hours = time_to_issue_ms as f64 / 3_600_000.0;
        Some(Prediction {
            metric: trend.kind,
            probability,
            threshold,
            time_to_issue_ms,
            severity,
            recommendation: format!(
                "Monitor {} closely: trend suggests a {} issue in {:.1} hours",
                trend.kind.display_name(),
                severity.as_str(),
                hours
            ),
        })
    }

    /// Volatility of a metric's trend window
    pub fn analyze_stability(&self, kind: MetricKind) -> StabilityReport {
        let trend = match self.trends.get(&kind) {
            Some(trend) if trend.len() >= self.config.min_sample_size => trend,
            _ => {
                return StabilityReport {
                    metric: kind,
                    is_stable: false,
                    volatility: 0.0,
                    coefficient: 0.0,
                    recommendations: vec!["Insufficient data for analysis".to_string()],
                }
            }
        };

        let coefficient = trend.coefficient_of_variation();
        let volatility = coefficient * 100.0;
        let is_stable = volatility < STABLE_VOLATILITY_PERCENT;

        let mut recommendations = Vec::new();
        if !is_stable {
            recommendations.push(format!("High volatility detected ({:.1}%)", volatility));
            recommendations.extend(
                knowledge::stability_recommendations(kind)
                    .iter()
                    .map(|r| r.to_string()),
            );
        }

        StabilityReport {
            metric: kind,
            is_stable,
            volatility,
            coefficient,
            recommendations,
        }
    }

    /// Detected regressions matching the filter, newest first
    pub fn get_regressions(&self, filter: &RegressionFilter) -> Vec<Regression> {
        let mut matching: Vec<Regression> = self
            .regressions
            .iter()
            .filter(|regression| filter.matches(regression))
            .cloned()
            .collect();
        // Stable sort keeps insertion order reversed for equal timestamps
        matching.reverse();
        matching.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        matching
    }

    pub fn get_regression_stats(&self) -> RegressionStats {
        let mut stats = RegressionStats {
            total: self.regressions.len(),
            ..RegressionStats::default()
        };

        for regression in &self.regressions {
            *stats.by_severity.entry(regression.severity).or_insert(0) += 1;
            *stats.by_metric.entry(regression.metric).or_insert(0) += 1;
            if regression.severity == RegressionSeverity::Severe {
                stats.severe_count += 1;
            }
            if !regression.mitigation_plan.is_empty() {
                stats.with_mitigation_count += 1;
            }
        }

        if !self.regressions.is_empty() {
            stats.average_impact = self
                .regressions
                .iter()
                .map(|r| r.change_percent.abs())
                .sum::<f64>()
                / self.regressions.len() as f64;
        }
        stats
    }

    pub fn clear_regressions(&mut self) {
        self.regressions.clear();
        info!("Regression history cleared");
    }

    /// Export baselines, trends, regressions, stats and predictions as JSON
    pub fn export_data(&self) -> Result<String, ExportError> {
        self.export_data_at(Utc::now())
    }

    pub fn export_data_at(&self, now: Timestamp) -> Result<String, ExportError> {
        export::to_structured(&RegressionExport {
            exported_at: now,
            sensitivity: self.sensitivity,
            baselines: self.get_baselines(),
            trends: self.get_trends(),
            regressions: self.regressions.clone(),
            stats: self.get_regression_stats(),
            predictions: self.predict_issues(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn detector_with_baseline(kind: MetricKind, value: f64, confidence: f64) -> RegressionDetector {
        let mut detector = RegressionDetector::default();
        detector.set_baseline(Baseline {
            kind,
            value,
            confidence,
            sample_size: 50,
            timestamp: Utc::now(),
        });
        detector
    }

    #[test]
    fn test_regression_bucketing() {
        let mut detector = detector_with_baseline(MetricKind::ResponseTime, 100.0, 0.5);

        let moderate = detector
            .check_for_regression(MetricKind::ResponseTime, 130.0)
            .unwrap();
        assert_eq!(moderate.severity, RegressionSeverity::Moderate);
        assert!((moderate.change_percent - 30.0).abs() < 1e-9);
        assert_eq!(moderate.previous_value, 100.0);
        assert_eq!(moderate.mitigation_plan.len(), 3);

        let severe = detector
            .check_for_regression(MetricKind::ResponseTime, 160.0)
            .unwrap();
        assert_eq!(severe.severity, RegressionSeverity::Severe);
        assert_eq!(severe.mitigation_plan.len(), 4);

        assert!(detector
            .check_for_regression(MetricKind::ResponseTime, 105.0)
            .is_none());
    }

    #[test]
    fn test_minor_regression_just_above_sensitivity() {
        let mut detector = detector_with_baseline(MetricKind::ResponseTime, 100.0, 0.5);
        let minor = detector
            .check_for_regression(MetricKind::ResponseTime, 120.0)
            .unwrap();
        assert_eq!(minor.severity, RegressionSeverity::Minor);
        assert_eq!(minor.root_cause, "Server resource contention");
    }

    #[test]
    fn test_favorable_change_is_not_a_regression() {
        let mut detector = detector_with_baseline(MetricKind::ResponseTime, 100.0, 0.5);
        assert!(detector
            .check_for_regression(MetricKind::ResponseTime, 40.0)
            .is_none());

        let mut detector = detector_with_baseline(MetricKind::Throughput, 100.0, 0.5);
        assert!(detector
            .check_for_regression(MetricKind::Throughput, 200.0)
            .is_none());
        let drop = detector
            .check_for_regression(MetricKind::Throughput, 40.0)
            .unwrap();
        assert_eq!(drop.severity, RegressionSeverity::Severe);
        assert!(drop.change_percent < 0.0);
    }

    #[test]
    fn test_no_baseline_or_zero_baseline() {
        let mut detector = RegressionDetector::default();
        assert!(detector
            .check_for_regression(MetricKind::ResponseTime, 1e9)
            .is_none());

        let mut detector = detector_with_baseline(MetricKind::ErrorRate, 0.0, 1.0);
        assert!(detector.check_for_regression(MetricKind::ErrorRate, 0.5).is_none());
    }

    #[test]
    fn test_confident_baseline_is_smoothed() {
        let mut detector = detector_with_baseline(MetricKind::ResponseTime, 100.0, 0.9);
        detector.check_for_regression(MetricKind::ResponseTime, 200.0);
        let baseline = detector.get_baseline(MetricKind::ResponseTime).unwrap();
        assert!((baseline.value - 110.0).abs() < 1e-9);

        let mut detector = detector_with_baseline(MetricKind::ResponseTime, 100.0, 0.5);
        detector.check_for_regression(MetricKind::ResponseTime, 200.0);
        assert_eq!(detector.get_baseline(MetricKind::ResponseTime).unwrap().value, 100.0);
    }

    #[test]
    fn test_baseline_uses_mean_for_symmetric_data() {
        let values: Vec<f64> = (0..20).map(|i| 100.0 + (i % 5) as f64).collect();
        let baseline = Baseline::from_values(MetricKind::ResponseTime, &values, Utc::now()).unwrap();
        assert!((baseline.value - 102.0).abs() < 1e-9);
        assert_eq!(baseline.sample_size, 20);
        assert!(baseline.confidence > 0.0 && baseline.confidence <= 0.2);
    }

    #[test]
    fn test_baseline_uses_median_for_skewed_data() {
        let mut values = vec![100.0; 19];
        values.push(10_000.0);
        let baseline = Baseline::from_values(MetricKind::ResponseTime, &values, Utc::now()).unwrap();
        assert_eq!(baseline.value, 100.0);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let values = vec![50.0; 500];
        let baseline = Baseline::from_values(MetricKind::Fps, &values, Utc::now()).unwrap();
        assert_eq!(baseline.confidence, 1.0);

        let mut wild = vec![0.0; 19];
        wild.push(1000.0);
        let baseline = Baseline::from_values(MetricKind::Fps, &wild, Utc::now()).unwrap();
        assert_eq!(baseline.confidence, 0.0);
    }

    #[test]
    fn test_establish_baselines_requires_min_samples() {
        let mut detector = RegressionDetector::default();
        let history: Vec<MetricSnapshot> = (0..9)
            .map(|i| MetricSnapshot::new().with(MetricKind::ResponseTime, 100.0 + i as f64))
            .collect();
        assert_eq!(detector.establish_baselines(&history), 0);
        assert!(detector.get_baselines().is_empty());

        let history: Vec<MetricSnapshot> = (0..12)
            .map(|i| {
                let snapshot = MetricSnapshot::new().with(MetricKind::ResponseTime, 100.0 + i as f64);
                if i < 5 {
                    snapshot.with(MetricKind::Fps, 60.0)
                } else {
                    snapshot
                }
            })
            .collect();
        assert_eq!(detector.establish_baselines(&history), 1);
        assert!(detector.has_baseline(MetricKind::ResponseTime));
        assert!(!detector.has_baseline(MetricKind::Fps));
    }

    #[test]
    fn test_process_respects_enabled_flag() {
        let mut detector = detector_with_baseline(MetricKind::ResponseTime, 100.0, 0.5);
        let snapshot = MetricSnapshot::new().with(MetricKind::ResponseTime, 200.0);

        detector.disable();
        assert!(detector.process(&snapshot).is_empty());
        assert!(detector.get_trend(MetricKind::ResponseTime).is_none());

        detector.enable();
        assert_eq!(detector.process(&snapshot).len(), 1);
        assert_eq!(detector.get_trend(MetricKind::ResponseTime).unwrap().len(), 1);
    }

    #[test]
    fn test_set_sensitivity_clamps() {
        let mut detector = RegressionDetector::default();
        detector.set_sensitivity(5.0);
        assert_eq!(detector.sensitivity(), 1.0);
        detector.set_sensitivity(0.0);
        assert_eq!(detector.sensitivity(), 0.01);
    }

    #[test]
    fn test_predict_issues_for_degrading_trend() {
        let mut detector = detector_with_baseline(MetricKind::ResponseTime, 100.0, 0.5);
        let start = Utc::now();
        for i in 0..20 {
            detector.update_trend(
                MetricKind::ResponseTime,
                100.0 + i as f64,
                start + Duration::seconds(i),
            );
        }

        let predictions = detector.predict_issues();
        assert_eq!(predictions.len(), 1);
        let prediction = &predictions[0];
        assert_eq!(prediction.metric, MetricKind::ResponseTime);
        assert!((prediction.threshold - 115.0).abs() < 1e-9);
        assert!(prediction.probability > 0.5 && prediction.probability <= 0.95);
        // 119 is already past 115
        assert_eq!(prediction.time_to_issue_ms, 0);
    }

    #[test]
    fn test_predict_time_to_threshold() {
        let mut detector = detector_with_baseline(MetricKind::ResponseTime, 100.0, 0.5);
        let start = Utc::now();
        for i in 0..10 {
            detector.update_trend(
                MetricKind::ResponseTime,
                100.0 + i as f64,
                start + Duration::seconds(i),
            );
        }

        let prediction = &detector.predict_issues()[0];
        // 109 -> 115 at one unit per sample, one second per sample
        assert_eq!(prediction.time_to_issue_ms, 6000);
    }

    #[test]
    fn test_no_prediction_without_baseline_or_for_improving_trend() {
        let mut detector = RegressionDetector::default();
        let now = Utc::now();
        for i in 0..20 {
            detector.update_trend(MetricKind::ResponseTime, 100.0 + i as f64, now);
        }
        assert!(detector.predict_issues().is_empty());

        let mut detector = detector_with_baseline(MetricKind::Throughput, 100.0, 0.5);
        for i in 0..20 {
            detector.update_trend(MetricKind::Throughput, 100.0 + i as f64, now);
        }
        assert!(detector.predict_issues().is_empty());
    }

    #[test]
    fn test_analyze_stability() {
        let mut detector = RegressionDetector::default();
        let now = Utc::now();

        let report = detector.analyze_stability(MetricKind::Fps);
        assert!(!report.is_stable);
        assert_eq!(report.recommendations, vec!["Insufficient data for analysis"]);

        for _ in 0..10 {
            detector.update_trend(MetricKind::Fps, 60.0, now);
        }
        let report = detector.analyze_stability(MetricKind::Fps);
        assert!(report.is_stable);
        assert_eq!(report.volatility, 0.0);

        for i in 0..10 {
            let value = if i % 2 == 0 { 10.0 } else { 100.0 };
            detector.update_trend(MetricKind::MemoryUsage, value, now);
        }
        let report = detector.analyze_stability(MetricKind::MemoryUsage);
        assert!(!report.is_stable);
        assert!(report.recommendations[0].starts_with("High volatility detected"));
        assert!(report
            .recommendations
            .contains(&"Check for memory leaks".to_string()));
    }

    #[test]
    fn test_get_regressions_newest_first_and_filtered() {
        let mut detector = detector_with_baseline(MetricKind::ResponseTime, 100.0, 0.5);
        let start = Utc::now();
        detector.check_for_regression_at(MetricKind::ResponseTime, 120.0, start);
        detector.check_for_regression_at(
            MetricKind::ResponseTime,
            200.0,
            start + Duration::seconds(1),
        );

        let all = detector.get_regressions(&RegressionFilter::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].severity, RegressionSeverity::Severe);

        let minor_only = detector.get_regressions(&RegressionFilter {
            severities: Some(vec![RegressionSeverity::Minor]),
            ..RegressionFilter::default()
        });
        assert_eq!(minor_only.len(), 1);
        assert_eq!(minor_only[0].current_value, 120.0);
    }

    #[test]
    fn test_regression_stats() {
        let mut detector = detector_with_baseline(MetricKind::ResponseTime, 100.0, 0.5);
        detector.check_for_regression(MetricKind::ResponseTime, 120.0);
        detector.check_for_regression(MetricKind::ResponseTime, 180.0);

        let stats = detector.get_regression_stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.severe_count, 1);
        assert_eq!(stats.by_metric[&MetricKind::ResponseTime], 2);
        assert!((stats.average_impact - 50.0).abs() < 1e-9);

        detector.clear_regressions();
        assert_eq!(detector.get_regression_stats().total, 0);
    }

    #[test]
    fn test_regression_list_is_bounded() {
        let mut detector = RegressionDetector::new(RegressionConfig {
            max_regressions: 10,
            trim_regressions_to: 5,
            ..RegressionConfig::default()
        });
        detector.set_baseline(Baseline {
            kind: MetricKind::ResponseTime,
            value: 100.0,
            confidence: 0.5,
            sample_size: 10,
            timestamp: Utc::now(),
        });
        for _ in 0..11 {
            detector.check_for_regression(MetricKind::ResponseTime, 200.0);
        }
        assert_eq!(detector.get_regression_stats().total, 5);
    }

    #[test]
    fn test_export_data_parses() {
        let mut detector = detector_with_baseline(MetricKind::ResponseTime, 100.0, 0.5);
        detector.process(&MetricSnapshot::new().with(MetricKind::ResponseTime, 170.0));

        let json = detector.export_data().unwrap();
        let parsed: RegressionExport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.baselines.len(), 1);
        assert_eq!(parsed.regressions.len(), 1);
        assert_eq!(parsed.trends.len(), 1);
        assert_eq!(parsed.stats.total, 1);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    /// A strictly increasing series of at least ten values
    #[derive(Debug, Clone)]
    struct IncreasingSeries(Vec<f64>);

    impl Arbitrary for IncreasingSeries {
        fn arbitrary(g: &mut Gen) -> Self {
            let len = 10 + usize::arbitrary(g) % 90;
            let mut value = (u16::arbitrary(g) % 1000) as f64;
            let values = (0..len)
                .map(|_| {
                    value += 1.0 + (u8::arbitrary(g) % 50) as f64;
                    value
                })
                .collect();
            IncreasingSeries(values)
        }
    }

    // Strictly increasing latency degrades while strictly increasing throughput improves
    #[quickcheck]
    fn prop_trend_direction_follows_metric(series: IncreasingSeries) -> bool {
        let mut detector = RegressionDetector::default();
        let now = Utc::now();
        let mut latency = TrendLabel::Stable;
        let mut throughput = TrendLabel::Stable;
        for value in &series.0 {
            latency = detector.update_trend(MetricKind::ResponseTime, *value, now);
            throughput = detector.update_trend(MetricKind::Throughput, *value, now);
        }
        latency == TrendLabel::Degrading && throughput == TrendLabel::Improving
    }

    // Regressions are only ever raised for unfavorable changes beyond the sensitivity
    #[quickcheck]
    fn prop_regressions_are_unfavorable(value: u16, good_direction: bool) -> bool {
        let kind = if good_direction {
            MetricKind::Fps
        } else {
            MetricKind::ResponseTime
        };
        let mut detector = RegressionDetector::default();
        detector.set_baseline(Baseline {
            kind,
            value: 500.0,
            confidence: 0.5,
            sample_size: 10,
            timestamp: Utc::now(),
        });

        match detector.check_for_regression(kind, value as f64) {
            Some(regression) => {
                regression.change_percent.abs() >= 15.0
                    && kind.direction().is_unfavorable(regression.change_percent)
            }
            None => true,
        }
    }
}
