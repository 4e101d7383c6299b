//! Core telemetry types shared by every pipeline component
//!
//! This module defines the metric kinds and their directionality, the samples
//! and sparse snapshots that flow through ingestion, the shared severity
//! scales, and the single percentage table used to grade trends and
//! regressions. The store, the regression detector and the alert manager all
//! read directionality and change buckets from here.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Timestamp type for consistent time handling across the pipeline
pub type Timestamp = DateTime<Utc>;

/// Relative change (percent) below which a windowed trend is considered stable
pub const TREND_STABLE_BAND_PERCENT: f64 = 5.0;

/// Relative change (percent) above which a regression is graded moderate
pub const MODERATE_CHANGE_PERCENT: f64 = 25.0;

/// Relative change (percent) above which a regression is graded severe
pub const SEVERE_CHANGE_PERCENT: f64 = 50.0;

/// Inclusive time window used by every query API
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Window covering the given duration up to now
    pub fn last(duration: Duration) -> Self {
        Self::last_at(duration, Utc::now())
    }

    /// Window covering the given duration up to `now`
    pub fn last_at(duration: Duration, now: Timestamp) -> Self {
        Self {
            start: now - duration,
            end: now,
        }
    }

    /// Window covering every representable timestamp
    pub fn all() -> Self {
        Self {
            start: DateTime::<Utc>::MIN_UTC,
            end: DateTime::<Utc>::MAX_UTC,
        }
    }

    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Length of the window in hours (zero for inverted windows)
    pub fn hours(&self) -> f64 {
        let millis = self.end.signed_duration_since(self.start).num_milliseconds();
        (millis.max(0) as f64) / 3_600_000.0
    }
}

/// Whether a rising value is good or bad news for a metric
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Latency-like metrics: higher values are worse
    IncreaseIsBad,
    /// Rate-like metrics: higher values are better
    IncreaseIsGood,
}

impl Direction {
    /// Whether a change of the given sign moves the metric the wrong way
    pub fn is_unfavorable(self, delta: f64) -> bool {
        match self {
            Direction::IncreaseIsBad => delta > 0.0,
            Direction::IncreaseIsGood => delta < 0.0,
        }
    }

    /// Label a non-stable change of the given sign
    pub fn label(self, delta: f64) -> TrendLabel {
        if self.is_unfavorable(delta) {
            TrendLabel::Degrading
        } else {
            TrendLabel::Improving
        }
    }
}

/// Threshold table category a metric is evaluated under
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdCategory {
    Performance,
    Memory,
    ErrorRate,
    BundleSize,
    System,
}

/// The fixed set of metric kinds the pipeline understands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    ResponseTime,
    Throughput,
    ErrorRate,
    ContextProcessingTime,
    TokenProcessingRate,
    MemoryUsage,
    CpuUsage,
    Fps,
    RenderTime,
    LoadTime,
    NetworkLatency,
    PayloadSize,
    BundleSize,
    CacheHitRate,
}

impl MetricKind {
    pub const ALL: [MetricKind; 14] = [
        MetricKind::ResponseTime,
        MetricKind::Throughput,
        MetricKind::ErrorRate,
        MetricKind::ContextProcessingTime,
        MetricKind::TokenProcessingRate,
        MetricKind::MemoryUsage,
        MetricKind::CpuUsage,
        MetricKind::Fps,
        MetricKind::RenderTime,
        MetricKind::LoadTime,
        MetricKind::NetworkLatency,
        MetricKind::PayloadSize,
        MetricKind::BundleSize,
        MetricKind::CacheHitRate,
    ];

    /// The authoritative directionality tag for this metric
    pub fn direction(self) -> Direction {
        match self {
            MetricKind::Throughput
            | MetricKind::TokenProcessingRate
            | MetricKind::Fps
            | MetricKind::CacheHitRate => Direction::IncreaseIsGood,
            _ => Direction::IncreaseIsBad,
        }
    }

    pub fn category(self) -> ThresholdCategory {
        match self {
            MetricKind::MemoryUsage => ThresholdCategory::Memory,
            MetricKind::ErrorRate => ThresholdCategory::ErrorRate,
            MetricKind::BundleSize | MetricKind::PayloadSize => ThresholdCategory::BundleSize,
            MetricKind::CpuUsage | MetricKind::NetworkLatency | MetricKind::CacheHitRate => {
                ThresholdCategory::System
            }
            _ => ThresholdCategory::Performance,
        }
    }

    /// Alert severity raised when only the warning tier is breached
    pub fn warning_severity(self) -> Severity {
        match self {
            MetricKind::ErrorRate => Severity::High,
            _ => Severity::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::ResponseTime => "response_time",
            MetricKind::Throughput => "throughput",
            MetricKind::ErrorRate => "error_rate",
            MetricKind::ContextProcessingTime => "context_processing_time",
            MetricKind::TokenProcessingRate => "token_processing_rate",
            MetricKind::MemoryUsage => "memory_usage",
            MetricKind::CpuUsage => "cpu_usage",
            MetricKind::Fps => "fps",
            MetricKind::RenderTime => "render_time",
            MetricKind::LoadTime => "load_time",
            MetricKind::NetworkLatency => "network_latency",
            MetricKind::PayloadSize => "payload_size",
            MetricKind::BundleSize => "bundle_size",
            MetricKind::CacheHitRate => "cache_hit_rate",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            MetricKind::ResponseTime => "Response Time",
            MetricKind::Throughput => "Throughput",
            MetricKind::ErrorRate => "Error Rate",
            MetricKind::ContextProcessingTime => "Context Processing Time",
            MetricKind::TokenProcessingRate => "Token Processing Rate",
            MetricKind::MemoryUsage => "Memory Usage",
            MetricKind::CpuUsage => "CPU Usage",
            MetricKind::Fps => "FPS",
            MetricKind::RenderTime => "Render Time",
            MetricKind::LoadTime => "Load Time",
            MetricKind::NetworkLatency => "Network Latency",
            MetricKind::PayloadSize => "Payload Size",
            MetricKind::BundleSize => "Bundle Size",
            MetricKind::CacheHitRate => "Cache Hit Rate",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            MetricKind::ResponseTime
            | MetricKind::ContextProcessingTime
            | MetricKind::RenderTime
            | MetricKind::LoadTime
            | MetricKind::NetworkLatency => "ms",
            MetricKind::Throughput => "ops/s",
            MetricKind::TokenProcessingRate => "tokens/s",
            MetricKind::MemoryUsage => "MB",
            MetricKind::CpuUsage => "%",
            MetricKind::Fps => "fps",
            MetricKind::PayloadSize | MetricKind::BundleSize => "bytes",
            MetricKind::ErrorRate | MetricKind::CacheHitRate => "ratio",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown metric kind: {}", s))
    }
}

/// Direction label for a metric's recent behaviour
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrendLabel {
    Improving,
    Degrading,
    Stable,
}

/// Impact scale shared by alerts and tracked errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Impact scale for regressions and leaks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RegressionSeverity {
    Minor,
    Moderate,
    Severe,
}

impl RegressionSeverity {
    /// Grade an absolute change percentage against the shared buckets
    pub fn from_change_percent(change_percent: f64) -> Self {
        let magnitude = change_percent.abs();
        if magnitude > SEVERE_CHANGE_PERCENT {
            RegressionSeverity::Severe
        } else if magnitude > MODERATE_CHANGE_PERCENT {
            RegressionSeverity::Moderate
        } else {
            RegressionSeverity::Minor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RegressionSeverity::Minor => "minor",
            RegressionSeverity::Moderate => "moderate",
            RegressionSeverity::Severe => "severe",
        }
    }
}

/// Sparse set of metric values reported together (the "partial sample")
///
/// Non-finite values are dropped on insert, so malformed readings never reach
/// the buffers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct MetricSnapshot(BTreeMap<MetricKind, f64>);

impl MetricSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, kind: MetricKind, value: f64) -> Self {
        self.set(kind, value);
        self
    }

    pub fn set(&mut self, kind: MetricKind, value: f64) {
        if value.is_finite() {
            self.0.insert(kind, value);
        }
    }

    pub fn remove(&mut self, kind: MetricKind) -> Option<f64> {
        self.0.remove(&kind)
    }

    pub fn get(&self, kind: MetricKind) -> Option<f64> {
        self.0.get(&kind).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricKind, f64)> + '_ {
        self.0.iter().map(|(kind, value)| (*kind, *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A single immutable metric reading
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub id: String,
    /// Monotonic ingestion sequence number
    pub seq: u64,
    pub session_id: String,
    pub user_id: Option<String>,
    pub component_name: Option<String>,
    pub interaction_type: Option<String>,
    pub kind: MetricKind,
    pub value: f64,
    pub timestamp: Timestamp,
}
