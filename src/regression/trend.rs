//! Per-metric trend tracking by least-squares regression

use crate::events::{MetricKind, Timestamp, TrendLabel};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Slope magnitude (units per sample) below which a trend is stable
pub const STABLE_SLOPE: f64 = 0.01;

/// Bounded value series for one metric with its fitted line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendRecord {
    pub kind: MetricKind,
    pub values: VecDeque<f64>,
    pub timestamps: VecDeque<Timestamp>,
    /// Change per sample index
    pub slope: f64,
    /// Absolute Pearson correlation of value against index
    pub correlation: f64,
    pub label: TrendLabel,
    window: usize,
}

impl TrendRecord {
    pub fn new(kind: MetricKind, window: usize) -> Self {
        Self {
            kind,
            values: VecDeque::with_capacity(window),
            timestamps: VecDeque::with_capacity(window),
            slope: 0.0,
            correlation: 0.0,
            label: TrendLabel::Stable,
            window: window.max(1),
        }
    }

    /// Append a reading, evict FIFO past the window, and refit
    ///
    /// The fit only runs once `min_sample_size` readings are present; until
    /// then the record keeps its previous slope and label.
    pub fn push(&mut self, value: f64, timestamp: Timestamp, min_sample_size: usize) {
        self.values.push_back(value);
        self.timestamps.push_back(timestamp);
        while self.values.len() > self.window {
            self.values.pop_front();
            self.timestamps.pop_front();
        }

        if self.values.len() >= min_sample_size {
            self.refit();
        }
    }

    fn refit(&mut self) {
        let values: Vec<f64> = self.values.iter().copied().collect();
        let (slope, correlation) = least_squares(&values);
        self.slope = slope;
        self.correlation = correlation.abs();
        self.label = if slope.abs() < STABLE_SLOPE {
            TrendLabel::Stable
        } else {
            self.kind.direction().label(slope)
        };
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Mean spacing between consecutive readings
    pub fn mean_interval(&self) -> Option<Duration> {
        if self.timestamps.len() < 2 {
            return None;
        }
        let first = *self.timestamps.front()?;
        let last = *self.timestamps.back()?;
        let span = last.signed_duration_since(first).num_milliseconds().max(0);
        Some(Duration::milliseconds(span / (self.timestamps.len() as i64 - 1)))
    }

    /// Population coefficient of variation, zero when the mean is not positive
    pub fn coefficient_of_variation(&self) -> f64 {
        let n = self.values.len();
        if n == 0 {
            return 0.0;
        }
        let mean = self.values.iter().sum::<f64>() / n as f64;
        if mean <= 0.0 {
            return 0.0;
        }
        let variance = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        variance.sqrt() / mean
    }
}

/// Ordinary least squares of values against their index
///
/// # Returns
///
/// `(slope, correlation)`; both are zero when the fit is undefined.
pub fn least_squares(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n < 2 {
        return (0.0, 0.0);
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;

    let mut numerator = 0.0;
    let mut x_square_sum = 0.0;
    let mut y_square_sum = 0.0;
    for (i, y) in values.iter().enumerate() {
        let x_diff = i as f64 - x_mean;
        let y_diff = y - y_mean;
        numerator += x_diff * y_diff;
        x_square_sum += x_diff * x_diff;
        y_square_sum += y_diff * y_diff;
    }

    let slope = if x_square_sum != 0.0 {
        numerator / x_square_sum
    } else {
        0.0
    };
    let denominator = (x_square_sum * y_square_sum).sqrt();
    let correlation = if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    };
    (slope, correlation)
}
