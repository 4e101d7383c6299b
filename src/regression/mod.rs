//! Baselines, trends, regression detection and breach prediction

pub mod detector;
pub mod knowledge;
pub mod trend;

pub use detector::{
    Baseline, Prediction, Regression, RegressionDetector, RegressionExport, RegressionFilter,
    RegressionStats, StabilityReport,
};
pub use trend::TrendRecord;
