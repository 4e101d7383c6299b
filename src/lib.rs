/// Error types for the observability pipeline
pub mod error;

/// Shared metric, severity and time types
pub mod events;

/// Tick-driven scheduled tasks
pub mod scheduler;

/// Injected host capability for resource usage
pub mod platform;

/// Structured and tabular exports
pub mod export;

/// Configuration management
pub mod config;

/// Metric ingestion and aggregation
pub mod store;

/// Baselines, trends and regression detection
pub mod regression;

/// Thresholds, alert lifecycle and dispatch
pub mod alerts;

/// Error tracking and global failure capture
pub mod tracking;

/// Composed pipeline context and tick loop
pub mod observability;

// Re-export commonly used types
pub use alerts::{Alert, AlertManager, ThresholdTable};
pub use config::Config;
pub use error::{ConfigError, ExportError, HandlerError, ProbeError};
pub use events::{MetricKind, MetricSnapshot, Severity, TimeRange};
pub use observability::{spawn_tick_loop, ObservabilityContext, TickHandle, TickReport};
pub use regression::RegressionDetector;
pub use store::MetricsStore;
pub use tracking::ErrorTracker;
