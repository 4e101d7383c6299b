//! Metric ingestion, windowed aggregation and leak detection

pub mod aggregate;
pub mod leak;
pub mod metrics_store;

pub use aggregate::{KindAggregate, MetricAggregates};
pub use leak::MemoryLeak;
pub use metrics_store::{
    MetricFilter, MetricsExport, MetricsStore, RecordContext, SessionSummary, ANONYMOUS_SESSION,
};
