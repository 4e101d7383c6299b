//! Bounded metric sample store
//!
//! Samples are appended to a single capped buffer in ingestion order. On
//! overflow the oldest samples are dropped in one batch, so the buffer never
//! exceeds its cap and drops to the trim target right after an eviction.

use super::aggregate::{KindAggregate, MetricAggregates};
use super::leak::{detect_leak, MemoryLeak};
use crate::config::CollectionConfig;
use crate::error::ExportError;
use crate::events::{MetricKind, MetricSample, MetricSnapshot, TimeRange, Timestamp};
use crate::export::{self, cell, ExportFormat, TabularRow};
use chrono::{Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Session id used when the caller supplies none
pub const ANONYMOUS_SESSION: &str = "anonymous";

/// Number of leak reports kept in history
const MAX_LEAK_HISTORY: usize = 100;

/// Optional call-site context attached to every sample of one record call
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordContext {
    pub user_id: Option<String>,
    pub component_name: Option<String>,
    pub interaction_type: Option<String>,
}

impl RecordContext {
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn component(mut self, component_name: impl Into<String>) -> Self {
        self.component_name = Some(component_name.into());
        self
    }

    pub fn interaction(mut self, interaction_type: impl Into<String>) -> Self {
        self.interaction_type = Some(interaction_type.into());
        self
    }
}

/// Sample query filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricFilter {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub component_name: Option<String>,
    pub kinds: Option<Vec<MetricKind>>,
}

impl MetricFilter {
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn component(mut self, component_name: impl Into<String>) -> Self {
        self.component_name = Some(component_name.into());
        self
    }

    pub fn kinds(mut self, kinds: &[MetricKind]) -> Self {
        self.kinds = Some(kinds.to_vec());
        self
    }

    fn matches(&self, sample: &MetricSample) -> bool {
        let session = self
            .session_id
            .as_ref()
            .map_or(true, |id| &sample.session_id == id);
        let user = self
            .user_id
            .as_ref()
            .map_or(true, |id| sample.user_id.as_ref() == Some(id));
        let component = self
            .component_name
            .as_ref()
            .map_or(true, |name| sample.component_name.as_ref() == Some(name));
        let kind = self
            .kinds
            .as_ref()
            .map_or(true, |kinds| kinds.contains(&sample.kind));
        session && user && component && kind
    }
}

/// Running per-session totals
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    pub user_id: Option<String>,
    pub started_at: Timestamp,
    pub last_seen: Timestamp,
    pub record_count: usize,
    pub sample_count: usize,
    /// Running (count, sum) per kind
    pub totals: BTreeMap<MetricKind, (usize, f64)>,
}

impl SessionSummary {
    fn new(id: &str, user_id: Option<String>, now: Timestamp) -> Self {
        Self {
            id: id.to_string(),
            user_id,
            started_at: now,
            last_seen: now,
            record_count: 0,
            sample_count: 0,
            totals: BTreeMap::new(),
        }
    }

    /// Mean of every value recorded for a kind in this session
    pub fn average(&self, kind: MetricKind) -> Option<f64> {
        self.totals
            .get(&kind)
            .filter(|(count, _)| *count > 0)
            .map(|(count, sum)| sum / *count as f64)
    }
}

/// Structured metrics export document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsExport {
    pub exported_at: Timestamp,
    pub samples: Vec<MetricSample>,
    pub sessions: Vec<SessionSummary>,
    pub memory_leaks: Vec<MemoryLeak>,
    pub aggregates: MetricAggregates,
}

impl TabularRow for MetricSample {
    fn header() -> &'static [&'static str] {
        &[
            "id",
            "seq",
            "session_id",
            "user_id",
            "component_name",
            "interaction_type",
            "kind",
            "value",
            "timestamp",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.seq.to_string(),
            self.session_id.clone(),
            cell(&self.user_id),
            cell(&self.component_name),
            cell(&self.interaction_type),
            self.kind.to_string(),
            self.value.to_string(),
            self.timestamp.to_rfc3339(),
        ]
    }
}

/// Rolling metric sample store with session tracking and leak detection
#[derive(Debug)]
pub struct MetricsStore {
    config: CollectionConfig,
    samples: VecDeque<MetricSample>,
    next_seq: u64,
    sessions: BTreeMap<String, SessionSummary>,
    latest: MetricSnapshot,
    leaks: Vec<MemoryLeak>,
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new(CollectionConfig::default())
    }
}

impl MetricsStore {
    pub fn new(config: CollectionConfig) -> Self {
        Self {
            samples: VecDeque::with_capacity(config.max_samples.min(1024)),
            config,
            next_seq: 0,
            sessions: BTreeMap::new(),
            latest: MetricSnapshot::new(),
            leaks: Vec::new(),
        }
    }

    /// Record a partial sample for a session
    ///
    /// One `MetricSample` is appended per present field. An empty session id
    /// is recorded as `anonymous`.
    ///
    /// # Returns
    ///
    /// Copies of the samples that were appended
    pub fn record(
        &mut self,
        session_id: &str,
        metrics: &MetricSnapshot,
        context: &RecordContext,
    ) -> Vec<MetricSample> {
        self.record_at(session_id, metrics, context, Utc::now())
    }

    pub fn record_at(
        &mut self,
        session_id: &str,
        metrics: &MetricSnapshot,
        context: &RecordContext,
        now: Timestamp,
    ) -> Vec<MetricSample> {
        if metrics.is_empty() {
            return Vec::new();
        }

        let session_id = if session_id.trim().is_empty() {
            ANONYMOUS_SESSION
        } else {
            session_id
        };

        let session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionSummary::new(session_id, context.user_id.clone(), now));
        session.record_count += 1;
        session.last_seen = now;
        if session.user_id.is_none() {
            session.user_id = context.user_id.clone();
        }

        let mut appended = Vec::with_capacity(metrics.len());
        for (kind, value) in metrics.iter() {
            let sample = MetricSample {
                id: uuid::Uuid::new_v4().to_string(),
                seq: self.next_seq,
                session_id: session_id.to_string(),
                user_id: context.user_id.clone(),
                component_name: context.component_name.clone(),
                interaction_type: context.interaction_type.clone(),
                kind,
                value,
                timestamp: now,
            };
            self.next_seq += 1;

            let totals = session.totals.entry(kind).or_insert((0, 0.0));
            totals.0 += 1;
            totals.1 += value;
            session.sample_count += 1;

            self.latest.set(kind, value);
            self.samples.push_back(sample.clone());
            appended.push(sample);
        }

        self.enforce_capacity();
        appended
    }

    /// Drop the oldest samples in one batch once the cap is exceeded
    fn enforce_capacity(&mut self) {
        if self.samples.len() <= self.config.max_samples {
            return;
        }
        let excess = self.samples.len() - self.config.trim_samples_to;
        self.samples.drain(..excess);
        debug!(
            "Metric buffer overflow: evicted {} samples, {} retained",
            excess,
            self.samples.len()
        );
    }

    /// Copies of every sample in range that matches the filter
    pub fn get_metrics(&self, range: TimeRange, filter: &MetricFilter) -> Vec<MetricSample> {
        self.samples
            .iter()
            .filter(|sample| range.contains(sample.timestamp) && filter.matches(sample))
            .cloned()
            .collect()
    }

    /// Samples ingested after the given sequence number, oldest first
    pub fn samples_after(&self, seq: Option<u64>) -> Vec<MetricSample> {
        self.samples
            .iter()
            .filter(|sample| seq.map_or(true, |after| sample.seq > after))
            .cloned()
            .collect()
    }

    /// Stored samples of the given kinds, oldest first
    pub fn samples_of_kinds(&self, kinds: &BTreeSet<MetricKind>) -> Vec<MetricSample> {
        self.samples
            .iter()
            .filter(|sample| kinds.contains(&sample.kind))
            .cloned()
            .collect()
    }

    /// Last value per kind among samples ingested after `seq`
    pub fn snapshot_after(&self, seq: Option<u64>) -> MetricSnapshot {
        let mut snapshot = MetricSnapshot::new();
        for sample in self
            .samples
            .iter()
            .filter(|sample| seq.map_or(true, |after| sample.seq > after))
        {
            snapshot.set(sample.kind, sample.value);
        }
        snapshot
    }

    /// Sequence number of the newest stored sample
    pub fn last_seq(&self) -> Option<u64> {
        self.samples.back().map(|sample| sample.seq)
    }

    /// Windowed statistics for every kind present in range
    pub fn get_aggregated_metrics(&self, range: TimeRange) -> MetricAggregates {
        let mut series: BTreeMap<MetricKind, Vec<f64>> = BTreeMap::new();
        let mut sample_count = 0;
        for sample in self.samples.iter().filter(|s| range.contains(s.timestamp)) {
            series.entry(sample.kind).or_default().push(sample.value);
            sample_count += 1;
        }

        let metrics = series
            .into_iter()
            .filter_map(|(kind, values)| {
                KindAggregate::from_series(kind, &values).map(|aggregate| (kind, aggregate))
            })
            .collect();

        MetricAggregates {
            range,
            sample_count,
            metrics,
        }
    }

    /// Check the recent memory series for sustained growth
    ///
    /// A flagged leak is also appended to the leak history.
    pub fn detect_memory_leaks(&mut self) -> Vec<MemoryLeak> {
        self.detect_memory_leaks_at(Utc::now())
    }

    pub fn detect_memory_leaks_at(&mut self, now: Timestamp) -> Vec<MemoryLeak> {
        let series: Vec<(Timestamp, f64)> = self
            .samples
            .iter()
            .filter(|sample| sample.kind == MetricKind::MemoryUsage)
            .map(|sample| (sample.timestamp, sample.value))
            .collect();

        match detect_leak(&series, &self.config, now) {
            Some(leak) => {
                warn!(
                    "Memory leak suspected: +{:.1}MB ({:.1}MB/min, {})",
                    leak.growth_mb,
                    leak.growth_rate_mb_per_min,
                    leak.severity.as_str()
                );
                self.leaks.push(leak.clone());
                if self.leaks.len() > MAX_LEAK_HISTORY {
                    let excess = self.leaks.len() - MAX_LEAK_HISTORY;
                    self.leaks.drain(..excess);
                }
                vec![leak]
            }
            None => Vec::new(),
        }
    }

    /// Leak reports detected so far, oldest first
    pub fn memory_leaks(&self) -> &[MemoryLeak] {
        &self.leaks
    }

    pub fn get_session(&self, session_id: &str) -> Option<&SessionSummary> {
        self.sessions.get(session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionSummary> {
        self.sessions.values()
    }

    /// Most recent value recorded for each kind
    pub fn latest_snapshot(&self) -> MetricSnapshot {
        self.latest.clone()
    }

    /// Remove samples, sessions and leak reports older than `cutoff`
    ///
    /// # Returns
    ///
    /// Number of samples removed
    pub fn prune_older_than(&mut self, cutoff: Timestamp) -> usize {
        let before = self.samples.len();
        self.samples.retain(|sample| sample.timestamp >= cutoff);
        self.sessions.retain(|_, session| session.last_seen >= cutoff);
        self.leaks.retain(|leak| leak.detected_at >= cutoff);
        let stale: Vec<MetricKind> = self
            .latest
            .iter()
            .map(|(kind, _)| kind)
            .filter(|kind| !self.samples.iter().any(|sample| sample.kind == *kind))
            .collect();
        for kind in stale {
            self.latest.remove(kind);
        }
        before - self.samples.len()
    }

    /// Apply the configured retention window relative to `now`
    pub fn prune_expired_at(&mut self, now: Timestamp) -> usize {
        let retention = Duration::hours(self.config.retention_hours as i64);
        self.prune_older_than(now - retention)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Export the sample buffer
    ///
    /// The structured format also carries sessions, leak history and
    /// aggregates over the whole buffer; the tabular format is one CSV row
    /// per sample.
    pub fn export_metrics(&self, format: ExportFormat) -> Result<String, ExportError> {
        self.export_metrics_at(format, Utc::now())
    }

    pub fn export_metrics_at(
        &self,
        format: ExportFormat,
        now: Timestamp,
    ) -> Result<String, ExportError> {
        match format {
            ExportFormat::Structured => {
                let timestamps = self.samples.iter().map(|s| s.timestamp);
                let start = timestamps.clone().min().map_or(now, |t| t.min(now));
                let end = timestamps.max().map_or(now, |t| t.max(now));
                export::to_structured(&MetricsExport {
                    exported_at: now,
                    samples: self.samples.iter().cloned().collect(),
                    sessions: self.sessions.values().cloned().collect(),
                    memory_leaks: self.leaks.clone(),
                    aggregates: self.get_aggregated_metrics(TimeRange::new(start, end)),
                })
            }
            ExportFormat::Tabular => Ok(export::to_table(self.samples.iter())),
        }
    }
}
