//! Composed pipeline context and its periodic tick
//!
//! One `ObservabilityContext` owns the metrics store, regression detector,
//! alert manager and error tracker for the process and is passed explicitly
//! to instrumented call sites. Ingestion runs synchronously on the caller's
//! thread; `tick` drives the periodic work in a fixed order:
//!
//! 1. drain captured panics and task failures into the error tracker
//! 2. record process metrics from the platform probe (session `system`)
//! 3. feed new samples through trend and regression checks, raising alerts
//! 4. look for memory leaks, raising alerts
//! 5. evaluate values recorded since the previous tick against the thresholds
//! 6. run due auto-resolutions and suppression expiries
//! 7. prune samples past the retention window

use crate::alerts::{Alert, AlertDraft, AlertManager, AlertType};
use crate::config::Config;
use crate::error::ExportError;
use crate::events::{
    MetricKind, MetricSample, MetricSnapshot, RegressionSeverity, Severity, Timestamp,
};
use crate::export::{self, ExportFormat};
use crate::platform::PlatformMetrics;
use crate::regression::{Regression, RegressionDetector};
use crate::store::{MemoryLeak, MetricsStore, RecordContext};
use crate::tracking::{ErrorInput, ErrorTracker, GlobalCapture, TrackContext};
use chrono::Utc;
use log::{debug, error, info};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Session id used for process metrics collected on tick
pub const SYSTEM_SESSION: &str = "system";

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub captured_errors: usize,
    pub system_samples: usize,
    pub regressions: Vec<Regression>,
    pub leaks: Vec<MemoryLeak>,
    /// Alerts created or updated during the tick
    pub alerts: Vec<Alert>,
    pub auto_resolved: usize,
    pub pruned_samples: usize,
}

/// The pipeline's components, composed
#[derive(Debug)]
pub struct ObservabilityContext {
    config: Config,
    metrics: MetricsStore,
    regressions: RegressionDetector,
    alerts: AlertManager,
    errors: ErrorTracker,
    platform: PlatformMetrics,
    capture: GlobalCapture,
    /// Sequence number of the last sample fed to the regression detector
    processed_seq: Option<u64>,
    checked_seq: Option<u64>,
}

impl Default for ObservabilityContext {
    fn default() -> Self {
        Self::new(Config::default(), PlatformMetrics::Unavailable)
    }
}

impl ObservabilityContext {
    /// Build every component from one configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Validated pipeline configuration
    /// * `platform` - Host capability used for system metrics and error context
    pub fn new(config: Config, platform: PlatformMetrics) -> Self {
        let mut regressions = RegressionDetector::new(config.regression.clone());
        if !config.features.regression_detection {
            regressions.disable();
        }

        Self {
            metrics: MetricsStore::new(config.collection.clone()),
            alerts: AlertManager::new(config.alerts.clone(), config.thresholds.clone()),
            errors: ErrorTracker::new(
                config.errors.clone(),
                config.environment,
                platform.clone(),
            ),
            regressions,
            platform,
            capture: GlobalCapture::default(),
            processed_seq: None,
            checked_seq: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsStore {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut MetricsStore {
        &mut self.metrics
    }

    pub fn regressions(&self) -> &RegressionDetector {
        &self.regressions
    }

    pub fn regressions_mut(&mut self) -> &mut RegressionDetector {
        &mut self.regressions
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    pub fn alerts_mut(&mut self) -> &mut AlertManager {
        &mut self.alerts
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    pub fn errors_mut(&mut self) -> &mut ErrorTracker {
        &mut self.errors
    }

    pub fn capture(&self) -> &GlobalCapture {
        &self.capture
    }

    /// Start recording panics into the capture inbox
    pub fn install_capture(&self) {
        if self.config.features.error_tracking {
            self.capture.install();
        }
    }

    /// Record a partial sample
    ///
    /// With real-time alerts on, the recorded fields are checked against the
    /// thresholds immediately.
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
        if !self.config.enabled || !self.config.features.performance_monitoring {
            return Vec::new();
        }

        let samples = self.metrics.record_at(session_id, metrics, context, now);
        if self.realtime_alerts() && !samples.is_empty() {
            self.alerts.check_metrics_at(metrics, now);
        }
        samples
    }

    /// Track an error
    ///
    /// # Returns
    ///
    /// The record id, or `None` when error tracking is switched off
    pub fn track_error(
        &mut self,
        input: impl Into<ErrorInput>,
        context: TrackContext,
    ) -> Option<String> {
        if !self.config.enabled || !self.config.features.error_tracking {
            return None;
        }
        Some(self.errors.track_error(input, context))
    }

    fn realtime_alerts(&self) -> bool {
        self.config.features.real_time_alerts && self.config.alerts.realtime_checks
    }

    pub fn tick(&mut self) -> TickReport {
        self.tick_at(Utc::now())
    }

    pub fn tick_at(&mut self, now: Timestamp) -> TickReport {
        let mut report = TickReport::default();
        if !self.config.enabled {
            return report;
        }
        let features = self.config.features.clone();

        if features.error_tracking {
            report.captured_errors = self.errors.drain_captured(&self.capture);
        }

        if features.performance_monitoring {
            report.system_samples = self.collect_system_metrics(now);
        }

        if features.regression_detection && self.regressions.is_enabled() {
            report.regressions = self.run_regression_checks(now);
            for regression in &report.regressions {
                if let Some(alert) = self.alerts.create_alert_at(regression_alert(regression), now) {
                    report.alerts.push(alert);
                }
            }
        }

        if features.performance_monitoring {
            report.leaks = self.metrics.detect_memory_leaks_at(now);
            for leak in &report.leaks {
                if let Some(alert) = self.alerts.create_alert_at(leak_alert(leak), now) {
                    report.alerts.push(alert);
                }
            }
        }

        if features.real_time_alerts {
            let snapshot = self.metrics.snapshot_after(self.checked_seq);
            self.checked_seq = self.metrics.last_seq().or(self.checked_seq);
            if !snapshot.is_empty() {
                report.alerts.extend(self.alerts.check_metrics_at(&snapshot, now));
            }
        }

        report.auto_resolved = self.alerts.tick_at(now);
        report.pruned_samples = self.metrics.prune_expired_at(now);

        debug!(
            "Tick: {} captured, {} system samples, {} regressions, {} leaks, {} alerts",
            report.captured_errors,
            report.system_samples,
            report.regressions.len(),
            report.leaks.len(),
            report.alerts.len()
        );
        report
    }

    fn collect_system_metrics(&mut self, now: Timestamp) -> usize {
        let mut snapshot = MetricSnapshot::new();
        if let Some(memory) = self.platform.memory_usage_mb() {
            snapshot.set(MetricKind::MemoryUsage, memory);
        }
        if let Some(cpu) = self.platform.cpu_usage_percent() {
            snapshot.set(MetricKind::CpuUsage, cpu);
        }
        if snapshot.is_empty() {
            return 0;
        }
        self.metrics
            .record_at(
                SYSTEM_SESSION,
                &snapshot,
                &RecordContext::default().component(SYSTEM_SESSION),
                now,
            )
            .len()
    }

    /// Feed samples ingested since the last tick to the detector
    ///
    /// Kinds without a baseline get one from the stored history once enough
    /// samples exist; their samples only extend the trend on that tick, so a
    /// baseline is never checked against the values it was built from.
    fn run_regression_checks(&mut self, now: Timestamp) -> Vec<Regression> {
        let fresh = self.metrics.samples_after(self.processed_seq);
        let Some(last) = fresh.last() else {
            return Vec::new();
        };
        self.processed_seq = Some(last.seq);

        let missing: BTreeSet<MetricKind> = fresh
            .iter()
            .map(|sample| sample.kind)
            .filter(|kind| !self.regressions.has_baseline(*kind))
            .collect();
        if !missing.is_empty() {
            let history = self.metrics.samples_of_kinds(&missing);
            self.regressions
                .establish_baselines_from_samples_at(&history, now);
        }

        let (checked, warming): (Vec<MetricSample>, Vec<MetricSample>) = fresh
            .into_iter()
            .partition(|sample| !missing.contains(&sample.kind));
        for sample in &warming {
            self.regressions
                .update_trend(sample.kind, sample.value, sample.timestamp);
        }
        self.regressions.process_samples_at(&checked, now)
    }

    /// Cancel timed alert work and stop recording panics
    pub fn shutdown(&mut self) {
        self.alerts.shutdown();
        self.capture.uninstall();
        info!("Observability context shut down");
    }

    /// Write every buffer export into a directory
    ///
    /// Produces `metrics`, `alerts` and `errors` files in the requested format
    /// plus `regressions.json`, which only has a structured form.
    ///
    /// # Returns
    ///
    /// The paths written
    pub fn export_to_dir(
        &self,
        dir: &Path,
        format: ExportFormat,
    ) -> Result<Vec<PathBuf>, ExportError> {
        std::fs::create_dir_all(dir)?;
        let extension = match format {
            ExportFormat::Structured => "json",
            ExportFormat::Tabular => "csv",
        };

        let documents = [
            ("metrics", extension, self.metrics.export_metrics(format)?),
            ("alerts", extension, self.alerts.export_alerts(format)?),
            ("errors", extension, self.errors.export_errors(format)?),
            ("regressions", "json", self.regressions.export_data()?),
        ];

        let mut written = Vec::with_capacity(documents.len());
        for (name, extension, contents) in documents {
            let path = dir.join(format!("{}.{}", name, extension));
            export::write_export(&path, &contents)?;
            written.push(path);
        }
        info!("Exported {} files to {}", written.len(), dir.display());
        Ok(written)
    }
}

fn alert_severity(severity: RegressionSeverity) -> Severity {
    match severity {
        RegressionSeverity::Severe => Severity::High,
        RegressionSeverity::Moderate => Severity::Medium,
        RegressionSeverity::Minor => Severity::Low,
    }
}

fn regression_alert(regression: &Regression) -> AlertDraft {
    let kind = regression.metric;
    AlertDraft::new(
        AlertType::for_metric(kind),
        alert_severity(regression.severity),
        format!("Performance Regression: {}", kind.display_name()),
        format!(
            "{} changed by {:.1}% from baseline {:.1}. {}",
            kind.display_name(),
            regression.change_percent,
            regression.previous_value,
            regression.root_cause
        ),
    )
    .metric(kind)
    .value(regression.current_value)
    .threshold(regression.previous_value)
}

fn leak_alert(leak: &MemoryLeak) -> AlertDraft {
    AlertDraft::new(
        AlertType::Memory,
        alert_severity(leak.severity),
        "Memory Leak Detected",
        format!(
            "Memory grew {:.1}MB ({:.0}%) at {:.2}MB/min; now {:.1}MB",
            leak.growth_mb,
            leak.growth_ratio * 100.0,
            leak.growth_rate_mb_per_min,
            leak.current_size_mb
        ),
    )
    .metric(MetricKind::MemoryUsage)
    .value(leak.current_size_mb)
}

/// Handle to a running tick loop
///
/// Dropping the handle stops the loop.
#[derive(Debug)]
pub struct TickHandle {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TickHandle {
    /// Stop the loop and wait for the in-flight tick to finish
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        if let Some(sender) = self.shutdown.take() {
            let _ = sender.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Tick thread panicked");
            }
        }
    }
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Tick the shared context on a background thread every `interval`
pub fn spawn_tick_loop(
    context: Arc<Mutex<ObservabilityContext>>,
    interval: Duration,
) -> std::io::Result<TickHandle> {
    let (shutdown_sender, shutdown_receiver) = mpsc::channel::<()>();

    let thread = std::thread::Builder::new()
        .name("lookout-tick".to_string())
        .spawn(move || {
            info!("Tick loop started ({:?} interval)", interval);
            loop {
                match shutdown_receiver.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let mut context = context
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        context.tick();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!("Tick loop stopped");
        })?;

    Ok(TickHandle {
        shutdown: Some(shutdown_sender),
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertFilter;
    use crate::platform::MockPlatformProbe;
    use crate::regression::Baseline;
    use crate::tracking::{ErrorFilter, ErrorSource};
    use chrono::Duration as ChronoDuration;

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.alerts.realtime_checks = false;
        config
    }

    #[test]
    fn test_record_checks_thresholds_in_real_time() {
        let mut context = ObservabilityContext::default();
        context.record(
            "s1",
            &MetricSnapshot::new().with(MetricKind::ResponseTime, 35000.0),
            &RecordContext::default(),
        );

        let alerts = context.alerts().get_active_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn test_disabled_features_skip_ingestion() {
        let mut config = Config::default();
        config.features.performance_monitoring = false;
        config.features.error_tracking = false;
        let mut context = ObservabilityContext::new(config, PlatformMetrics::Unavailable);

        let samples = context.record(
            "s1",
            &MetricSnapshot::new().with(MetricKind::Fps, 10.0),
            &RecordContext::default(),
        );
        assert!(samples.is_empty());
        assert!(context.track_error("boom", TrackContext::default()).is_none());
        assert!(context.errors().is_empty());
    }

    #[test]
    fn test_tick_collects_system_metrics() {
        let mut probe = MockPlatformProbe::new();
        probe.expect_memory_usage_mb().returning(|| Ok(42.0));
        probe.expect_cpu_usage_percent().returning(|| Ok(12.5));
        probe.expect_runtime().returning(|| "test".to_string());
        probe.expect_viewport().returning(|| None);

        let mut context =
            ObservabilityContext::new(quiet_config(), PlatformMetrics::available(probe));
        let report = context.tick();

        assert_eq!(report.system_samples, 2);
        let session = context.metrics().get_session(SYSTEM_SESSION).unwrap();
        assert_eq!(session.average(MetricKind::MemoryUsage), Some(42.0));
    }

    #[test]
    fn test_tick_without_platform_records_nothing() {
        let mut context = ObservabilityContext::default();
        let report = context.tick();
        assert_eq!(report.system_samples, 0);
        assert!(context.metrics().is_empty());
    }

    #[test]
    fn test_tick_establishes_baselines_then_raises_regressions() {
        let mut context = ObservabilityContext::new(quiet_config(), PlatformMetrics::Unavailable);
        let start = Utc::now();

        for i in 0..10 {
            context.record_at(
                "s1",
                &MetricSnapshot::new().with(MetricKind::ResponseTime, 100.0),
                &RecordContext::default(),
                start + ChronoDuration::seconds(i),
            );
        }
        let first = context.tick_at(start + ChronoDuration::seconds(10));
        assert!(first.regressions.is_empty());
        assert!(context.regressions().has_baseline(MetricKind::ResponseTime));

        context.record_at(
            "s1",
            &MetricSnapshot::new().with(MetricKind::ResponseTime, 160.0),
            &RecordContext::default(),
            start + ChronoDuration::seconds(11),
        );
        let second = context.tick_at(start + ChronoDuration::seconds(12));

        assert_eq!(second.regressions.len(), 1);
        assert_eq!(second.regressions[0].severity, RegressionSeverity::Severe);
        let alert = second
            .alerts
            .iter()
            .find(|a| a.title.starts_with("Performance Regression"))
            .unwrap();
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.alert_type, AlertType::Performance);

        // Already processed samples are not checked again
        let third = context.tick_at(start + ChronoDuration::seconds(13));
        assert!(third.regressions.is_empty());
    }

    #[test]
    fn test_resolved_alert_stays_resolved_across_ticks() {
        let mut context = ObservabilityContext::new(quiet_config(), PlatformMetrics::Unavailable);
        let start = Utc::now();
        context.record_at(
            "s1",
            &MetricSnapshot::new().with(MetricKind::ResponseTime, 35000.0),
            &RecordContext::default(),
            start,
        );

        let first = context.tick_at(start + ChronoDuration::seconds(1));
        assert_eq!(first.alerts.len(), 1);
        let id = first.alerts[0].id.clone();
        assert!(context
            .alerts_mut()
            .resolve_alert_at(&id, None, start + ChronoDuration::seconds(2)));

        for offset in [
            ChronoDuration::seconds(3),
            ChronoDuration::hours(25),
            ChronoDuration::hours(26),
        ] {
            let report = context.tick_at(start + offset);
            assert!(report.alerts.is_empty());
        }
        assert!(context.alerts().get_active_alerts().is_empty());
        assert_eq!(context.alerts().len(), 1);
    }

    #[test]
    fn test_tick_checks_values_recorded_since_previous_tick() {
        let mut context = ObservabilityContext::new(quiet_config(), PlatformMetrics::Unavailable);
        let start = Utc::now();
        context.tick_at(start);

        context.record_at(
            "s1",
            &MetricSnapshot::new().with(MetricKind::ErrorRate, 0.5),
            &RecordContext::default(),
            start + ChronoDuration::seconds(1),
        );
        let report = context.tick_at(start + ChronoDuration::seconds(2));
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn test_regression_detection_toggle() {
        let mut config = quiet_config();
        config.features.regression_detection = false;
        let mut context = ObservabilityContext::new(config, PlatformMetrics::Unavailable);
        context.regressions_mut().set_baseline(Baseline {
            kind: MetricKind::ResponseTime,
            value: 100.0,
            confidence: 0.5,
            sample_size: 10,
            timestamp: Utc::now(),
        });

        context.record(
            "s1",
            &MetricSnapshot::new().with(MetricKind::ResponseTime, 500.0),
            &RecordContext::default(),
        );
        assert!(context.tick().regressions.is_empty());
    }

    #[test]
    fn test_tick_raises_leak_alert() {
        let mut context = ObservabilityContext::new(quiet_config(), PlatformMetrics::Unavailable);
        let start = Utc::now();
        for i in 0..20 {
            context.record_at(
                "s1",
                &MetricSnapshot::new().with(MetricKind::MemoryUsage, 50.0 + i as f64 * 20.0 / 19.0),
                &RecordContext::default(),
                start + ChronoDuration::seconds(i * 5),
            );
        }

        let report = context.tick_at(start + ChronoDuration::seconds(100));
        assert_eq!(report.leaks.len(), 1);
        assert!(report
            .alerts
            .iter()
            .any(|a| a.title == "Memory Leak Detected" && a.alert_type == AlertType::Memory));
    }

    #[test]
    fn test_tick_drains_captured_failures() {
        let mut context = ObservabilityContext::default();
        context.capture().record_task_failure("background sync failed");

        let report = context.tick();
        assert_eq!(report.captured_errors, 1);
        let errors = context.errors().get_errors(&ErrorFilter::default());
        assert_eq!(errors[0].source, ErrorSource::System);
        assert_eq!(errors[0].severity, Severity::High);
    }

    #[test]
    fn test_tick_runs_auto_resolution_and_pruning() {
        let mut context = ObservabilityContext::new(quiet_config(), PlatformMetrics::Unavailable);
        let start = Utc::now();
        context.alerts_mut().create_alert_at(
            AlertDraft::new(AlertType::UserExperience, Severity::Low, "minor", ""),
            start,
        );
        context.record_at(
            "s1",
            &MetricSnapshot::new().with(MetricKind::Throughput, 10.0),
            &RecordContext::default(),
            start,
        );

        let report = context.tick_at(start + ChronoDuration::hours(25));
        assert_eq!(report.auto_resolved, 1);
        assert_eq!(report.pruned_samples, 1);
        assert!(context
            .alerts()
            .get_alerts(&AlertFilter::unresolved())
            .is_empty());
    }

    #[test]
    fn test_disabled_context_does_nothing_on_tick() {
        let mut config = Config::default();
        config.enabled = false;
        let mut context = ObservabilityContext::new(config, PlatformMetrics::Unavailable);
        context.capture().record_task_failure("ignored");

        assert_eq!(context.tick(), TickReport::default());
        assert_eq!(context.capture().len(), 1);
    }

    #[test]
    fn test_export_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = ObservabilityContext::default();
        context.record(
            "s1",
            &MetricSnapshot::new().with(MetricKind::ResponseTime, 20000.0),
            &RecordContext::default(),
        );
        context.track_error("boom", TrackContext::default());

        let written = context
            .export_to_dir(dir.path(), ExportFormat::Tabular)
            .unwrap();
        assert_eq!(written.len(), 4);
        assert!(dir.path().join("metrics.csv").exists());
        assert!(dir.path().join("alerts.csv").exists());
        assert!(dir.path().join("errors.csv").exists());
        assert!(dir.path().join("regressions.json").exists());
    }

    #[test]
    fn test_tick_loop_stops_through_handle() {
        let context = Arc::new(Mutex::new(ObservabilityContext::default()));
        context
            .lock()
            .unwrap()
            .capture()
            .record_task_failure("loop failure");

        let handle = spawn_tick_loop(Arc::clone(&context), Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        handle.stop();

        let context = context.lock().unwrap();
        assert_eq!(context.errors().len(), 1);
        assert!(context.capture().is_empty());
    }
}
