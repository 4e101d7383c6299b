//! Alert lifecycle: threshold checks, deduplication, suppression,
//! auto-resolution, actions and export

use crate::alerts::dispatch::HandlerRegistry;
use crate::alerts::thresholds::{Breach, ThresholdTable, Tier};
use crate::config::AlertConfig;
use crate::error::{ExportError, HandlerError};
use crate::events::{
    Direction, MetricKind, MetricSnapshot, Severity, ThresholdCategory, TimeRange, Timestamp,
};
use crate::export::{self, cell, ExportFormat, TabularRow};
use crate::scheduler::{CancellationToken, Scheduler};
use chrono::{Duration, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Resolution note recorded when a low severity alert times out
pub const AUTO_RESOLUTION: &str = "Auto-resolved after timeout";

/// Broad area an alert belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum AlertType {
    Performance,
    Error,
    Memory,
    Bundle,
    UserExperience,
}

impl AlertType {
    /// Alert type raised for a threshold breach on this metric
    pub fn for_metric(kind: MetricKind) -> Self {
        match kind.category() {
            ThresholdCategory::Performance | ThresholdCategory::System => AlertType::Performance,
            ThresholdCategory::Memory => AlertType::Memory,
            ThresholdCategory::ErrorRate => AlertType::Error,
            ThresholdCategory::BundleSize => AlertType::Bundle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::Performance => "performance",
            AlertType::Error => "error",
            AlertType::Memory => "memory",
            AlertType::Bundle => "bundle",
            AlertType::UserExperience => "user-experience",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Manual,
    Automatic,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Remediation step attached to an alert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertAction {
    pub id: String,
    pub label: String,
    pub kind: ActionKind,
    pub status: ActionStatus,
    pub result: Option<String>,
}

impl AlertAction {
    fn pending(label: &str, kind: ActionKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.to_string(),
            kind,
            status: ActionStatus::Pending,
            result: None,
        }
    }
}

/// A raised alert and its lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub metric: Option<MetricKind>,
    pub current_value: Option<f64>,
    pub threshold: Option<f64>,
    /// Time of the latest occurrence
    pub timestamp: Timestamp,
    pub resolved: bool,
    pub resolved_at: Option<Timestamp>,
    pub actions: Vec<AlertAction>,
    /// Number of times this alert was raised while unresolved
    pub occurrences: u32,
}

impl TabularRow for Alert {
    fn header() -> &'static [&'static str] {
        &[
            "id",
            "type",
            "severity",
            "title",
            "message",
            "metric",
            "current_value",
            "threshold",
            "timestamp",
            "resolved",
            "resolved_at",
            "occurrences",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.alert_type.as_str().to_string(),
            self.severity.to_string(),
            self.title.clone(),
            self.message.clone(),
            cell(&self.metric),
            cell(&self.current_value),
            cell(&self.threshold),
            self.timestamp.to_rfc3339(),
            self.resolved.to_string(),
            cell(&self.resolved_at.map(|t| t.to_rfc3339())),
            self.occurrences.to_string(),
        ]
    }
}

/// Input for `create_alert`
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDraft {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub metric: Option<MetricKind>,
    pub current_value: Option<f64>,
    pub threshold: Option<f64>,
}

impl AlertDraft {
    pub fn new(
        alert_type: AlertType,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            severity,
            title: title.into(),
            message: message.into(),
            metric: None,
            current_value: None,
            threshold: None,
        }
    }

    pub fn metric(mut self, kind: MetricKind) -> Self {
        self.metric = Some(kind);
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.current_value = Some(value);
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Draft for a threshold breach
    ///
    /// The critical tier maps to critical severity; the warning tier uses the
    /// metric's own warning severity.
    pub fn from_breach(breach: &Breach) -> Self {
        let kind = breach.kind;
        let severity = match breach.tier {
            Tier::Critical => Severity::Critical,
            Tier::Warning => kind.warning_severity(),
        };
        let rising = kind.direction() == Direction::IncreaseIsBad;
        let title = match (breach.tier, rising) {
            (Tier::Critical, _) => format!("Critical {}", kind.display_name()),
            (Tier::Warning, true) => format!("High {}", kind.display_name()),
            (Tier::Warning, false) => format!("Low {}", kind.display_name()),
        };
        let tier = match breach.tier {
            Tier::Critical => "critical",
            Tier::Warning => "warning",
        };
        let relation = if rising { "exceeds" } else { "is below" };
        let message = format!(
            "{} {} {} {} threshold ({})",
            kind.display_name(),
            format_value(kind, breach.value),
            relation,
            tier,
            format_value(kind, breach.threshold)
        );

        Self::new(AlertType::for_metric(kind), severity, title, message)
            .metric(kind)
            .value(breach.value)
            .threshold(breach.threshold)
    }
}

/// Human-readable value with the metric's unit
pub fn format_value(kind: MetricKind, value: f64) -> String {
    match kind.unit() {
        "ratio" => format!("{:.1}%", value * 100.0),
        "bytes" => format!("{:.1}MB", value / 1024.0 / 1024.0),
        "%" => format!("{:.1}%", value),
        unit => format!("{:.1}{}", value, unit),
    }
}

/// Alert query filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertFilter {
    pub types: Option<Vec<AlertType>>,
    pub severities: Option<Vec<Severity>>,
    pub resolved: Option<bool>,
    pub range: Option<TimeRange>,
    pub limit: Option<usize>,
}

impl AlertFilter {
    pub fn unresolved() -> Self {
        Self {
            resolved: Some(false),
            ..Self::default()
        }
    }

    fn matches(&self, alert: &Alert) -> bool {
        self.types
            .as_ref()
            .map_or(true, |types| types.contains(&alert.alert_type))
            && self
                .severities
                .as_ref()
                .map_or(true, |severities| severities.contains(&alert.severity))
            && self.resolved.map_or(true, |resolved| alert.resolved == resolved)
            && self.range.map_or(true, |range| range.contains(alert.timestamp))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertStats {
    pub total: usize,
    pub active: usize,
    pub resolved: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_type: BTreeMap<AlertType, usize>,
    /// Resolved share of all alerts, in [0, 1]
    pub resolution_rate: f64,
    pub average_resolution_ms: f64,
    pub alerts_per_hour: f64,
}

/// Alert suppression key; `None` fields match any value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Suppression {
    pub alert_type: AlertType,
    pub metric: Option<MetricKind>,
    pub severity: Option<Severity>,
}

impl Suppression {
    pub fn matches(&self, draft: &AlertDraft) -> bool {
        self.alert_type == draft.alert_type
            && self.metric.map_or(true, |metric| draft.metric == Some(metric))
            && self.severity.map_or(true, |severity| draft.severity == severity)
    }
}

#[derive(Debug)]
struct ActiveSuppression {
    id: u64,
    key: Suppression,
    expiry: Option<CancellationToken>,
}

#[derive(Debug, Clone, PartialEq)]
enum AlertTask {
    AutoResolve(String),
    LiftSuppression(u64),
}

/// Structured alert export document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertsExport {
    pub exported_at: Timestamp,
    pub alerts: Vec<Alert>,
    pub stats: AlertStats,
    pub thresholds: ThresholdTable,
}

/// Threshold evaluation and alert lifecycle management
///
/// Alerts are deduplicated by (type, metric, severity) among unresolved
/// alerts: a repeat breach updates the existing record instead of adding a
/// new one. Timed work (auto-resolution of low severity alerts, suppression
/// expiry) is queued on an internal scheduler and only runs from `tick_at`.
///
/// Every created or updated alert is written to the log and then handed to
/// the registered handlers. Handlers only receive a shared reference to the
/// alert, so they cannot call back into the manager while it is dispatching.
#[derive(Debug)]
pub struct AlertManager {
    config: AlertConfig,
    thresholds: ThresholdTable,
    alerts: Vec<Alert>,
    handlers: HandlerRegistry<Alert>,
    suppressions: Vec<ActiveSuppression>,
    next_suppression_id: u64,
    scheduler: Scheduler<AlertTask>,
    auto_resolve: HashMap<String, CancellationToken>,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(AlertConfig::default(), ThresholdTable::default())
    }
}

impl AlertManager {
    /// Create an alert manager
    ///
    /// # Arguments
    ///
    /// * `config` - Buffer limits and auto-resolution delay
    /// * `thresholds` - Two-tier limits per metric kind
    pub fn new(config: AlertConfig, thresholds: ThresholdTable) -> Self {
        Self {
            config,
            thresholds,
            alerts: Vec::new(),
            handlers: HandlerRegistry::new(),
            suppressions: Vec::new(),
            next_suppression_id: 0,
            scheduler: Scheduler::new(),
            auto_resolve: HashMap::new(),
        }
    }

    /// Evaluate every present field of a snapshot against the thresholds
    ///
    /// # Returns
    ///
    /// The alerts created or updated by this check
    pub fn check_metrics(&mut self, snapshot: &MetricSnapshot) -> Vec<Alert> {
        self.check_metrics_at(snapshot, Utc::now())
    }

    pub fn check_metrics_at(&mut self, snapshot: &MetricSnapshot, now: Timestamp) -> Vec<Alert> {
        let breaches: Vec<Breach> = snapshot
            .iter()
            .filter_map(|(kind, value)| self.thresholds.evaluate(kind, value))
            .collect();

        breaches
            .iter()
            .filter_map(|breach| self.create_alert_at(AlertDraft::from_breach(breach), now))
            .collect()
    }

    /// Raise an alert, or refresh the matching unresolved one
    ///
    /// # Returns
    ///
    /// The created or updated alert, or `None` when the draft is suppressed
    pub fn create_alert(&mut self, draft: AlertDraft) -> Option<Alert> {
        self.create_alert_at(draft, Utc::now())
    }

    pub fn create_alert_at(&mut self, draft: AlertDraft, now: Timestamp) -> Option<Alert> {
        if self.is_suppressed(&draft) {
            debug!(
                "Suppressed {} alert: {}",
                draft.alert_type.as_str(),
                draft.title
            );
            return None;
        }

        let existing = self.alerts.iter_mut().find(|alert| {
            !alert.resolved
                && alert.alert_type == draft.alert_type
                && alert.metric == draft.metric
                && alert.severity == draft.severity
        });

        if let Some(alert) = existing {
            alert.current_value = draft.current_value;
            alert.message = draft.message;
            alert.timestamp = now;
            alert.occurrences += 1;
            let updated = alert.clone();
            self.notify(&updated);
            return Some(updated);
        }

        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            actions: generate_actions(&draft),
            alert_type: draft.alert_type,
            severity: draft.severity,
            title: draft.title,
            message: draft.message,
            metric: draft.metric,
            current_value: draft.current_value,
            threshold: draft.threshold,
            timestamp: now,
            resolved: false,
            resolved_at: None,
            occurrences: 1,
        };

        if alert.severity == Severity::Low {
            let due = now + Duration::seconds(self.config.auto_resolve_low_after_seconds as i64);
            let token = self
                .scheduler
                .schedule(due, AlertTask::AutoResolve(alert.id.clone()));
            self.auto_resolve.insert(alert.id.clone(), token);
        }

        self.alerts.push(alert.clone());
        self.notify(&alert);
        self.enforce_capacity();
        Some(alert)
    }

    fn enforce_capacity(&mut self) {
        if self.alerts.len() <= self.config.max_alerts {
            return;
        }
        let excess = self.alerts.len() - self.config.trim_alerts_to;
        for evicted in self.alerts.drain(..excess) {
            if let Some(token) = self.auto_resolve.remove(&evicted.id) {
                token.cancel();
            }
        }
        debug!("Alert buffer overflow: evicted {} alerts", excess);
    }

    fn notify(&self, alert: &Alert) {
        log_alert(alert);
        self.handlers.dispatch(alert);
    }

    /// Mark an alert resolved
    ///
    /// # Returns
    ///
    /// `false` if the alert does not exist or is already resolved
    pub fn resolve_alert(&mut self, id: &str, resolution: Option<&str>) -> bool {
        self.resolve_alert_at(id, resolution, Utc::now())
    }

    pub fn resolve_alert_at(&mut self, id: &str, resolution: Option<&str>, now: Timestamp) -> bool {
        let Some(alert) = self
            .alerts
            .iter_mut()
            .find(|alert| alert.id == id && !alert.resolved)
        else {
            return false;
        };

        alert.resolved = true;
        alert.resolved_at = Some(now);
        if let Some(resolution) = resolution {
            alert.actions.push(AlertAction {
                id: uuid::Uuid::new_v4().to_string(),
                label: "Resolved".to_string(),
                kind: ActionKind::Manual,
                status: ActionStatus::Completed,
                result: Some(resolution.to_string()),
            });
        }
        info!("Alert resolved: {}", alert.title);

        if let Some(token) = self.auto_resolve.remove(id) {
            token.cancel();
        }
        true
    }

    /// Stop raising alerts that match a key
    ///
    /// `metric` and `severity` left as `None` match any value. With a
    /// duration, the suppression is lifted by the first tick after it
    /// elapses. Suppressing an existing key replaces its expiry.
    pub fn suppress_alert(
        &mut self,
        alert_type: AlertType,
        metric: Option<MetricKind>,
        severity: Option<Severity>,
        duration: Option<Duration>,
    ) {
        self.suppress_alert_at(alert_type, metric, severity, duration, Utc::now())
    }

    pub fn suppress_alert_at(
        &mut self,
        alert_type: AlertType,
        metric: Option<MetricKind>,
        severity: Option<Severity>,
        duration: Option<Duration>,
        now: Timestamp,
    ) {
        let key = Suppression {
            alert_type,
            metric,
            severity,
        };
        self.remove_suppressions(|existing| *existing == key);

        let id = self.next_suppression_id;
        self.next_suppression_id += 1;
        let expiry = duration.map(|duration| {
            self.scheduler
                .schedule(now + duration, AlertTask::LiftSuppression(id))
        });
        self.suppressions.push(ActiveSuppression { id, key, expiry });

        info!("Suppressing alerts: {}", describe_suppression(&key));
    }

    /// Lift suppressions
    ///
    /// With a type, removes the suppression with exactly that key; without
    /// one, removes every suppression.
    ///
    /// # Returns
    ///
    /// Number of suppressions removed
    pub fn clear_suppression(
        &mut self,
        alert_type: Option<AlertType>,
        metric: Option<MetricKind>,
        severity: Option<Severity>,
    ) -> usize {
        match alert_type {
            Some(alert_type) => {
                let key = Suppression {
                    alert_type,
                    metric,
                    severity,
                };
                self.remove_suppressions(|existing| *existing == key)
            }
            None => self.remove_suppressions(|_| true),
        }
    }

    fn remove_suppressions<F: Fn(&Suppression) -> bool>(&mut self, predicate: F) -> usize {
        let before = self.suppressions.len();
        self.suppressions.retain(|active| {
            if predicate(&active.key) {
                if let Some(token) = &active.expiry {
                    token.cancel();
                }
                false
            } else {
                true
            }
        });
        before - self.suppressions.len()
    }

    pub fn is_suppressed(&self, draft: &AlertDraft) -> bool {
        self.suppressions
            .iter()
            .any(|active| active.key.matches(draft))
    }

    pub fn suppressions(&self) -> Vec<Suppression> {
        self.suppressions.iter().map(|active| active.key).collect()
    }

    /// Run due timed work: auto-resolutions and suppression expiry
    ///
    /// # Returns
    ///
    /// Number of alerts auto-resolved
    pub fn tick(&mut self) -> usize {
        self.tick_at(Utc::now())
    }

    pub fn tick_at(&mut self, now: Timestamp) -> usize {
        let mut resolved = 0;
        for task in self.scheduler.take_due(now) {
            match task {
                AlertTask::AutoResolve(id) => {
                    self.auto_resolve.remove(&id);
                    if self.resolve_alert_at(&id, Some(AUTO_RESOLUTION), now) {
                        resolved += 1;
                    }
                }
                AlertTask::LiftSuppression(id) => {
                    if let Some(position) = self.suppressions.iter().position(|a| a.id == id) {
                        let lifted = self.suppressions.remove(position);
                        info!("Alert suppression expired: {}", describe_suppression(&lifted.key));
                    }
                }
            }
        }
        resolved
    }

    /// Cancel every pending timed task
    pub fn shutdown(&mut self) {
        self.scheduler.cancel_all();
        self.auto_resolve.clear();
        for active in &mut self.suppressions {
            active.expiry = None;
        }
    }

    /// Number of timed tasks still waiting
    pub fn pending_tasks(&self) -> usize {
        self.scheduler.pending()
    }

    /// Alerts matching the filter, most severe first, then newest first
    pub fn get_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        let mut matching: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|alert| filter.matches(alert))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        matching
    }

    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.get_alerts(&AlertFilter::unresolved())
    }

    pub fn get_alert(&self, id: &str) -> Option<Alert> {
        self.alerts.iter().find(|alert| alert.id == id).cloned()
    }

    /// Counts, resolution figures and alert rate
    ///
    /// Without a range the rate is taken over the span of the stored alerts.
    /// The rate divides by at least one hour.
    pub fn get_alert_stats(&self, range: Option<TimeRange>) -> AlertStats {
        let alerts: Vec<&Alert> = self
            .alerts
            .iter()
            .filter(|alert| range.map_or(true, |range| range.contains(alert.timestamp)))
            .collect();

        let mut stats = AlertStats {
            total: alerts.len(),
            ..AlertStats::default()
        };
        let mut resolution_ms = 0i64;
        let mut timed = 0usize;

        for alert in &alerts {
            *stats.by_severity.entry(alert.severity).or_insert(0) += 1;
            *stats.by_type.entry(alert.alert_type).or_insert(0) += 1;
            if alert.resolved {
                stats.resolved += 1;
                if let Some(resolved_at) = alert.resolved_at {
                    resolution_ms += resolved_at
                        .signed_duration_since(alert.timestamp)
                        .num_milliseconds()
                        .max(0);
                    timed += 1;
                }
            } else {
                stats.active += 1;
            }
        }

        if stats.total > 0 {
            stats.resolution_rate = stats.resolved as f64 / stats.total as f64;
        }
        if timed > 0 {
            stats.average_resolution_ms = resolution_ms as f64 / timed as f64;
        }

        let hours = match range {
            Some(range) => range.hours(),
            None => {
                let first = alerts.iter().map(|a| a.timestamp).min();
                let last = alerts.iter().map(|a| a.timestamp).max();
                match (first, last) {
                    (Some(first), Some(last)) => TimeRange::new(first, last).hours(),
                    _ => 0.0,
                }
            }
        };
        stats.alerts_per_hour = stats.total as f64 / hours.max(1.0);
        stats
    }

    /// Merge new limits over the current table
    pub fn update_thresholds(&mut self, thresholds: &ThresholdTable) {
        self.thresholds.merge(thresholds);
        info!("Monitoring thresholds updated");
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    /// Register a named alert handler, replacing one with the same name
    pub fn add_alert_handler<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&Alert) -> Result<(), HandlerError> + Send + 'static,
    {
        self.handlers.add(name, handler);
    }

    pub fn remove_alert_handler(&mut self, name: &str) -> bool {
        self.handlers.remove(name)
    }

    /// Mark an alert action as running
    pub fn start_action(&mut self, alert_id: &str, action_id: &str) -> bool {
        match self.find_action(alert_id, action_id) {
            Some(action) if action.status == ActionStatus::Pending => {
                action.status = ActionStatus::Running;
                true
            }
            _ => false,
        }
    }

    /// Record the outcome of an alert action
    ///
    /// # Returns
    ///
    /// `false` if the alert or action does not exist
    pub fn complete_action(
        &mut self,
        alert_id: &str,
        action_id: &str,
        outcome: Result<String, String>,
    ) -> bool {
        let Some(action) = self.find_action(alert_id, action_id) else {
            return false;
        };
        match outcome {
            Ok(result) => {
                action.status = ActionStatus::Completed;
                action.result = Some(result);
            }
            Err(reason) => {
                warn!("Alert action '{}' failed: {}", action.label, reason);
                action.status = ActionStatus::Failed;
                action.result = Some(reason);
            }
        }
        true
    }

    fn find_action(&mut self, alert_id: &str, action_id: &str) -> Option<&mut AlertAction> {
        self.alerts
            .iter_mut()
            .find(|alert| alert.id == alert_id)?
            .actions
            .iter_mut()
            .find(|action| action.id == action_id)
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Export alerts with statistics and thresholds
    pub fn export_alerts(&self, format: ExportFormat) -> Result<String, ExportError> {
        self.export_alerts_at(format, Utc::now())
    }

    pub fn export_alerts_at(
        &self,
        format: ExportFormat,
        now: Timestamp,
    ) -> Result<String, ExportError> {
        match format {
            ExportFormat::Structured => export::to_structured(&AlertsExport {
                exported_at: now,
                alerts: self.alerts.clone(),
                stats: self.get_alert_stats(None),
                thresholds: self.thresholds.clone(),
            }),
            ExportFormat::Tabular => Ok(export::to_table(self.alerts.iter())),
        }
    }
}

/// Always-on log sink for alerts
fn log_alert(alert: &Alert) {
    let line = format!(
        "ALERT [{}]: {} - {}",
        alert.severity.as_str().to_uppercase(),
        alert.title,
        alert.message
    );
    match alert.severity {
        Severity::Critical => error!("{}", line),
        Severity::High | Severity::Medium => warn!("{}", line),
        Severity::Low => info!("{}", line),
    }
}

fn generate_actions(draft: &AlertDraft) -> Vec<AlertAction> {
    let mut actions = vec![AlertAction::pending("Mark as Resolved", ActionKind::Manual)];

    match draft.alert_type {
        AlertType::Performance if draft.metric == Some(MetricKind::ResponseTime) => {
            actions.push(AlertAction::pending(
                "Run Performance Optimization",
                ActionKind::Automatic,
            ));
        }
        AlertType::Memory => {
            actions.push(AlertAction::pending(
                "Release Cached Memory",
                ActionKind::Automatic,
            ));
        }
        AlertType::Bundle => {
            actions.push(AlertAction::pending(
                "Analyze Bundle Size",
                ActionKind::Automatic,
            ));
        }
        AlertType::Error => {
            actions.push(AlertAction::pending(
                "Investigate Error Pattern",
                ActionKind::Manual,
            ));
        }
        _ => {}
    }

    if draft.severity == Severity::Critical {
        actions.push(AlertAction::pending("Escalate to Team", ActionKind::Manual));
    }
    actions
}

fn describe_suppression(key: &Suppression) -> String {
    format!(
        "{}-{}-{}",
        key.alert_type.as_str(),
        key.metric.map_or("all", |m| m.as_str()),
        key.severity.map_or("all", |s| s.as_str())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::Tiers;
    use crate::export::parse_table;
    use std::sync::{Arc, Mutex};

    fn draft(severity: Severity, value: f64) -> AlertDraft {
        AlertDraft::new(AlertType::Performance, severity, "Slow", "slow responses")
            .metric(MetricKind::ResponseTime)
            .value(value)
            .threshold(5000.0)
    }

    #[test]
    fn test_critical_response_time_breach() {
        let mut manager = AlertManager::new(
            AlertConfig::default(),
            ThresholdTable::new().with(MetricKind::ResponseTime, Tiers::new(5000.0, 15000.0)),
        );

        let alerts =
            manager.check_metrics(&MetricSnapshot::new().with(MetricKind::ResponseTime, 35000.0));

        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.alert_type, AlertType::Performance);
        assert_eq!(alert.threshold, Some(15000.0));
        assert_eq!(alert.current_value, Some(35000.0));
        assert!(alert.actions.iter().any(|a| a.label == "Escalate to Team"));
        assert!(alert
            .actions
            .iter()
            .any(|a| a.label == "Run Performance Optimization"));
    }

    #[test]
    fn test_warning_severity_depends_on_metric() {
        let mut manager = AlertManager::default();
        let alerts = manager.check_metrics(
            &MetricSnapshot::new()
                .with(MetricKind::ErrorRate, 0.07)
                .with(MetricKind::MemoryUsage, 150.0)
                .with(MetricKind::Fps, 40.0),
        );

        let severity_of = |kind| {
            alerts
                .iter()
                .find(|a| a.metric == Some(kind))
                .map(|a| (a.alert_type, a.severity))
        };
        assert_eq!(
            severity_of(MetricKind::ErrorRate),
            Some((AlertType::Error, Severity::High))
        );
        assert_eq!(
            severity_of(MetricKind::MemoryUsage),
            Some((AlertType::Memory, Severity::Medium))
        );
        assert_eq!(
            severity_of(MetricKind::Fps),
            Some((AlertType::Performance, Severity::Medium))
        );
        let fps = alerts.iter().find(|a| a.metric == Some(MetricKind::Fps)).unwrap();
        assert_eq!(fps.title, "Low FPS");
    }

    #[test]
    fn test_healthy_snapshot_raises_nothing() {
        let mut manager = AlertManager::default();
        let alerts = manager.check_metrics(
            &MetricSnapshot::new()
                .with(MetricKind::ResponseTime, 200.0)
                .with(MetricKind::Fps, 60.0)
                .with(MetricKind::CacheHitRate, 0.95)
                .with(MetricKind::Throughput, 1.0),
        );
        assert!(alerts.is_empty());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_dedup_updates_existing_alert() {
        let mut manager = AlertManager::default();
        let first = manager.create_alert(draft(Severity::Medium, 6000.0)).unwrap();
        let second = manager.create_alert(draft(Severity::Medium, 7000.0)).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(manager.len(), 1);
        assert_eq!(second.current_value, Some(7000.0));
        assert_eq!(second.occurrences, 2);

        // A different severity is a different alert
        manager.create_alert(draft(Severity::High, 8000.0)).unwrap();
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_resolved_alert_is_not_reused() {
        let mut manager = AlertManager::default();
        let first = manager.create_alert(draft(Severity::Medium, 6000.0)).unwrap();
        assert!(manager.resolve_alert(&first.id, None));

        let second = manager.create_alert(draft(Severity::Medium, 6000.0)).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut manager = AlertManager::default();
        let alert = manager.create_alert(draft(Severity::High, 6000.0)).unwrap();

        assert!(manager.resolve_alert(&alert.id, Some("fixed the query")));
        let after_first = manager.get_alert(&alert.id).unwrap();
        assert!(after_first.resolved);
        assert!(after_first.resolved_at.is_some());
        let note = after_first.actions.last().unwrap();
        assert_eq!(note.label, "Resolved");
        assert_eq!(note.result.as_deref(), Some("fixed the query"));

        assert!(!manager.resolve_alert(&alert.id, Some("again")));
        assert_eq!(manager.get_alert(&alert.id).unwrap(), after_first);
        assert!(!manager.resolve_alert("missing", None));
    }

    #[test]
    fn test_suppression_with_wildcards() {
        let mut manager = AlertManager::default();
        manager.suppress_alert(AlertType::Performance, None, None, None);

        assert!(manager.create_alert(draft(Severity::Critical, 1.0)).is_none());
        assert!(manager
            .check_metrics(&MetricSnapshot::new().with(MetricKind::CpuUsage, 99.0))
            .is_empty());

        // Other types are unaffected
        assert!(manager
            .check_metrics(&MetricSnapshot::new().with(MetricKind::MemoryUsage, 500.0))
            .iter()
            .any(|a| a.alert_type == AlertType::Memory));

        assert_eq!(manager.clear_suppression(None, None, None), 1);
        assert!(manager.create_alert(draft(Severity::Critical, 1.0)).is_some());
    }

    #[test]
    fn test_suppression_by_metric_and_severity() {
        let mut manager = AlertManager::default();
        manager.suppress_alert(
            AlertType::Performance,
            Some(MetricKind::ResponseTime),
            Some(Severity::Medium),
            None,
        );

        assert!(manager.create_alert(draft(Severity::Medium, 1.0)).is_none());
        assert!(manager.create_alert(draft(Severity::High, 1.0)).is_some());

        assert_eq!(
            manager.clear_suppression(
                Some(AlertType::Performance),
                Some(MetricKind::ResponseTime),
                None
            ),
            0
        );
        assert_eq!(
            manager.clear_suppression(
                Some(AlertType::Performance),
                Some(MetricKind::ResponseTime),
                Some(Severity::Medium)
            ),
            1
        );
    }

    #[test]
    fn test_suppression_expires_on_tick() {
        let mut manager = AlertManager::default();
        let now = Utc::now();
        manager.suppress_alert_at(
            AlertType::Performance,
            None,
            None,
            Some(Duration::seconds(60)),
            now,
        );

        manager.tick_at(now + Duration::seconds(30));
        assert!(manager
            .create_alert_at(draft(Severity::High, 1.0), now + Duration::seconds(30))
            .is_none());

        manager.tick_at(now + Duration::seconds(61));
        assert!(manager.suppressions().is_empty());
        assert!(manager
            .create_alert_at(draft(Severity::High, 1.0), now + Duration::seconds(61))
            .is_some());
    }

    #[test]
    fn test_cleared_suppression_cancels_expiry() {
        let mut manager = AlertManager::default();
        let now = Utc::now();
        manager.suppress_alert_at(
            AlertType::Memory,
            None,
            None,
            Some(Duration::seconds(60)),
            now,
        );
        assert_eq!(manager.pending_tasks(), 1);

        manager.clear_suppression(Some(AlertType::Memory), None, None);
        assert_eq!(manager.pending_tasks(), 0);
    }

    #[test]
    fn test_low_severity_auto_resolves() {
        let mut manager = AlertManager::default();
        let now = Utc::now();
        let alert = manager
            .create_alert_at(
                AlertDraft::new(AlertType::UserExperience, Severity::Low, "Minor", "minor"),
                now,
            )
            .unwrap();

        assert_eq!(manager.tick_at(now + Duration::seconds(299)), 0);
        assert!(!manager.get_alert(&alert.id).unwrap().resolved);

        assert_eq!(manager.tick_at(now + Duration::seconds(300)), 1);
        let resolved = manager.get_alert(&alert.id).unwrap();
        assert!(resolved.resolved);
        assert_eq!(
            resolved.actions.last().unwrap().result.as_deref(),
            Some(AUTO_RESOLUTION)
        );
    }

    #[test]
    fn test_manual_resolve_cancels_auto_resolve() {
        let mut manager = AlertManager::default();
        let now = Utc::now();
        let alert = manager
            .create_alert_at(
                AlertDraft::new(AlertType::UserExperience, Severity::Low, "Minor", "minor"),
                now,
            )
            .unwrap();

        assert!(manager.resolve_alert_at(&alert.id, None, now + Duration::seconds(10)));
        assert_eq!(manager.pending_tasks(), 0);
        assert_eq!(manager.tick_at(now + Duration::seconds(400)), 0);
    }

    #[test]
    fn test_shutdown_cancels_timers() {
        let mut manager = AlertManager::default();
        manager.create_alert(AlertDraft::new(AlertType::Error, Severity::Low, "a", "b"));
        manager.suppress_alert(AlertType::Bundle, None, None, Some(Duration::seconds(5)));
        assert_eq!(manager.pending_tasks(), 2);

        manager.shutdown();
        assert_eq!(manager.pending_tasks(), 0);
    }

    #[test]
    fn test_alert_list_is_bounded() {
        let mut manager = AlertManager::new(
            AlertConfig {
                max_alerts: 10,
                trim_alerts_to: 5,
                ..AlertConfig::default()
            },
            ThresholdTable::default(),
        );

        for i in 0..11 {
            let alert = manager
                .create_alert(AlertDraft::new(
                    AlertType::Error,
                    Severity::High,
                    format!("alert {}", i),
                    "",
                ))
                .unwrap();
            manager.resolve_alert(&alert.id, None);
        }
        assert_eq!(manager.len(), 5);
    }

    #[test]
    fn test_handlers_receive_alerts_and_failures_are_isolated() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut manager = AlertManager::default();

        manager.add_alert_handler("broken", |_| panic!("handler bug"));
        let sink = Arc::clone(&received);
        manager.add_alert_handler("collector", move |alert| {
            sink.lock().unwrap().push(alert.title.clone());
            Ok(())
        });

        let alert = manager.create_alert(draft(Severity::High, 1.0));
        assert!(alert.is_some());
        manager.create_alert(draft(Severity::High, 2.0));
        assert_eq!(received.lock().unwrap().len(), 2);

        assert!(manager.remove_alert_handler("collector"));
        manager.create_alert(draft(Severity::High, 3.0));
        assert_eq!(received.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_get_alerts_ordering_and_limit() {
        let mut manager = AlertManager::default();
        let now = Utc::now();
        manager.create_alert_at(
            AlertDraft::new(AlertType::Error, Severity::Medium, "old medium", ""),
            now,
        );
        manager.create_alert_at(
            AlertDraft::new(AlertType::Bundle, Severity::Medium, "new medium", ""),
            now + Duration::seconds(1),
        );
        manager.create_alert_at(
            AlertDraft::new(AlertType::Memory, Severity::Critical, "critical", ""),
            now,
        );

        let titles: Vec<String> = manager
            .get_alerts(&AlertFilter::default())
            .into_iter()
            .map(|a| a.title)
            .collect();
        assert_eq!(titles, vec!["critical", "new medium", "old medium"]);

        let limited = manager.get_alerts(&AlertFilter {
            limit: Some(1),
            ..AlertFilter::default()
        });
        assert_eq!(limited.len(), 1);

        let errors = manager.get_alerts(&AlertFilter {
            types: Some(vec![AlertType::Error]),
            ..AlertFilter::default()
        });
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_alert_stats() {
        let mut manager = AlertManager::default();
        let now = Utc::now();
        let a = manager
            .create_alert_at(AlertDraft::new(AlertType::Error, Severity::High, "a", ""), now)
            .unwrap();
        manager.create_alert_at(
            AlertDraft::new(AlertType::Memory, Severity::Critical, "b", ""),
            now,
        );
        manager.resolve_alert_at(&a.id, None, now + Duration::seconds(30));

        let range = TimeRange::new(now - Duration::hours(2), now + Duration::hours(2));
        let stats = manager.get_alert_stats(Some(range));
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.resolution_rate, 0.5);
        assert_eq!(stats.average_resolution_ms, 30_000.0);
        assert_eq!(stats.by_severity[&Severity::Critical], 1);
        assert_eq!(stats.by_type[&AlertType::Error], 1);
        assert_eq!(stats.alerts_per_hour, 0.5);

        let unbounded = manager.get_alert_stats(None);
        assert_eq!(unbounded.alerts_per_hour, 2.0);
    }

    #[test]
    fn test_action_bookkeeping() {
        let mut manager = AlertManager::default();
        let alert = manager
            .create_alert(AlertDraft::new(AlertType::Memory, Severity::High, "mem", ""))
            .unwrap();
        let action_id = alert.actions[1].id.clone();

        assert!(manager.start_action(&alert.id, &action_id));
        assert!(!manager.start_action(&alert.id, &action_id));
        assert!(manager.complete_action(&alert.id, &action_id, Err("not supported".to_string())));

        let action = &manager.get_alert(&alert.id).unwrap().actions[1];
        assert_eq!(action.status, ActionStatus::Failed);
        assert_eq!(action.result.as_deref(), Some("not supported"));
        assert!(!manager.complete_action(&alert.id, "missing", Ok(String::new())));
    }

    #[test]
    fn test_update_thresholds_merges() {
        let mut manager = AlertManager::default();
        manager.update_thresholds(
            &ThresholdTable::new().with(MetricKind::ResponseTime, Tiers::new(100.0, 200.0)),
        );

        assert_eq!(
            manager.thresholds().get(MetricKind::ResponseTime),
            Some(Tiers::new(100.0, 200.0))
        );
        assert!(manager.thresholds().get(MetricKind::Fps).is_some());
    }

    #[test]
    fn test_exports() {
        let mut manager = AlertManager::default();
        manager.check_metrics(
            &MetricSnapshot::new()
                .with(MetricKind::ResponseTime, 20000.0)
                .with(MetricKind::BundleSize, 6.0 * 1024.0 * 1024.0),
        );

        let json = manager.export_alerts(ExportFormat::Structured).unwrap();
        let parsed: AlertsExport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.alerts.len(), 2);
        assert_eq!(parsed.stats.total, 2);
        assert_eq!(parsed.thresholds, ThresholdTable::default());

        let rows = parse_table(&manager.export_alerts(ExportFormat::Tabular).unwrap());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][1], "type");
        assert!(rows[1..].iter().any(|row| row[1] == "bundle"));
    }

    #[test]
    fn test_format_value_units() {
        assert_eq!(format_value(MetricKind::ErrorRate, 0.07), "7.0%");
        assert_eq!(format_value(MetricKind::BundleSize, 6.0 * 1024.0 * 1024.0), "6.0MB");
        assert_eq!(format_value(MetricKind::ResponseTime, 35000.0), "35000.0ms");
    }
}
