//! Error ingestion, classification, statistics and export

use crate::alerts::HandlerRegistry;
use crate::config::{Environment, ErrorConfig};
use crate::error::{ExportError, HandlerError};
use crate::events::{Severity, TimeRange, Timestamp};
use crate::export::{self, cell, ExportFormat, TabularRow};
use crate::platform::{PlatformMetrics, Viewport};
use crate::store::ANONYMOUS_SESSION;
use crate::tracking::capture::{CaptureOrigin, GlobalCapture};
use crate::tracking::rules::{infer_severity, infer_type, CategoryRules, ErrorSource, ErrorType};
use chrono::Utc;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Session id used for failures captured outside any session
pub const GLOBAL_SESSION: &str = "global";

/// Number of distinct messages reported in error statistics
pub const TOP_ERRORS: usize = 10;

/// An error as handed to the tracker
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInput {
    pub message: String,
    pub stack: Option<String>,
}

impl ErrorInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Message from the error's display text, stack from its source chain
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {}", cause));
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            stack: if causes.is_empty() {
                None
            } else {
                Some(causes.join("\n"))
            },
        }
    }

    fn full_text(&self) -> String {
        match &self.stack {
            Some(stack) => format!("{} {}", self.message, stack),
            None => self.message.clone(),
        }
    }
}

impl From<&str> for ErrorInput {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ErrorInput {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Caller-supplied context for a tracked error
///
/// Every field is optional; explicit severity, source and type override the
/// keyword heuristics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackContext {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub component: Option<String>,
    pub action: Option<String>,
    pub severity: Option<Severity>,
    pub source: Option<ErrorSource>,
    pub error_type: Option<ErrorType>,
    pub metadata: BTreeMap<String, Value>,
}

impl TrackContext {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn source(mut self, source: ErrorSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn error_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = Some(error_type);
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Request details for network failures
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRequest {
    pub url: String,
    pub method: String,
    pub status: Option<u16>,
    pub status_text: Option<String>,
}

impl NetworkRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            status: None,
            status_text: None,
        }
    }

    pub fn status(mut self, status: u16, status_text: impl Into<String>) -> Self {
        self.status = Some(status);
        self.status_text = Some(status_text.into());
        self
    }
}

/// Model call details for AI failures
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AiRequest {
    pub model: Option<String>,
    pub prompt_length: Option<usize>,
    pub operation: Option<String>,
}

/// Context stored with a tracked error
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorContext {
    pub component: Option<String>,
    pub action: Option<String>,
    pub viewport: Option<Viewport>,
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// A tracked error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub id: String,
    pub message: String,
    pub stack: Option<String>,
    pub error_type: ErrorType,
    pub severity: Severity,
    pub source: ErrorSource,
    pub component_stack: Option<String>,
    pub session_id: String,
    pub user_id: Option<String>,
    pub context: ErrorContext,
    pub timestamp: Timestamp,
    pub resolved: bool,
    pub resolved_at: Option<Timestamp>,
    pub resolution: Option<String>,
    pub tags: Vec<String>,
}

impl TabularRow for ErrorRecord {
    fn header() -> &'static [&'static str] {
        &[
            "id",
            "message",
            "type",
            "severity",
            "source",
            "timestamp",
            "resolved",
            "user_id",
            "session_id",
            "component",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.message.clone(),
            self.error_type.to_string(),
            self.severity.to_string(),
            self.source.to_string(),
            self.timestamp.to_rfc3339(),
            self.resolved.to_string(),
            cell(&self.user_id),
            self.session_id.clone(),
            cell(&self.context.component),
        ]
    }
}

/// Error query filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorFilter {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub severities: Option<Vec<Severity>>,
    pub sources: Option<Vec<ErrorSource>>,
    pub resolved: Option<bool>,
    pub range: Option<TimeRange>,
    pub limit: Option<usize>,
}

impl ErrorFilter {
    fn matches(&self, record: &ErrorRecord) -> bool {
        self.session_id
            .as_ref()
            .map_or(true, |id| &record.session_id == id)
            && self
                .user_id
                .as_ref()
                .map_or(true, |id| record.user_id.as_ref() == Some(id))
            && self
                .severities
                .as_ref()
                .map_or(true, |s| s.contains(&record.severity))
            && self
                .sources
                .as_ref()
                .map_or(true, |s| s.contains(&record.source))
            && self.resolved.map_or(true, |r| record.resolved == r)
            && self.range.map_or(true, |range| range.contains(record.timestamp))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopError {
    pub message: String,
    pub count: usize,
    /// Severity of the first occurrence
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorStats {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_source: BTreeMap<ErrorSource, usize>,
    pub by_type: BTreeMap<ErrorType, usize>,
    pub resolved: usize,
    pub unresolved: usize,
    pub errors_per_hour: f64,
    pub top_errors: Vec<TopError>,
}

/// Structured error export document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorsExport {
    pub exported_at: Timestamp,
    pub errors: Vec<ErrorRecord>,
    pub stats: ErrorStats,
}

/// Error ingestion, categorization and statistics
///
/// Tracking never fails: missing context is defaulted, the buffer evicts the
/// oldest records on overflow, and handler failures are contained.
#[derive(Debug)]
pub struct ErrorTracker {
    config: ErrorConfig,
    environment: Environment,
    platform: PlatformMetrics,
    rules: CategoryRules,
    errors: VecDeque<ErrorRecord>,
    handlers: HandlerRegistry<ErrorRecord>,
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new(
            ErrorConfig::default(),
            Environment::default(),
            PlatformMetrics::Unavailable,
        )
    }
}

impl ErrorTracker {
    pub fn new(config: ErrorConfig, environment: Environment, platform: PlatformMetrics) -> Self {
        Self {
            config,
            environment,
            platform,
            rules: CategoryRules::builtin(),
            errors: VecDeque::new(),
            handlers: HandlerRegistry::new(),
        }
    }

    /// Replace the categorization rules
    pub fn with_rules(mut self, rules: CategoryRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &CategoryRules {
        &self.rules
    }

    /// Track an error
    ///
    /// # Arguments
    ///
    /// * `input` - Message and optional stack text
    /// * `context` - Session, user and overrides; anything missing is inferred or defaulted
    ///
    /// # Returns
    ///
    /// The id of the new record
    pub fn track_error(&mut self, input: impl Into<ErrorInput>, context: TrackContext) -> String {
        self.track_error_at(input, context, Utc::now())
    }

    pub fn track_error_at(
        &mut self,
        input: impl Into<ErrorInput>,
        context: TrackContext,
        now: Timestamp,
    ) -> String {
        let input = input.into();
        let error_type = context
            .error_type
            .unwrap_or_else(|| infer_type(&input.message));
        let severity = context
            .severity
            .unwrap_or_else(|| infer_severity(&input.message));
        let source = context
            .source
            .unwrap_or_else(|| self.rules.categorize(&input.full_text()));
        let component_stack = input
            .stack
            .as_deref()
            .and_then(|stack| self.rules.component_stack(stack));
        let runtime = self.platform.runtime();

        let mut tags = vec![
            format!("severity:{}", severity),
            format!("source:{}", source),
        ];
        if let Some(component) = &context.component {
            tags.push(format!("component:{}", component));
        }
        if let Some(runtime) = &runtime {
            tags.push(format!("runtime:{}", runtime));
        }
        tags.push(format!("env:{}", self.environment));

        let record = ErrorRecord {
            id: uuid::Uuid::new_v4().to_string(),
            message: input.message,
            stack: input.stack,
            error_type,
            severity,
            source,
            component_stack,
            session_id: context
                .session_id
                .unwrap_or_else(|| ANONYMOUS_SESSION.to_string()),
            user_id: context.user_id,
            context: ErrorContext {
                component: context.component,
                action: context.action,
                viewport: self.platform.viewport(),
                runtime,
                metadata: context.metadata,
            },
            timestamp: now,
            resolved: false,
            resolved_at: None,
            resolution: None,
            tags,
        };

        if record.severity == Severity::Critical {
            error!(
                "CRITICAL ERROR [{}]: {} (session {})",
                record.source, record.message, record.session_id
            );
        } else {
            debug!("Tracked {} error: {}", record.severity, record.message);
        }

        let id = record.id.clone();
        self.errors.push_back(record);
        if self.errors.len() > self.config.max_errors {
            let keep = self.config.retain_count();
            let excess = self.errors.len().saturating_sub(keep);
            self.errors.drain(..excess);
            debug!("Error buffer overflow: evicted {} records", excess);
        }

        if let Some(record) = self.errors.back() {
            self.handlers.dispatch(record);
        }
        id
    }

    /// Track a failed network request
    ///
    /// Unless the caller sets a severity, server errors (status 500 and
    /// above) are high and everything else medium.
    pub fn track_network_error(
        &mut self,
        input: impl Into<ErrorInput>,
        request: &NetworkRequest,
        context: TrackContext,
    ) -> String {
        let severity = context.severity.unwrap_or(match request.status {
            Some(status) if status >= 500 => Severity::High,
            _ => Severity::Medium,
        });
        let mut context = context
            .source(ErrorSource::Network)
            .severity(severity)
            .meta("url", request.url.as_str())
            .meta("method", request.method.as_str())
            .meta("network_error", true);
        if let Some(status) = request.status {
            context = context.meta("status", status);
        }
        if let Some(status_text) = &request.status_text {
            context = context.meta("status_text", status_text.as_str());
        }
        self.track_error(input, context)
    }

    /// Track a failure raised while rendering a component
    pub fn track_component_error(
        &mut self,
        input: impl Into<ErrorInput>,
        component_stack: Option<&str>,
        context: TrackContext,
    ) -> String {
        let severity = context.severity.unwrap_or(Severity::High);
        let mut context = context
            .source(ErrorSource::Component)
            .severity(severity)
            .meta("error_boundary", true);
        if let Some(stack) = component_stack {
            context = context.meta("component_stack", stack);
        }
        self.track_error(input, context)
    }

    /// Track a failed model call; recorded under the api source
    pub fn track_ai_error(
        &mut self,
        input: impl Into<ErrorInput>,
        request: &AiRequest,
        context: TrackContext,
    ) -> String {
        let severity = context.severity.unwrap_or(Severity::Medium);
        let mut context = context
            .source(ErrorSource::Api)
            .severity(severity)
            .meta("ai_error", true);
        if let Some(model) = &request.model {
            context = context.meta("model", model.as_str());
        }
        if let Some(length) = request.prompt_length {
            context = context.meta("prompt_length", length);
        }
        if let Some(operation) = &request.operation {
            context = context.meta("operation", operation.as_str());
        }
        self.track_error(input, context)
    }

    /// Move captured panics and task failures into the buffer
    ///
    /// # Returns
    ///
    /// Number of failures tracked
    pub fn drain_captured(&mut self, capture: &GlobalCapture) -> usize {
        let failures = capture.drain();
        let count = failures.len();
        for failure in failures {
            let origin = match failure.origin {
                CaptureOrigin::Panic => "panic",
                CaptureOrigin::Task => "task",
            };
            let mut context = TrackContext::session(GLOBAL_SESSION)
                .source(ErrorSource::System)
                .severity(Severity::High)
                .meta("global", true)
                .meta("origin", origin);
            if let Some(location) = &failure.location {
                context = context.meta("location", location.as_str());
            }
            if let Some(thread) = &failure.thread {
                context = context.meta("thread", thread.as_str());
            }
            self.track_error_at(failure.message, context, failure.timestamp);
        }
        count
    }

    /// Errors matching the filter, newest first
    pub fn get_errors(&self, filter: &ErrorFilter) -> Vec<ErrorRecord> {
        let mut matching: Vec<ErrorRecord> = self
            .errors
            .iter()
            .rev()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        matching
    }

    pub fn get_error(&self, id: &str) -> Option<ErrorRecord> {
        self.errors.iter().find(|record| record.id == id).cloned()
    }

    /// Counts by severity, source and type, plus rate and most frequent messages
    ///
    /// Without a range the rate is taken over the span of the stored errors.
    /// The rate divides by at least one hour.
    pub fn get_error_stats(&self, range: Option<TimeRange>) -> ErrorStats {
        let records: Vec<&ErrorRecord> = self
            .errors
            .iter()
            .filter(|record| range.map_or(true, |range| range.contains(record.timestamp)))
            .collect();

        let mut stats = ErrorStats {
            total: records.len(),
            ..ErrorStats::default()
        };
        let mut top: Vec<TopError> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();

        for record in &records {
            *stats.by_severity.entry(record.severity).or_insert(0) += 1;
            *stats.by_source.entry(record.source).or_insert(0) += 1;
            *stats.by_type.entry(record.error_type).or_insert(0) += 1;
            if record.resolved {
                stats.resolved += 1;
            } else {
                stats.unresolved += 1;
            }

            match positions.get(record.message.as_str()) {
                Some(&index) => top[index].count += 1,
                None => {
                    positions.insert(record.message.as_str(), top.len());
                    top.push(TopError {
                        message: record.message.clone(),
                        count: 1,
                        severity: record.severity,
                    });
                }
            }
        }

        // Stable sort keeps first-seen order among equal counts
        top.sort_by(|a, b| b.count.cmp(&a.count));
        top.truncate(TOP_ERRORS);
        stats.top_errors = top;

        let hours = match range {
            Some(range) => range.hours(),
            None => {
                let first = records.iter().map(|r| r.timestamp).min();
                let last = records.iter().map(|r| r.timestamp).max();
                match (first, last) {
                    (Some(first), Some(last)) => TimeRange::new(first, last).hours(),
                    _ => 0.0,
                }
            }
        };
        stats.errors_per_hour = stats.total as f64 / hours.max(1.0);
        stats
    }

    /// Mark an error resolved
    ///
    /// # Returns
    ///
    /// `false` if the error does not exist or is already resolved
    pub fn resolve_error(&mut self, id: &str, resolution: Option<&str>) -> bool {
        self.resolve_error_at(id, resolution, Utc::now())
    }

    pub fn resolve_error_at(&mut self, id: &str, resolution: Option<&str>, now: Timestamp) -> bool {
        match self
            .errors
            .iter_mut()
            .find(|record| record.id == id && !record.resolved)
        {
            Some(record) => {
                record.resolved = true;
                record.resolved_at = Some(now);
                record.resolution = resolution.map(str::to_string);
                true
            }
            None => false,
        }
    }

    /// Drop every resolved error
    ///
    /// # Returns
    ///
    /// Number of records removed
    pub fn clear_resolved_errors(&mut self) -> usize {
        let before = self.errors.len();
        self.errors.retain(|record| !record.resolved);
        before - self.errors.len()
    }

    /// Register a named error handler, replacing one with the same name
    pub fn add_error_handler<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&ErrorRecord) -> Result<(), HandlerError> + Send + 'static,
    {
        self.handlers.add(name, handler);
    }

    pub fn remove_error_handler(&mut self, name: &str) -> bool {
        self.handlers.remove(name)
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn export_errors(&self, format: ExportFormat) -> Result<String, ExportError> {
        self.export_errors_at(format, Utc::now())
    }

    pub fn export_errors_at(
        &self,
        format: ExportFormat,
        now: Timestamp,
    ) -> Result<String, ExportError> {
        match format {
            ExportFormat::Structured => export::to_structured(&ErrorsExport {
                exported_at: now,
                errors: self.errors.iter().cloned().collect(),
                stats: self.get_error_stats(None),
            }),
            ExportFormat::Tabular => Ok(export::to_table(self.errors.iter())),
        }
    }
}
