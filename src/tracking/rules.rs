//! Ordered heuristic rules for classifying tracked errors
//!
//! Source categorization is a data table of (source, pattern) pairs checked in
//! order against the message and stack text; the first match wins and
//! unmatched errors fall back to `System`. Type and severity come from keyword
//! tables over the lowercased message.

use crate::events::Severity;
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subsystem an error is attributed to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    Network,
    Component,
    Api,
    Memory,
    Bundle,
    Ai,
    System,
}

impl ErrorSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSource::Network => "network",
            ErrorSource::Component => "component",
            ErrorSource::Api => "api",
            ErrorSource::Memory => "memory",
            ErrorSource::Bundle => "bundle",
            ErrorSource::Ai => "ai",
            ErrorSource::System => "system",
        }
    }
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Error,
    Warning,
    Info,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::Error => "error",
            ErrorType::Warning => "warning",
            ErrorType::Info => "info",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in categorization table, in priority order
const BUILTIN_PATTERNS: &[(ErrorSource, &str)] = &[
    (
        ErrorSource::Network,
        r"(?i)network|fetch|request|connection|socket|timed? ?out|dns",
    ),
    (
        ErrorSource::Component,
        r"(?i)component|render|widget|\bview\b|\bhook\b",
    ),
    (
        ErrorSource::Api,
        r"(?i)\bapi\b|endpoint|server|backend|database",
    ),
    (ErrorSource::Memory, r"(?i)memory|heap|alloc|leak|\boom\b"),
    (
        ErrorSource::Bundle,
        r"(?i)chunk|module|import|dynamic|\bbundle\b|linker",
    ),
    (
        ErrorSource::Ai,
        r"(?i)\bai\b|openai|claude|\bchat\b|\bllm\b|prompt|completion",
    ),
];

/// Severity keywords, checked from most to least severe
const SEVERITY_KEYWORDS: &[(Severity, &[&str])] = &[
    (Severity::Critical, &["critical", "fatal", "crash"]),
    (Severity::High, &["error", "failed", "exception", "panic"]),
    (Severity::Medium, &["warning", "deprecated"]),
];

/// Pattern for stack frames that belong to UI components
const COMPONENT_FRAME_PATTERN: &str = r"(?i)component|view|widget|render";

/// Number of component frames kept from a stack
pub const COMPONENT_STACK_DEPTH: usize = 5;

/// One categorization rule
#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub source: ErrorSource,
    pub pattern: Regex,
}

/// Ordered categorization rules plus the component frame matcher
#[derive(Debug, Clone)]
pub struct CategoryRules {
    rules: Vec<CategoryRule>,
    component_frame: Option<Regex>,
}

impl Default for CategoryRules {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CategoryRules {
    /// Empty table; every error categorizes as `System`
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            component_frame: compile(COMPONENT_FRAME_PATTERN),
        }
    }

    pub fn builtin() -> Self {
        let mut table = Self::empty();
        for (source, pattern) in BUILTIN_PATTERNS {
            if let Some(pattern) = compile(pattern) {
                table.rules.push(CategoryRule {
                    source: *source,
                    pattern,
                });
            }
        }
        table
    }

    /// Append a rule at the lowest priority
    ///
    /// # Errors
    ///
    /// Returns the regex error if `pattern` does not compile
    pub fn push(&mut self, source: ErrorSource, pattern: &str) -> Result<(), regex::Error> {
        self.rules.push(CategoryRule {
            source,
            pattern: Regex::new(pattern)?,
        });
        Ok(())
    }

    /// Insert a rule ahead of all existing rules
    pub fn prepend(&mut self, source: ErrorSource, pattern: &str) -> Result<(), regex::Error> {
        self.rules.insert(
            0,
            CategoryRule {
                source,
                pattern: Regex::new(pattern)?,
            },
        );
        Ok(())
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    /// Source of the first rule matching the text, or `System`
    pub fn categorize(&self, text: &str) -> ErrorSource {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(text))
            .map_or(ErrorSource::System, |rule| rule.source)
    }

    /// The first component-like frames of a stack, newline separated
    pub fn component_stack(&self, stack: &str) -> Option<String> {
        let matcher = self.component_frame.as_ref()?;
        let frames: Vec<&str> = stack
            .lines()
            .map(str::trim)
            .filter(|line| matcher.is_match(line))
            .take(COMPONENT_STACK_DEPTH)
            .collect();
        if frames.is_empty() {
            None
        } else {
            Some(frames.join("\n"))
        }
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Skipping invalid categorization pattern '{}': {}", pattern, e);
            None
        }
    }
}

/// Message type from keywords: warning, then info, else error
pub fn infer_type(message: &str) -> ErrorType {
    let lower = message.to_lowercase();
    if lower.contains("warning") {
        ErrorType::Warning
    } else if lower.contains("info") {
        ErrorType::Info
    } else {
        ErrorType::Error
    }
}

pub fn infer_severity(message: &str) -> Severity {
    let lower = message.to_lowercase();
    SEVERITY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map_or(Severity::Low, |(severity, _)| *severity)
}
