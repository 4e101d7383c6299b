use crate::alerts::{ThresholdTable, Tiers};
use crate::error::ConfigError;
use crate::events::MetricKind;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const MB: f64 = 1024.0 * 1024.0;

/// Deployment environment the pipeline runs in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::ValidationError(format!(
                "unknown environment '{}'",
                other
            ))),
        }
    }
}

/// Toggles for the individual pipeline stages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Features {
    pub error_tracking: bool,
    pub performance_monitoring: bool,
    pub regression_detection: bool,
    pub real_time_alerts: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            error_tracking: true,
            performance_monitoring: true,
            regression_detection: true,
            real_time_alerts: true,
        }
    }
}

/// Metric buffer and leak-detection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectionConfig {
    /// Seconds between pipeline ticks
    pub tick_interval_seconds: u64,
    pub max_samples: usize,
    /// Number of most recent samples kept after an overflow
    pub trim_samples_to: usize,
    pub retention_hours: u64,
    /// Most recent memory samples considered by leak detection
    pub leak_window: usize,
    pub leak_min_samples: usize,
    pub leak_min_growth_mb: f64,
    pub leak_min_growth_ratio: f64,
    /// Share of consecutive pairs that must be non-decreasing
    pub leak_min_monotonic_ratio: f64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 5,
            max_samples: 10_000,
            trim_samples_to: 5_000,
            retention_hours: 24,
            leak_window: 100,
            leak_min_samples: 20,
            leak_min_growth_mb: 10.0,
            leak_min_growth_ratio: 0.25,
            leak_min_monotonic_ratio: 0.7,
        }
    }
}

/// Regression detector parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegressionConfig {
    pub enabled: bool,
    /// Minimum relative deviation from baseline (0.15 = 15%)
    pub sensitivity: f64,
    pub min_sample_size: usize,
    pub trend_window: usize,
    pub max_regressions: usize,
    pub trim_regressions_to: usize,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity: 0.15,
            min_sample_size: 10,
            trend_window: 100,
            max_regressions: 1000,
            trim_regressions_to: 500,
        }
    }
}

/// Alert manager buffer and lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    pub max_alerts: usize,
    pub trim_alerts_to: usize,
    /// Delay after which low severity alerts resolve themselves
    pub auto_resolve_low_after_seconds: u64,
    /// Evaluate thresholds on every record instead of only on tick
    pub realtime_checks: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            max_alerts: 1000,
            trim_alerts_to: 500,
            auto_resolve_low_after_seconds: 300,
            realtime_checks: true,
        }
    }
}

/// Error tracker buffer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ErrorConfig {
    pub max_errors: usize,
    /// Fraction of the cap kept after an overflow
    pub retain_ratio: f64,
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self {
            max_errors: 1000,
            retain_ratio: 0.8,
        }
    }
}

impl ErrorConfig {
    /// Number of records kept after an overflow
    pub fn retain_count(&self) -> usize {
        ((self.max_errors as f64) * self.retain_ratio).floor() as usize
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,
    pub enabled: bool,
    pub features: Features,
    pub collection: CollectionConfig,
    pub thresholds: ThresholdTable,
    pub regression: RegressionConfig,
    pub alerts: AlertConfig,
    pub errors: ErrorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thresholds: ThresholdTable::default(),
            ..Self::for_environment(Environment::Development)
        }
    }
}

impl Config {
    /// Preset for a deployment environment
    ///
    /// Production ticks less often and alerts earlier; development tolerates
    /// slower responses.
    pub fn for_environment(environment: Environment) -> Self {
        let (tick_interval_seconds, thresholds) = match environment {
            Environment::Development => (
                5,
                preset_thresholds(
                    (10_000.0, 30_000.0),
                    (45.0, 30.0),
                    (100.0, 200.0),
                    (5.0, 10.0),
                    (0.05, 0.1),
                    (70.0, 90.0),
                    (1000.0, 3000.0),
                    0.8,
                ),
            ),
            Environment::Staging => (
                10,
                preset_thresholds(
                    (8000.0, 20_000.0),
                    (50.0, 35.0),
                    (80.0, 150.0),
                    (4.0, 8.0),
                    (0.03, 0.08),
                    (60.0, 80.0),
                    (800.0, 2000.0),
                    0.85,
                ),
            ),
            Environment::Production => (
                30,
                preset_thresholds(
                    (5000.0, 15_000.0),
                    (55.0, 40.0),
                    (60.0, 120.0),
                    (3.0, 6.0),
                    (0.01, 0.05),
                    (50.0, 70.0),
                    (500.0, 1500.0),
                    0.9,
                ),
            ),
        };

        Self {
            environment,
            enabled: true,
            features: Features::default(),
            collection: CollectionConfig {
                tick_interval_seconds,
                ..CollectionConfig::default()
            },
            thresholds,
            regression: RegressionConfig::default(),
            alerts: AlertConfig::default(),
            errors: ErrorConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read, a parse
    /// error for malformed TOML, or a validation error for out-of-range values.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration for the binary
    ///
    /// Missing or invalid files fall back to defaults with a warning, then
    /// environment overrides are applied.
    pub fn load(path: Option<&Path>) -> Self {
        let config = match path {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                match Self::from_file(path) {
                    Ok(config) => config,
                    Err(ConfigError::ReadError(e)) => {
                        warn!("Configuration file not found or unreadable ({}), using defaults", e);
                        Self::default()
                    }
                    Err(e) => {
                        error!("Configuration error in '{}': {}", path.display(), e);
                        warn!("Using default configuration due to invalid config file");
                        Self::default()
                    }
                }
            }
            None => {
                info!("Using default configuration");
                Self::default()
            }
        };

        match config.clone().apply_env_overrides() {
            Ok(overridden) => overridden,
            Err(e) => {
                warn!("Ignoring environment overrides: {}", e);
                config
            }
        }
    }

    /// Apply `LOOKOUT_*` environment variables on top of this configuration
    pub fn apply_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`
    ///
    /// `LOOKOUT_ENV` swaps in that environment's preset thresholds and tick
    /// interval; the other variables override single values.
    pub fn apply_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("LOOKOUT_ENV") {
            let environment: Environment = raw.parse()?;
            if environment != self.environment {
                let preset = Self::for_environment(environment);
                self.environment = environment;
                self.thresholds = preset.thresholds;
                self.collection.tick_interval_seconds = preset.collection.tick_interval_seconds;
            }
        }

        if let Some(raw) = lookup("LOOKOUT_ENABLED") {
            self.enabled = parse_bool(&raw).ok_or_else(|| {
                ConfigError::ParseError(format!("LOOKOUT_ENABLED: expected a boolean, got '{}'", raw))
            })?;
        }

        if let Some(raw) = lookup("LOOKOUT_TICK_INTERVAL") {
            self.collection.tick_interval_seconds = raw.trim().parse().map_err(|_| {
                ConfigError::ParseError(format!("LOOKOUT_TICK_INTERVAL: expected seconds, got '{}'", raw))
            })?;
        }

        if let Some(raw) = lookup("LOOKOUT_SENSITIVITY") {
            self.regression.sensitivity = raw.trim().parse().map_err(|_| {
                ConfigError::ParseError(format!("LOOKOUT_SENSITIVITY: expected a number, got '{}'", raw))
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::ValidationError(message));

        if self.collection.tick_interval_seconds == 0 {
            return invalid("collection.tick_interval_seconds must be greater than 0".to_string());
        }
        if self.collection.max_samples == 0
            || self.collection.trim_samples_to == 0
            || self.collection.trim_samples_to >= self.collection.max_samples
        {
            return invalid(format!(
                "collection.trim_samples_to ({}) must be between 1 and max_samples ({})",
                self.collection.trim_samples_to, self.collection.max_samples
            ));
        }
        if self.collection.leak_min_samples < 2
            || self.collection.leak_window < self.collection.leak_min_samples
        {
            return invalid(format!(
                "collection.leak_window ({}) must be at least leak_min_samples ({}), which must be at least 2",
                self.collection.leak_window, self.collection.leak_min_samples
            ));
        }
        if !(0.0..=1.0).contains(&self.collection.leak_min_monotonic_ratio) {
            return invalid("collection.leak_min_monotonic_ratio must be in [0, 1]".to_string());
        }

        if !(0.01..=1.0).contains(&self.regression.sensitivity) {
            return invalid(format!(
                "regression.sensitivity ({}) must be in [0.01, 1.0]",
                self.regression.sensitivity
            ));
        }
        if self.regression.min_sample_size < 2 {
            return invalid("regression.min_sample_size must be at least 2".to_string());
        }
        if self.regression.trend_window < self.regression.min_sample_size {
            return invalid(format!(
                "regression.trend_window ({}) must be at least min_sample_size ({})",
                self.regression.trend_window, self.regression.min_sample_size
            ));
        }
        if self.regression.trim_regressions_to == 0
            || self.regression.trim_regressions_to >= self.regression.max_regressions
        {
            return invalid("regression.trim_regressions_to must be between 1 and max_regressions".to_string());
        }

        if self.alerts.trim_alerts_to == 0 || self.alerts.trim_alerts_to >= self.alerts.max_alerts {
            return invalid("alerts.trim_alerts_to must be between 1 and max_alerts".to_string());
        }

        if self.errors.max_errors == 0 {
            return invalid("errors.max_errors must be greater than 0".to_string());
        }
        if !(self.errors.retain_ratio > 0.0 && self.errors.retain_ratio < 1.0) {
            return invalid("errors.retain_ratio must be in (0, 1)".to_string());
        }

        self.thresholds
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("thresholds.{}", e)))
    }
}

#[allow(clippy::too_many_arguments)]
fn preset_thresholds(
    response_time: (f64, f64),
    fps: (f64, f64),
    memory_mb: (f64, f64),
    bundle_mb: (f64, f64),
    error_rate: (f64, f64),
    cpu: (f64, f64),
    latency: (f64, f64),
    cache_hit_rate: f64,
) -> ThresholdTable {
    ThresholdTable::new()
        .with(MetricKind::ResponseTime, Tiers::new(response_time.0, response_time.1))
        .with(MetricKind::Fps, Tiers::new(fps.0, fps.1))
        .with(MetricKind::MemoryUsage, Tiers::new(memory_mb.0, memory_mb.1))
        .with(
            MetricKind::BundleSize,
            Tiers::new(bundle_mb.0 * MB, bundle_mb.1 * MB),
        )
        .with(MetricKind::ErrorRate, Tiers::new(error_rate.0, error_rate.1))
        .with(MetricKind::CpuUsage, Tiers::new(cpu.0, cpu.1))
        .with(MetricKind::NetworkLatency, Tiers::new(latency.0, latency.1))
        .with(MetricKind::CacheHitRate, Tiers::warning_only(cache_hit_rate))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
