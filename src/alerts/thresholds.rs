//! Two-tier (warning/critical) threshold table keyed by metric kind
//!
//! Breach direction comes from the metric's directionality tag: increase-is-bad
//! metrics breach when they rise above a tier, increase-is-good metrics breach
//! when they fall below it.

use crate::events::{Direction, MetricKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Warning and optional critical limit for one metric
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Tiers {
    pub warning: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<f64>,
}

impl Tiers {
    pub fn new(warning: f64, critical: f64) -> Self {
        Self {
            warning,
            critical: Some(critical),
        }
    }

    /// A single-tier limit (e.g. a minimum cache hit rate)
    pub fn warning_only(warning: f64) -> Self {
        Self {
            warning,
            critical: None,
        }
    }
}

/// Which tier a value breached
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Warning,
    Critical,
}

/// A threshold breach for one metric value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breach {
    pub kind: MetricKind,
    pub tier: Tier,
    pub threshold: f64,
    pub value: f64,
}

/// Per-metric threshold table
///
/// Serialized as a map from metric name to tiers, e.g. a `[response_time]`
/// table in TOML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    try_from = "BTreeMap<String, Tiers>",
    into = "BTreeMap<String, Tiers>"
)]
pub struct ThresholdTable(BTreeMap<MetricKind, Tiers>);

impl TryFrom<BTreeMap<String, Tiers>> for ThresholdTable {
    type Error = String;

    fn try_from(raw: BTreeMap<String, Tiers>) -> Result<Self, Self::Error> {
        raw.into_iter()
            .map(|(name, tiers)| Ok((name.parse::<MetricKind>()?, tiers)))
            .collect::<Result<BTreeMap<_, _>, String>>()
            .map(ThresholdTable)
    }
}

impl From<ThresholdTable> for BTreeMap<String, Tiers> {
    fn from(table: ThresholdTable) -> Self {
        table
            .0
            .into_iter()
            .map(|(kind, tiers)| (kind.as_str().to_string(), tiers))
            .collect()
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::new()
            .with(MetricKind::ResponseTime, Tiers::new(5000.0, 15000.0))
            .with(MetricKind::Fps, Tiers::new(45.0, 30.0))
            .with(MetricKind::MemoryUsage, Tiers::new(100.0, 200.0))
            .with(
                MetricKind::BundleSize,
                Tiers::new(5.0 * 1024.0 * 1024.0, 10.0 * 1024.0 * 1024.0),
            )
            .with(MetricKind::ErrorRate, Tiers::new(0.05, 0.1))
            .with(MetricKind::CpuUsage, Tiers::new(70.0, 90.0))
            .with(MetricKind::NetworkLatency, Tiers::new(1000.0, 3000.0))
            .with(MetricKind::CacheHitRate, Tiers::warning_only(0.8))
    }
}

impl ThresholdTable {
    /// An empty table; no metric ever breaches
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, kind: MetricKind, tiers: Tiers) -> Self {
        self.set(kind, tiers);
        self
    }

    pub fn set(&mut self, kind: MetricKind, tiers: Tiers) {
        self.0.insert(kind, tiers);
    }

    pub fn get(&self, kind: MetricKind) -> Option<Tiers> {
        self.0.get(&kind).copied()
    }

    pub fn remove(&mut self, kind: MetricKind) -> Option<Tiers> {
        self.0.remove(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricKind, Tiers)> + '_ {
        self.0.iter().map(|(kind, tiers)| (*kind, *tiers))
    }

    /// Merge another table over this one, replacing entries for shared kinds
    pub fn merge(&mut self, other: &ThresholdTable) {
        for (kind, tiers) in other.iter() {
            self.set(kind, tiers);
        }
    }

    /// Evaluate a value against the tiers configured for its metric
    ///
    /// The critical tier is checked first, so a value past both limits reports
    /// the critical breach only.
    pub fn evaluate(&self, kind: MetricKind, value: f64) -> Option<Breach> {
        let tiers = self.get(kind)?;
        let breaches = |limit: f64| match kind.direction() {
            Direction::IncreaseIsBad => value > limit,
            Direction::IncreaseIsGood => value < limit,
        };

        if let Some(critical) = tiers.critical {
            if breaches(critical) {
                return Some(Breach {
                    kind,
                    tier: Tier::Critical,
                    threshold: critical,
                    value,
                });
            }
        }

        if breaches(tiers.warning) {
            return Some(Breach {
                kind,
                tier: Tier::Warning,
                threshold: tiers.warning,
                value,
            });
        }

        None
    }

    /// Check that every entry's tiers are finite and ordered for its direction
    pub fn validate(&self) -> Result<(), String> {
        for (kind, tiers) in self.iter() {
            if !tiers.warning.is_finite() {
                return Err(format!("{}: warning threshold must be finite", kind));
            }
            let Some(critical) = tiers.critical else {
                continue;
            };
            if !critical.is_finite() {
                return Err(format!("{}: critical threshold must be finite", kind));
            }
            let ordered = match kind.direction() {
                Direction::IncreaseIsBad => tiers.warning <= critical,
                Direction::IncreaseIsGood => tiers.warning >= critical,
            };
            if !ordered {
                return Err(format!(
                    "{}: warning ({}) and critical ({}) tiers are inverted",
                    kind, tiers.warning, critical
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_breach_above() {
        let table = ThresholdTable::new().with(MetricKind::ResponseTime, Tiers::new(5000.0, 15000.0));

        let breach = table.evaluate(MetricKind::ResponseTime, 35000.0).unwrap();
        assert_eq!(breach.tier, Tier::Critical);
        assert_eq!(breach.threshold, 15000.0);
    }

    #[test]
    fn test_warning_breach_above() {
        let table = ThresholdTable::new().with(MetricKind::ResponseTime, Tiers::new(5000.0, 15000.0));

        let breach = table.evaluate(MetricKind::ResponseTime, 6000.0).unwrap();
        assert_eq!(breach.tier, Tier::Warning);
        assert_eq!(breach.threshold, 5000.0);
        assert!(table.evaluate(MetricKind::ResponseTime, 5000.0).is_none());
    }

    #[test]
    fn test_breach_below_for_increase_is_good() {
        let table = ThresholdTable::default();

        assert_eq!(table.evaluate(MetricKind::Fps, 25.0).unwrap().tier, Tier::Critical);
        assert_eq!(table.evaluate(MetricKind::Fps, 40.0).unwrap().tier, Tier::Warning);
        assert!(table.evaluate(MetricKind::Fps, 60.0).is_none());
    }

    #[test]
    fn test_warning_only_tier() {
        let table = ThresholdTable::default();

        let breach = table.evaluate(MetricKind::CacheHitRate, 0.5).unwrap();
        assert_eq!(breach.tier, Tier::Warning);
        assert!(table.evaluate(MetricKind::CacheHitRate, 0.95).is_none());
    }

    #[test]
    fn test_unconfigured_metric_never_breaches() {
        let table = ThresholdTable::new();
        assert!(table.evaluate(MetricKind::ResponseTime, f64::MAX).is_none());
    }

    #[test]
    fn test_validate_rejects_inverted_tiers() {
        let table = ThresholdTable::new().with(MetricKind::ResponseTime, Tiers::new(15000.0, 5000.0));
        assert!(table.validate().is_err());

        let table = ThresholdTable::new().with(MetricKind::Fps, Tiers::new(30.0, 45.0));
        assert!(table.validate().is_err());

        assert!(ThresholdTable::default().validate().is_ok());
    }

    #[test]
    fn test_unknown_metric_name_is_rejected() {
        let result: Result<ThresholdTable, _> = toml::from_str("[latency]\nwarning = 1.0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let table = ThresholdTable::default();
        let text = toml::to_string(&table).unwrap();
        assert!(text.contains("[response_time]"));
        let parsed: ThresholdTable = toml::from_str(&text).unwrap();
        assert_eq!(parsed, table);
    }
}
