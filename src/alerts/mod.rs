/// Threshold evaluation, alert lifecycle and handler dispatch
pub mod alert_manager;
pub mod dispatch;
pub mod thresholds;

pub use alert_manager::{
    ActionKind, ActionStatus, Alert, AlertAction, AlertDraft, AlertFilter, AlertManager,
    AlertStats, AlertType, AlertsExport, Suppression,
};
pub use dispatch::HandlerRegistry;
pub use thresholds::{Breach, ThresholdTable, Tier, Tiers};
