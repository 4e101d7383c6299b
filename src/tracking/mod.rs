//! Error ingestion, categorization and global failure capture

pub mod capture;
pub mod error_tracker;
pub mod rules;

pub use capture::{CaptureOrigin, CapturedFailure, GlobalCapture};
pub use error_tracker::{
    AiRequest, ErrorContext, ErrorFilter, ErrorInput, ErrorRecord, ErrorStats, ErrorTracker,
    ErrorsExport, NetworkRequest, TopError, TrackContext,
};
pub use rules::{CategoryRule, CategoryRules, ErrorSource, ErrorType};
