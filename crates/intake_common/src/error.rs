//! Error types for Intake.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("No CV configured for source '{source_id}'")]
    ProfileNotFound { source_id: String },

    #[error("Invalid CV '{path}': {reason}")]
    InvalidProfile { path: String, reason: String },

    #[error("Metadata store unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("No ingestion snapshot for {date}")]
    SnapshotNotFound { date: NaiveDate },

    #[error("Iteration cap of {cap} reached before every source was resolved")]
    IterationCapExceeded { cap: usize },

    #[error("Invalid controller transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IntakeError {
    pub fn code(&self) -> i32 {
        match self {
            IntakeError::ProfileNotFound { .. } => -32010,
            IntakeError::InvalidProfile { .. } => -32011,
            IntakeError::MetadataUnavailable(_) => -32020,
            IntakeError::SnapshotNotFound { .. } => -32021,
            IntakeError::IterationCapExceeded { .. } => -32030,
            IntakeError::InvalidTransition { .. } => -32031,
            IntakeError::InvalidRequest(_) => -32600,
            IntakeError::Config(_) => -32040,
            IntakeError::Io(_) => -32006,
            IntakeError::Json(_) => -32700,
        }
    }

    /// Run-level errors abort the whole analysis instead of degrading one source.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            IntakeError::MetadataUnavailable(_)
                | IntakeError::SnapshotNotFound { .. }
                | IntakeError::InvalidRequest(_)
                | IntakeError::Config(_)
        )
    }
}

/// A detector could not evaluate its input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    #[error("file '{file_name}' belongs to source '{found}', expected '{expected}'")]
    ForeignFile {
        file_name: String,
        expected: String,
        found: String,
    },

    #[error("upload window for {weekday} starts at {start} after it ends at {end}")]
    InvertedWindow {
        weekday: String,
        start: String,
        end: String,
    },

    #[error("malformed input: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, IntakeError>;
