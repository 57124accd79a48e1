//! Error types for Wattson Core
//!
//! Every stage of the pipeline reports failures through [`WattsonError`].
//! Stage-level failures are converted into per-unit report entries by the
//! orchestrator; only [`WattsonError::Configuration`] is fatal.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for Wattson operations
pub type Result<T> = std::result::Result<T, WattsonError>;

/// Main error type for Wattson operations
#[derive(Error, Debug)]
pub enum WattsonError {
    /// Telemetry or weather fetch failed; the unit is skipped this cycle
    #[error("Data unavailable for unit {unit}: {reason}")]
    DataUnavailable { unit: String, reason: String },

    /// Explainability, knowledge store or simulator failed after retries
    #[error("Diagnosis unavailable for unit {unit}: {reason}")]
    DiagnosisUnavailable { unit: String, reason: String },

    /// The command channel refused the command
    #[error("Command rejected for unit {unit}: {reason}")]
    CommandRejected { unit: String, reason: String },

    /// The undo command was refused; manual intervention is required
    #[error("Rollback failed for unit {unit} (command {command_id}): {reason}")]
    RollbackFailed {
        unit: String,
        command_id: String,
        reason: String,
    },

    /// Invalid thresholds, weights or catalog entries
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A collaborator call failed (retryable)
    #[error("Service {service} failed: {message}")]
    Service { service: String, message: String },

    /// A collaborator call did not complete in time (retryable)
    #[error("Service {service} timed out after {after_ms}ms")]
    Timeout { service: String, after_ms: u64 },

    /// The cycle was cancelled before this work completed
    #[error("Cancelled")]
    Cancelled,

    /// An internal invariant was violated
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Execution record not found in the ledger
    #[error("Execution record not found: {0}")]
    RecordNotFound(Uuid),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse errors
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML render errors
    #[error("TOML render error: {0}")]
    TomlRender(#[from] toml::ser::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<WattsonError>,
    },
}

/// Stable error taxonomy surfaced in cycle reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DataUnavailable,
    DiagnosisUnavailable,
    CommandRejected,
    RollbackFailed,
    Configuration,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::DataUnavailable => "data-unavailable",
            ErrorKind::DiagnosisUnavailable => "diagnosis-unavailable",
            ErrorKind::CommandRejected => "command-rejected",
            ErrorKind::RollbackFailed => "rollback-failed",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(label)
    }
}

impl WattsonError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Shorthand for a failed collaborator call
    pub fn service(service: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Service {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// Map onto the report taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            WattsonError::DataUnavailable { .. } => ErrorKind::DataUnavailable,
            WattsonError::DiagnosisUnavailable { .. } => ErrorKind::DiagnosisUnavailable,
            WattsonError::CommandRejected { .. } => ErrorKind::CommandRejected,
            WattsonError::RollbackFailed { .. } => ErrorKind::RollbackFailed,
            WattsonError::Configuration(_) => ErrorKind::Configuration,
            WattsonError::Cancelled => ErrorKind::Cancelled,
            WattsonError::WithContext { source, .. } => source.kind(),
            _ => ErrorKind::Internal,
        }
    }

    /// Whether a retry may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            WattsonError::Service { .. }
            | WattsonError::Timeout { .. }
            | WattsonError::DataUnavailable { .. }
            | WattsonError::Io(_) => true,
            WattsonError::WithContext { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}
