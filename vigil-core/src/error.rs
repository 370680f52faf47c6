//! Error types for the Vigil core library.
//!
//! Uses `thiserror` for public API error types with structured variants covering
//! configuration, scoring, incident lifecycle, resource pool and persistence domains.

use std::path::PathBuf;

use crate::incident::IncidentStatus;

/// Top-level error type for the Vigil core library.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scoring error: {0}")]
    Scoring(#[from] ScoringError),

    #[error("Incident error: {0}")]
    Incident(#[from] IncidentError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration for '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("Failed to extract configuration: {0}")]
    Extract(#[from] Box<figment::Error>),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while scoring a detection batch.
///
/// These never escape a cycle: the scorer catches them and marks the
/// assessment as partial.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("Outlier model could not be fitted: {reason}")]
    DegenerateModel { reason: String },

    #[error("Feature vector has {actual} dimensions, model expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors from the incident lifecycle manager.
#[derive(Debug, thiserror::Error)]
pub enum IncidentError {
    #[error("Incident not found among active incidents: {0}")]
    NotFound(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: IncidentStatus,
        to: IncidentStatus,
    },
}

/// Errors from the resource pool.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already registered: {0}")]
    AlreadyRegistered(String),
}

/// Errors from the persistence contract.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VigilError>;
