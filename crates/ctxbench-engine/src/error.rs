//! Engine error taxonomy with fatality classification.
//!
//! Every failure in the execution engine is represented here. Callers can
//! query `failure_class()` / `is_fatal()` instead of string matching.
//!
//! ## Failure classes
//!
//! | Class            | Fatal to the request | Recovery                      |
//! |------------------|----------------------|-------------------------------|
//! | Validation       | yes                  | — (reject before execution)   |
//! | Configuration    | yes                  | — (reject before execution)   |
//! | ExternalService  | no                   | degraded per-protocol result  |
//! | Cache            | no                   | treated as a miss, logged     |
//! | Scoring          | no                   | quality defaults to 5         |
//! | Internal         | no                   | degraded per-protocol result  |

use std::fmt;

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Classification used to decide how far a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Malformed request — rejected before any execution.
    Validation,
    /// Invalid per-protocol configuration — rejected before execution.
    Configuration,
    /// Model Invoker or Retrieval Index failure — degrades one protocol.
    ExternalService,
    /// Result cache unavailable — recovered locally, never surfaced.
    Cache,
    /// Quality scoring failed — recovered locally with a default score.
    Scoring,
    /// Anything else — degrades one protocol.
    Internal,
}

impl FailureClass {
    /// Whether this class aborts the whole request.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Validation | Self::Configuration)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Configuration => write!(f, "configuration"),
            Self::ExternalService => write!(f, "external_service"),
            Self::Cache => write!(f, "cache"),
            Self::Scoring => write!(f, "scoring"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Unified error type for all engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The request violated one or more surface constraints.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A per-protocol configuration value is malformed or out of range.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A call to an external collaborator failed (network, HTTP status,
    /// deadline exceeded, malformed reply).
    #[error("external service error [{service}]: {message}")]
    ExternalService { service: String, message: String },

    /// The result cache could not be read or written.
    #[error("cache error: {0}")]
    Cache(String),

    /// The quality-scoring reply could not be interpreted.
    #[error("scoring error: {0}")]
    Scoring(String),

    /// Any other error that doesn't fit the above categories.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Classify this error for propagation decisions.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Validation(_) => FailureClass::Validation,
            Self::Configuration(_) => FailureClass::Configuration,
            Self::ExternalService { .. } => FailureClass::ExternalService,
            Self::Cache(_) => FailureClass::Cache,
            Self::Scoring(_) => FailureClass::Scoring,
            Self::Internal(_) => FailureClass::Internal,
        }
    }

    /// Returns `true` if this error must abort the whole request.
    pub fn is_fatal(&self) -> bool {
        self.failure_class().is_fatal()
    }

    /// Build an `ExternalService` variant conveniently.
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }
}
