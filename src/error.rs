//! Error types for the evaluation engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Coarse classification of an [`EvalError`], for presentation layers that
/// need to map failures onto status codes or exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced dataset, run or notebook does not exist.
    NotFound,
    /// The request itself is malformed or out of range.
    Validation,
    /// The entity is not in a state that allows the operation.
    Conflict,
    /// Generation found nothing to generate from.
    NoEligibleContent,
    /// Search or LLM transport failed.
    ExternalService,
    /// Local I/O, serialization or configuration problem.
    Internal,
}

/// Errors that can occur in the evaluation engine.
#[derive(Error, Debug)]
pub enum EvalError {
    /// A single entity lookup failed.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// One or more runs named in a comparison do not exist.
    #[error("Runs not found: {}", .0.join(", "))]
    RunsNotFound(Vec<String>),

    /// Out-of-range parameter, malformed request or empty aggregate input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An operation was attempted from a state that does not allow it.
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// The dataset has not reached `completed` and cannot be evaluated.
    #[error("Dataset {id} is not ready for evaluation (status: {status})")]
    DatasetNotRunnable { id: String, status: String },

    /// Runs under comparison belong to different datasets.
    #[error("All runs must belong to the same dataset, found: {}", .0.join(", "))]
    DatasetMismatch(Vec<String>),

    /// Runs under comparison were evaluated at different cutoffs.
    #[error("All runs must use the same k value, found: {0:?}")]
    KMismatch(Vec<usize>),

    /// Runs under comparison have not all completed.
    #[error("All runs must be completed: {}", .0.join(", "))]
    RunNotCompleted(Vec<String>),

    /// Dataset generation found no chunks to sample.
    #[error("No eligible content: {0}")]
    NoEligibleContent(String),

    /// Search backend or LLM call failed.
    #[error("External service error: {0}")]
    ExternalService(String),

    /// LLM API error.
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// LLM response parsing error.
    #[error("Failed to parse LLM response: {0}")]
    LlmParse(String),

    /// HTTP request error.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EvalError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::NotFound { .. } | EvalError::RunsNotFound(_) => ErrorKind::NotFound,
            EvalError::Validation(_)
            | EvalError::DatasetMismatch(_)
            | EvalError::KMismatch(_)
            | EvalError::RunNotCompleted(_) => ErrorKind::Validation,
            EvalError::StateConflict(_) | EvalError::DatasetNotRunnable { .. } => {
                ErrorKind::Conflict
            }
            EvalError::NoEligibleContent(_) => ErrorKind::NoEligibleContent,
            EvalError::ExternalService(_)
            | EvalError::LlmApi(_)
            | EvalError::LlmParse(_)
            | EvalError::Http(_) => ErrorKind::ExternalService,
            EvalError::Io { .. } | EvalError::Serialization(_) | EvalError::Config(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// True for failures of a collaborator (search backend, LLM transport).
    pub fn is_external(&self) -> bool {
        self.kind() == ErrorKind::ExternalService
    }
}

impl From<reqwest::Error> for EvalError {
    fn from(err: reqwest::Error) -> Self {
        EvalError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::LlmParse(err.to_string())
    }
}
