//! Error types for reqchain

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using reqchain Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in reqchain operations
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown mode, malformed workflow or invalid option values.
    /// Raised before anything is dispatched.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dependency leveling could not place a step (cycle or missing reference)
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// A keyed entry (response, context, execution) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Illegal chain status transition
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// The transport failed to produce a response
    #[error("Transport error: {0}")]
    Transport(String),

    /// Timeout waiting for an item or step
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Response validation failed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Run was cancelled before the operation was dispatched
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Step execution errors
    #[error("Step error: {0}")]
    Step(String),

    /// Setup or teardown hook failure
    #[error("Hook error: {0}")]
    Hook(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Classify this error for per-item failure records.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Transport(_) | Error::Http(_) | Error::Io(_) => FailureKind::Transport,
            Error::Timeout(_) => FailureKind::Timeout,
            Error::Validation(_) => FailureKind::Validation,
            Error::Dependency(_) => FailureKind::Dependency,
            Error::Cancelled(_) => FailureKind::Cancelled,
            _ => FailureKind::Step,
        }
    }
}

/// Classifies a recorded item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Timeout,
    Validation,
    Dependency,
    Cancelled,
    Step,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Transport => "transport",
            FailureKind::Timeout => "timeout",
            FailureKind::Validation => "validation",
            FailureKind::Dependency => "dependency",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Step => "step",
        };
        f.write_str(s)
    }
}

/// A failure recorded against one item or step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ItemFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&Error> for ItemFailure {
    fn from(err: &Error) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl std::fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}
