//! Error types for the risk engine

use thiserror::Error;

/// Risk engine error
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed primary input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Repository read/write failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Best-effort remote collaborator failed or timed out
    #[error("Remote risk service unavailable: {0}")]
    RemoteUnavailable(String),

    /// Rule expression could not be compiled
    #[error("Rule {rule_id} failed to compile: {message}")]
    RuleCompile {
        /// Rule identifier
        rule_id: String,
        /// Parser message
        message: String,
    },

    /// Compiled rule failed against a fact set
    #[error("Rule evaluation failed: {0}")]
    RuleEval(String),

    /// Final analysis result could not be recorded
    #[error("Failed to persist analysis result: {0}")]
    Persistence(String),

    /// Caller deadline expired before evaluation finished
    #[error("Evaluation deadline exceeded after {0}ms")]
    DeadlineExceeded(u128),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the aggregator must surface this error instead of degrading
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::Persistence(_) | Error::DeadlineExceeded(_)
        )
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
