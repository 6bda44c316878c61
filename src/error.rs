//! Error types for the impmail engine
//!
//! This module provides structured error definitions using thiserror. Every
//! failure is scoped to the request that triggered it; upstream outages are
//! absorbed by the classifier's fallback tiers wherever a substitute exists.

use thiserror::Error;

/// Main error type for impmail operations
#[derive(Error, Debug)]
pub enum ImpMailError {
    /// A required per-user setup step is missing (no active expectation,
    /// too few liked/disliked examples)
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Caller supplied an argument outside the accepted domain
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Embedding generation failed or returned an unusable vector
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// LLM API request failed or returned a malformed judgment
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// Vector or mail store operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Email not found
    #[error("Email not found: {0}")]
    EmailNotFound(String),

    /// A sync pass is already running for this user
    #[error("Sync already in progress for user {0}")]
    SyncInProgress(String),

    /// A long-running loop was started twice
    #[error("Already running")]
    AlreadyRunning,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl ImpMailError {
    /// Whether this error reports a missing precondition rather than a failure
    pub fn is_not_configured(&self) -> bool {
        matches!(self, ImpMailError::NotConfigured(_))
    }
}

/// Result type alias for impmail operations
pub type Result<T> = std::result::Result<T, ImpMailError>;

/// Convert anyhow::Error to ImpMailError
impl From<anyhow::Error> for ImpMailError {
    fn from(err: anyhow::Error) -> Self {
        ImpMailError::Other(err.to_string())
    }
}
