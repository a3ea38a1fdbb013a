//! Engine error taxonomy.
//!
//! One public enum for every failure the engine surfaces. Provider errors
//! carry a retryability flag: the planner retries transient failures
//! internally and gives up immediately on quota exhaustion.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("provider quota exhausted: {0}")]
    ProviderQuota(String),

    #[error("capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Transient provider failure, worth retrying with backoff.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: true,
        }
    }

    /// Provider failure that will not heal on retry.
    pub fn provider_fatal(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { retryable: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
