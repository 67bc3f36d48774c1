//! Error types for ranges and their repository.

use thiserror::Error;

/// Errors raised by a [`crate::RangeRepository`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// The store could not be reached. Retried with backoff.
    #[error("range repository unavailable: {0}")]
    Unavailable(String),

    /// The bind credential was missing or rejected.
    #[error("range repository authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A stored pointer is not a number.
    #[error("invalid value '{value}' for {attribute} on {record}")]
    InvalidValue {
        /// Record name.
        record: String,
        /// Attribute name.
        attribute: String,
        /// What was stored.
        value: String,
    },

    /// The store is reachable but reading or writing it failed.
    #[error("range repository storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    /// True for failures that may clear up on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepositoryError::Unavailable(_) | RepositoryError::Storage(_)
        )
    }
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                RepositoryError::Unavailable(err.to_string())
            }
            _ => RepositoryError::Storage(err.to_string()),
        }
    }
}

/// Errors raised by [`crate::RangeAllocator`].
#[derive(Debug, Error)]
pub enum RangeError {
    /// No values are left locally and none could be claimed.
    #[error("counter '{counter}' has no values left")]
    RangeExhausted {
        /// Counter name.
        counter: String,
    },

    /// Extension gave up after its retry budget.
    #[error("extending counter '{counter}' failed after {attempts} attempt(s): {reason}")]
    RangeExtensionFailed {
        /// Counter name.
        counter: String,
        /// Failed attempts made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },

    /// The counter is not configured.
    #[error("unknown counter '{0}'")]
    UnknownCounter(String),

    /// A repository failure that retrying cannot fix.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The allocator configuration is unusable.
    #[error("invalid range configuration: {0}")]
    InvalidConfig(String),
}
