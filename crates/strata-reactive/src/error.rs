//! Error types for reactive containers

use thiserror::Error;

/// Failure raised by a container operation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReactiveError {
    /// The container refused the operation, with the reason it gave
    #[error("{0}")]
    Rejected(String),

    /// The container does not support the operation at all
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Index outside the container bounds
    #[error("Index {index} out of bounds for size {size}")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Current size
        size: usize,
    },

    /// An action failed while running
    #[error("Action failed: {0}")]
    ActionFailed(String),
}

impl ReactiveError {
    /// Rejection with the given message
    pub fn rejected(message: impl Into<String>) -> Self {
        ReactiveError::Rejected(message.into())
    }
}

/// Result alias for container operations
pub type ReactiveResult<T> = Result<T, ReactiveError>;
