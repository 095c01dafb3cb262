//! Shared store error types.

use thiserror::Error;

/// Errors returned by a [`SharedStore`](crate::SharedStore) or
/// [`Subscription`](crate::Subscription).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The Redis client reported a failure (connect, I/O, protocol).
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// The store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
