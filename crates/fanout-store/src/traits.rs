//! Backend-agnostic view of the shared store.

use async_trait::async_trait;

use crate::errors::Result;

/// Cross-worker coordination primitives: one membership set per key plus
/// fire-and-forget pub/sub channels.
///
/// Implementations must be safe to call concurrently from many tasks and,
/// for real backends, from many processes.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Add `member` to the set at `key`. Adding an existing member is a no-op.
    async fn add_member(&self, key: &str, member: &str) -> Result<()>;

    /// Remove `member` from the set at `key`. Removing a missing member is a no-op.
    async fn remove_member(&self, key: &str, member: &str) -> Result<()>;

    /// Number of members in the set at `key` (0 if the key does not exist).
    async fn cardinality(&self, key: &str) -> Result<usize>;

    /// Delete `key` entirely.
    async fn delete_key(&self, key: &str) -> Result<()>;

    /// Publish `payload` on `channel`, returning how many subscribers received it.
    ///
    /// Messages are not persisted: subscribers that join later never see them.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    /// Open a dedicated subscription to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>>;

    /// Round-trip liveness check.
    async fn ping(&self) -> Result<()>;
}

/// A live subscription to one pub/sub channel.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` once the stream has ended. Cancel-safe: dropping
    /// the returned future before it completes loses no message.
    async fn next_message(&mut self) -> Result<Option<String>>;

    /// Unsubscribe and release the underlying connection.
    async fn close(self: Box<Self>) -> Result<()>;
}
