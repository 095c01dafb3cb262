//! # fanout-store
//!
//! The shared store that lets independent workers act as one connection
//! pool: a membership set of live connection identifiers and a pub/sub
//! channel for broadcasts.
//!
//! - [`SharedStore`] / [`Subscription`]: the operations the coordination
//!   layer needs, nothing more
//! - [`RedisStore`]: production backend
//! - [`MemoryStore`]: in-process backend for tests and single-node runs

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod redis_store;
pub mod traits;

pub use errors::{Result, StoreError};
pub use memory::{MemoryStore, MemorySubscription};
pub use redis_store::{RedisStore, RedisSubscription};
pub use traits::{SharedStore, Subscription};
