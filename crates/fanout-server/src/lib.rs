//! # fanout-server
//!
//! Makes the in-memory connections of independent workers behave like one
//! logical WebSocket connection pool.
//!
//! - [`ConnectionManager`]: local registry mirrored into the shared set,
//!   local/global counts, local fan-out with eviction of failing clients
//! - [`BroadcastRelay`]: forwards each shared-channel message to local fan-out
//! - [`ShutdownCoordinator`]: drains until the cluster has no connections or
//!   the graceful timeout passes
//! - [`Lifespan`]: ordered startup and shutdown of all of the above
//! - [`router`]: status, broadcast trigger, health, metrics, and `/ws` echo

#![deny(unsafe_code)]

pub mod errors;
pub mod health;
pub mod lifecycle;
pub mod manager;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use errors::{ApiError, ServerError};
pub use lifecycle::{Lifespan, ShutdownReport, process_worker_id};
pub use manager::ConnectionManager;
pub use relay::{BroadcastRelay, RelayExit};
pub use server::{AppState, bind, router, serve};
pub use shutdown::{DrainOutcome, ShutdownCoordinator};
pub use websocket::connection::{ClientConnection, ConnectionId, SendFault, SendOutcome};
