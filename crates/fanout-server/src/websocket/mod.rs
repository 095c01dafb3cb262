//! WebSocket connection state and per-client session handling.

pub mod connection;
pub mod session;
