//! `/health` endpoint body.
//!
//! A store failure makes the worker `degraded`, never down: the endpoint
//! itself still answers 200.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` or `"degraded"`.
    pub status: &'static str,
    /// Seconds since the worker started.
    pub uptime_secs: u64,
    /// Shared store reachability.
    pub store: StoreHealth,
    /// Connection counts.
    pub websocket: WebsocketHealth,
}

/// Shared store part of [`HealthResponse`].
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    /// Whether the store answered a ping.
    pub ok: bool,
}

/// Connection part of [`HealthResponse`].
#[derive(Debug, Clone, Serialize)]
pub struct WebsocketHealth {
    /// Connections held by this worker.
    pub local_active_connections: usize,
    /// Connections across the cluster, `null` when the store is unreachable.
    pub global_active_connections: Option<usize>,
}

/// Build a health response from probe results.
pub fn health_check(
    start_time: Instant,
    store_ok: bool,
    local: usize,
    global: Option<usize>,
) -> HealthResponse {
    let status = if store_ok && global.is_some() {
        "ok"
    } else {
        "degraded"
    };
    HealthResponse {
        status,
        uptime_secs: start_time.elapsed().as_secs(),
        store: StoreHealth { ok: store_ok },
        websocket: WebsocketHealth {
            local_active_connections: local,
            global_active_connections: global,
        },
    }
}
