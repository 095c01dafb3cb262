//! Per-worker connection registry mirrored into the shared store.
//!
//! The local registry is authoritative for fan-out; the shared set only
//! exists so every worker can read the cluster-wide count. Local state is
//! always updated first, so a store failure can at worst leave the shared
//! set stale, never the local one.

use std::collections::HashMap;
use std::sync::Arc;

use fanout_store::{SharedStore, StoreError};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics::{
    WS_BROADCAST_EVICTIONS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::websocket::connection::{ClientConnection, ConnectionId, SendOutcome};

/// Live connections held by this worker, in connect order.
#[derive(Default)]
struct LocalRegistry {
    order: Vec<ConnectionId>,
    by_id: HashMap<ConnectionId, Arc<ClientConnection>>,
}

impl LocalRegistry {
    fn insert(&mut self, conn: Arc<ClientConnection>) -> bool {
        if self.by_id.contains_key(conn.id()) {
            return false;
        }
        self.order.push(conn.id().clone());
        let _ = self.by_id.insert(conn.id().clone(), conn);
        true
    }

    fn remove(&mut self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let conn = self.by_id.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(conn)
    }

    fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Owns one worker's live connections and mirrors them into the shared set.
pub struct ConnectionManager {
    store: Arc<dyn SharedStore>,
    connections_key: String,
    worker_id: String,
    outbound_queue: usize,
    registry: Mutex<LocalRegistry>,
}

impl ConnectionManager {
    /// Create a manager bound to `connections_key` in `store`.
    ///
    /// `worker_id` prefixes every issued connection identifier and must be
    /// unique among workers sharing the store (the process id by default).
    pub fn new(
        store: Arc<dyn SharedStore>,
        connections_key: impl Into<String>,
        worker_id: impl Into<String>,
        outbound_queue: usize,
    ) -> Self {
        Self {
            store,
            connections_key: connections_key.into(),
            worker_id: worker_id.into(),
            outbound_queue: outbound_queue.max(1),
            registry: Mutex::new(LocalRegistry::default()),
        }
    }

    /// Identifier of this worker.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Register a new connection locally and in the shared set.
    ///
    /// Returns the connection together with the receiving half of its
    /// outbound queue, which the caller's writer task must drain. If the
    /// shared set cannot be updated, the local registration is rolled back
    /// and the error returned.
    pub async fn connect(
        &self,
    ) -> Result<(Arc<ClientConnection>, mpsc::Receiver<Arc<str>>), StoreError> {
        let (tx, rx) = mpsc::channel(self.outbound_queue);
        let conn = Arc::new(ClientConnection::new(
            ConnectionId::generate(&self.worker_id),
            tx,
        ));

        let inserted = self.registry.lock().insert(conn.clone());
        debug_assert!(inserted, "freshly generated connection id already registered");

        if let Err(e) = self
            .store
            .add_member(&self.connections_key, conn.id().as_str())
            .await
        {
            let _ = self.registry.lock().remove(conn.id());
            warn!(
                worker_id = %self.worker_id,
                connection_id = %conn.id(),
                error = %e,
                "failed to register connection in shared store"
            );
            return Err(e);
        }

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

        let global = self.global_count_for_log().await;
        info!(
            worker_id = %self.worker_id,
            connection_id = %conn.id(),
            local = self.local_active_count(),
            global,
            "ws connected"
        );
        Ok((conn, rx))
    }

    /// Deregister a connection. Unknown ids are a no-op returning `Ok(false)`.
    ///
    /// Local removal always happens; a failure to update the shared set is
    /// returned after the fact. The connection is also asked to close its
    /// socket, so a deregistered client never keeps a silent session.
    pub async fn disconnect(&self, id: &ConnectionId) -> Result<bool, StoreError> {
        let Some(conn) = self.registry.lock().remove(id) else {
            debug!(worker_id = %self.worker_id, connection_id = %id, "disconnect of unknown connection ignored");
            return Ok(false);
        };
        conn.close();

        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);

        let removed = self
            .store
            .remove_member(&self.connections_key, id.as_str())
            .await;

        let global = self.global_count_for_log().await;
        info!(
            worker_id = %self.worker_id,
            connection_id = %id,
            local = self.local_active_count(),
            global,
            "ws disconnected"
        );
        removed.map(|()| true)
    }

    /// Number of connections held by this worker.
    pub fn local_active_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Number of connections across every worker sharing the store.
    pub async fn global_active_count(&self) -> Result<usize, StoreError> {
        self.store.cardinality(&self.connections_key).await
    }

    /// Whether `id` is currently registered with this worker.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.registry.lock().by_id.contains_key(id)
    }

    /// Deliver `message` to every local connection, in connect order.
    ///
    /// Iterates a snapshot, so connections joining mid-broadcast may or may
    /// not receive the message. Any connection that cannot accept the frame
    /// is disconnected; the others still receive it. Returns how many
    /// connections the frame was queued for.
    pub async fn broadcast_local(&self, message: &str) -> usize {
        let targets = self.registry.lock().snapshot();
        let frame: Arc<str> = Arc::from(message);
        info!(
            worker_id = %self.worker_id,
            local = targets.len(),
            bytes = message.len(),
            "local broadcast"
        );

        let mut delivered = 0;
        let mut failed = Vec::new();
        for conn in &targets {
            match conn.send(frame.clone()) {
                SendOutcome::Sent => delivered += 1,
                outcome => {
                    debug!(connection_id = %conn.id(), ?outcome, "send failed, evicting");
                    failed.push(conn.id().clone());
                }
            }
        }

        for id in failed {
            counter!(WS_BROADCAST_EVICTIONS_TOTAL).increment(1);
            if let Err(e) = self.disconnect(&id).await {
                warn!(
                    worker_id = %self.worker_id,
                    connection_id = %id,
                    error = %e,
                    "evicted connection could not be removed from shared store"
                );
            }
        }
        delivered
    }

    async fn global_count_for_log(&self) -> Option<usize> {
        match self.global_active_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                debug!(error = %e, "global count unavailable");
                None
            }
        }
    }
}
