//! Worker startup and shutdown sequencing.
//!
//! Startup: open the store, clear the stale registry key, build the
//! connection manager, subscribe to the broadcast channel, start the relay.
//! Shutdown: drain, cancel the relay, wait for it, close the subscription,
//! give up this worker's store handles.

use std::sync::Arc;
use std::time::Instant;

use fanout_settings::FanoutSettings;
use fanout_store::{RedisStore, SharedStore, Subscription};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::ServerError;
use crate::manager::ConnectionManager;
use crate::relay::{BroadcastRelay, RelayExit};
use crate::server::AppState;
use crate::shutdown::{DrainOutcome, ShutdownCoordinator};

type RelayHandle = JoinHandle<(RelayExit, Box<dyn Subscription>)>;

/// What happened during [`Lifespan::shutdown`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    /// How the drain ended.
    pub drain: DrainOutcome,
    /// How the relay ended, `None` if its task panicked.
    pub relay_exit: Option<RelayExit>,
}

/// Everything a worker owns between startup and shutdown.
pub struct Lifespan {
    store: Arc<dyn SharedStore>,
    manager: Arc<ConnectionManager>,
    broadcast_channel: Arc<str>,
    coordinator: ShutdownCoordinator,
    cancel: CancellationToken,
    relay: RelayHandle,
    started_at: Instant,
}

/// Identifier of this worker process.
pub fn process_worker_id() -> String {
    std::process::id().to_string()
}

impl Lifespan {
    /// Start a worker against the Redis instance named in `settings`.
    pub async fn start(settings: &FanoutSettings) -> Result<Self, ServerError> {
        let store = RedisStore::connect(&settings.store.url).await?;
        Self::start_with_store(Arc::new(store), settings, process_worker_id()).await
    }

    /// Start a worker on an already opened store.
    pub async fn start_with_store(
        store: Arc<dyn SharedStore>,
        settings: &FanoutSettings,
        worker_id: impl Into<String>,
    ) -> Result<Self, ServerError> {
        let store_settings = &settings.store;

        // a crashed predecessor may have left its connections behind
        store.delete_key(&store_settings.connections_key).await?;

        let manager = Arc::new(ConnectionManager::new(
            store.clone(),
            store_settings.connections_key.clone(),
            worker_id,
            settings.server.outbound_queue,
        ));

        let subscription = store.subscribe(&store_settings.broadcast_channel).await?;

        let cancel = CancellationToken::new();
        let relay = BroadcastRelay::new(manager.clone(), store_settings.poll_interval());
        let relay = tokio::spawn(relay.run(subscription, cancel.clone()));

        info!(
            worker_id = manager.worker_id(),
            channel = %store_settings.broadcast_channel,
            key = %store_settings.connections_key,
            "startup complete"
        );

        Ok(Self {
            store,
            manager,
            broadcast_channel: Arc::from(store_settings.broadcast_channel.as_str()),
            coordinator: ShutdownCoordinator::new(
                settings.shutdown.graceful_timeout(),
                settings.shutdown.log_interval(),
            ),
            cancel,
            relay,
            started_at: Instant::now(),
        })
    }

    /// The connection manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Handler state for the HTTP/WebSocket router.
    pub fn app_state(&self) -> AppState {
        AppState {
            manager: self.manager.clone(),
            store: self.store.clone(),
            broadcast_channel: self.broadcast_channel.clone(),
            start_time: self.started_at,
            metrics: None,
        }
    }

    /// Drain and tear down. Steps after the drain run whatever its outcome.
    pub async fn shutdown(self) -> ShutdownReport {
        let drain = self.coordinator.drain(&self.manager).await;

        self.cancel.cancel();

        let relay_exit = match self.relay.await {
            Ok((exit, subscription)) => {
                if let Err(e) = subscription.close().await {
                    warn!(error = %e, "failed to close broadcast subscription");
                }
                Some(exit)
            }
            Err(e) => {
                warn!(error = %e, "broadcast relay task failed");
                None
            }
        };

        // the connection closes once every handler state clone is gone too
        let worker_id = self.manager.worker_id().to_owned();
        drop(self.manager);
        drop(self.store);
        info!(%worker_id, ?drain, "shutdown complete");

        ShutdownReport { drain, relay_exit }
    }
}
