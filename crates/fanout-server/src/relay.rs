//! Forwards every message on the shared broadcast channel to this worker's
//! local connections.

use std::sync::Arc;
use std::time::Duration;

use fanout_store::Subscription;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::manager::ConnectionManager;
use crate::metrics::RELAY_MESSAGES_TOTAL;

/// Why the relay loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayExit {
    /// The cancellation token fired.
    Cancelled,
    /// The store ended the subscription.
    SubscriptionClosed,
}

/// Background loop bound to one broadcast subscription.
pub struct BroadcastRelay {
    manager: Arc<ConnectionManager>,
    poll_interval: Duration,
}

impl BroadcastRelay {
    /// Create a relay delivering into `manager`.
    ///
    /// `poll_interval` bounds each individual wait for a message; it only
    /// sets the idle tick, cancellation is observed immediately.
    pub fn new(manager: Arc<ConnectionManager>, poll_interval: Duration) -> Self {
        Self {
            manager,
            poll_interval,
        }
    }

    /// Run until `cancel` fires or the subscription ends.
    ///
    /// Each payload is handed to [`ConnectionManager::broadcast_local`]
    /// unchanged, once. The subscription is returned so the caller can
    /// close it.
    pub async fn run(
        self,
        mut subscription: Box<dyn Subscription>,
        cancel: CancellationToken,
    ) -> (RelayExit, Box<dyn Subscription>) {
        info!(worker_id = self.manager.worker_id(), "broadcast relay started");

        let exit = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break RelayExit::Cancelled,
                polled = tokio::time::timeout(self.poll_interval, subscription.next_message()) => {
                    match polled {
                        Err(_) => trace!("relay idle"),
                        Ok(Ok(Some(payload))) => {
                            counter!(RELAY_MESSAGES_TOTAL).increment(1);
                            let delivered = self.manager.broadcast_local(&payload).await;
                            debug!(delivered, "relayed broadcast");
                        }
                        Ok(Ok(None)) => break RelayExit::SubscriptionClosed,
                        Ok(Err(e)) => warn!(error = %e, "failed to receive broadcast message"),
                    }
                }
            }
        };

        match exit {
            RelayExit::Cancelled => {
                info!(worker_id = self.manager.worker_id(), "broadcast relay stopped");
            }
            RelayExit::SubscriptionClosed => warn!(
                worker_id = self.manager.worker_id(),
                "broadcast subscription closed, relay stopped"
            ),
        }
        (exit, subscription)
    }
}

#[cfg(test)]
mod tests {
    use fanout_store::{MemoryStore, SharedStore};
    use tokio::time::Instant;

    use super::*;

    const KEY: &str = "ws:connections";
    const CHANNEL: &str = "ws:broadcast";

    async fn start_relay(
        store: &Arc<MemoryStore>,
        manager: &Arc<ConnectionManager>,
        poll_interval: Duration,
    ) -> (
        CancellationToken,
        tokio::task::JoinHandle<(RelayExit, Box<dyn Subscription>)>,
    ) {
        let subscription = store.subscribe(CHANNEL).await.unwrap();
        let cancel = CancellationToken::new();
        let relay = BroadcastRelay::new(manager.clone(), poll_interval);
        let handle = tokio::spawn(relay.run(subscription, cancel.clone()));
        (cancel, handle)
    }

    #[tokio::test]
    async fn forwards_published_payload_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(ConnectionManager::new(store.clone(), KEY, "1", 8));
        let (_conn, mut rx) = manager.connect().await.unwrap();
        let (cancel, handle) = start_relay(&store, &manager, Duration::from_secs(1)).await;

        let _ = store.publish(CHANNEL, r#"{"kind":"news","n":1}"#).await.unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), r#"{"kind":"news","n":1}"#);

        cancel.cancel();
        let (exit, _sub) = handle.await.unwrap();
        assert_eq!(exit, RelayExit::Cancelled);
    }

    #[tokio::test]
    async fn each_worker_delivers_once() {
        let store = Arc::new(MemoryStore::new());
        let mut workers = Vec::new();
        for w in 0..3 {
            let manager = Arc::new(ConnectionManager::new(store.clone(), KEY, format!("w{w}"), 8));
            let mut receivers = Vec::new();
            for _ in 0..2 {
                let (_conn, rx) = manager.connect().await.unwrap();
                receivers.push(rx);
            }
            let relay = start_relay(&store, &manager, Duration::from_secs(1)).await;
            workers.push((manager, receivers, relay));
        }

        assert_eq!(store.publish(CHANNEL, "hello cluster").await.unwrap(), 3);
        assert_eq!(store.publish(CHANNEL, "end").await.unwrap(), 3);

        // a duplicate would show up before the end marker
        for (_, receivers, _) in &mut workers {
            for rx in receivers.iter_mut() {
                assert_eq!(&*rx.recv().await.unwrap(), "hello cluster");
                assert_eq!(&*rx.recv().await.unwrap(), "end");
            }
        }
        for (_, _, (cancel, handle)) in workers {
            cancel.cancel();
            let _ = handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_immediate() {
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(ConnectionManager::new(store.clone(), KEY, "1", 8));
        let (cancel, handle) = start_relay(&store, &manager, Duration::from_secs(60)).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        let cancelled_at = Instant::now();
        cancel.cancel();
        let (exit, _sub) = handle.await.unwrap();

        assert_eq!(exit, RelayExit::Cancelled);
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn ends_when_subscription_closes() {
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(ConnectionManager::new(store.clone(), KEY, "1", 8));
        let (_cancel, handle) = start_relay(&store, &manager, Duration::from_millis(50)).await;

        store.close_channel(CHANNEL);
        let (exit, _sub) = handle.await.unwrap();
        assert_eq!(exit, RelayExit::SubscriptionClosed);
    }

    #[tokio::test]
    async fn does_not_republish() {
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(ConnectionManager::new(store.clone(), KEY, "1", 8));
        let (cancel, handle) = start_relay(&store, &manager, Duration::from_millis(50)).await;
        let mut observer = store.subscribe(CHANNEL).await.unwrap();

        let _ = store.publish(CHANNEL, "once").await.unwrap();
        assert_eq!(observer.next_message().await.unwrap().as_deref(), Some("once"));

        let again = tokio::time::timeout(Duration::from_millis(200), observer.next_message()).await;
        assert!(again.is_err(), "relay must not publish back to the channel");

        cancel.cancel();
        let _ = handle.await.unwrap();
    }
}
