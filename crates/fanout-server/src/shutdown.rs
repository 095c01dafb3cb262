//! Drain-on-shutdown: hold a worker open until the cluster has no
//! connections left or the graceful timeout runs out.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::manager::ConnectionManager;

/// How a drain ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The global connection count reached zero.
    Drained,
    /// The deadline passed first. `last_count` is the last observed global
    /// count, `None` if the store could not be read on the final check.
    TimedOut {
        /// Last observed global count.
        last_count: Option<usize>,
    },
}

/// Polls the global connection count during shutdown.
#[derive(Clone, Debug)]
pub struct ShutdownCoordinator {
    graceful_timeout: Duration,
    check_interval: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator that waits at most `graceful_timeout`, checking
    /// every `check_interval`.
    pub fn new(graceful_timeout: Duration, check_interval: Duration) -> Self {
        Self {
            graceful_timeout,
            check_interval: check_interval.max(Duration::from_millis(1)),
        }
    }

    /// Wait for the global connection count to reach zero.
    ///
    /// Checks are strictly sequential, one per interval, and the last wait
    /// is cut short at the deadline. A store failure counts as "unknown",
    /// not zero, so waiting continues. This never fails: after it returns,
    /// shutdown proceeds regardless of any connections still open.
    pub async fn drain(&self, manager: &ConnectionManager) -> DrainOutcome {
        // an unrepresentable deadline means "wait until drained"
        let deadline = Instant::now().checked_add(self.graceful_timeout);
        info!(
            worker_id = manager.worker_id(),
            timeout_secs = self.graceful_timeout.as_secs(),
            "shutdown initiated, waiting for global disconnect"
        );

        loop {
            let count = match manager.global_active_count().await {
                Ok(count) => Some(count),
                Err(e) => {
                    warn!(worker_id = manager.worker_id(), error = %e, "global count unavailable during drain");
                    None
                }
            };
            let now = Instant::now();

            if count == Some(0) {
                info!(worker_id = manager.worker_id(), "all global ws connections closed");
                return DrainOutcome::Drained;
            }

            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(now));
            if remaining == Some(Duration::ZERO) {
                warn!(
                    worker_id = manager.worker_id(),
                    global = count,
                    "force shutdown, clients still connected globally"
                );
                return DrainOutcome::TimedOut { last_count: count };
            }

            info!(
                worker_id = manager.worker_id(),
                global = count,
                remaining_secs = remaining.map(|r| r.as_secs()),
                "shutdown progress"
            );

            let wait = remaining.map_or(self.check_interval, |r| self.check_interval.min(r));
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fanout_logging::capture_logs;
    use fanout_store::MemoryStore;
    use tracing::Level;

    use super::*;

    const KEY: &str = "ws:connections";

    fn manager(store: &Arc<MemoryStore>) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(store.clone(), KEY, "1", 8))
    }

    #[tokio::test(start_paused = true)]
    async fn empty_cluster_drains_immediately() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store);
        let start = Instant::now();

        let outcome = ShutdownCoordinator::new(Duration::from_secs(30), Duration::from_secs(5))
            .drain(&manager)
            .await;

        assert_eq!(outcome, DrainOutcome::Drained);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn completes_within_one_tick_of_last_disconnect() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store);
        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(manager.connect().await.unwrap());
        }

        let disconnecter = {
            let manager = manager.clone();
            let ids: Vec<_> = held.iter().map(|(conn, _)| conn.id().clone()).collect();
            let base = Instant::now();
            tokio::spawn(async move {
                for (id, at) in ids.iter().zip([3_u64, 7, 12]) {
                    tokio::time::sleep_until(base + Duration::from_secs(at)).await;
                    let _ = manager.disconnect(id).await.unwrap();
                }
            })
        };

        let start = Instant::now();
        let outcome = ShutdownCoordinator::new(Duration::from_secs(30), Duration::from_secs(5))
            .drain(&manager)
            .await;
        let elapsed = start.elapsed();
        disconnecter.await.unwrap();

        assert_eq!(outcome, DrainOutcome::Drained);
        assert!(elapsed >= Duration::from_secs(12), "drained too early: {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(17), "waited too long: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn forced_after_timeout_with_connections_left() {
        let (logs, _guard) = capture_logs();
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store);
        let _held = manager.connect().await.unwrap();

        let start = Instant::now();
        let outcome = ShutdownCoordinator::new(Duration::from_secs(2), Duration::from_secs(5))
            .drain(&manager)
            .await;

        assert_eq!(outcome, DrainOutcome::TimedOut { last_count: Some(1) });
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "forced too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "forced too late: {elapsed:?}");
        assert!(logs.has_event(Level::WARN, "force shutdown"));
        assert_eq!(logs.count_at_level(Level::ERROR), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_checks_once() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store);
        let _held = manager.connect().await.unwrap();

        let outcome = ShutdownCoordinator::new(Duration::ZERO, Duration::from_secs(5))
            .drain(&manager)
            .await;
        assert_eq!(outcome, DrainOutcome::TimedOut { last_count: Some(1) });
    }

    #[tokio::test(start_paused = true)]
    async fn store_outage_keeps_waiting_until_deadline() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store);
        store.set_available(false);

        let start = Instant::now();
        let outcome = ShutdownCoordinator::new(Duration::from_secs(10), Duration::from_secs(5))
            .drain(&manager)
            .await;

        assert_eq!(outcome, DrainOutcome::TimedOut { last_count: None });
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_waits_for_drain() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store);
        let (conn, _rx) = manager.connect().await.unwrap();

        let leaver = {
            let manager = manager.clone();
            let id = conn.id().clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(8)).await;
                let _ = manager.disconnect(&id).await.unwrap();
            })
        };

        let outcome = ShutdownCoordinator::new(Duration::MAX, Duration::from_secs(5))
            .drain(&manager)
            .await;
        leaver.await.unwrap();
        assert_eq!(outcome, DrainOutcome::Drained);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_logged_each_check() {
        let (logs, _guard) = capture_logs();
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store);
        let _held = manager.connect().await.unwrap();

        let _ = ShutdownCoordinator::new(Duration::from_secs(12), Duration::from_secs(5))
            .drain(&manager)
            .await;

        // checks at 0s, 5s, 10s log progress; the 12s check is the forced one
        let progress = logs.matching("shutdown progress");
        assert_eq!(progress.len(), 3);
        assert_eq!(progress[0].field("global"), Some("1"));
        assert_eq!(progress[0].field("remaining_secs"), Some("12"));
    }
}
