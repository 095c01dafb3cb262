//! In-process shared store.
//!
//! Several connection managers holding clones of one `Arc<MemoryStore>`
//! behave like workers sharing a single Redis instance: sets are shared and
//! every subscriber gets its own copy of each published message.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

use crate::errors::{Result, StoreError};
use crate::traits::{SharedStore, Subscription};

/// Per-channel buffer before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct State {
    sets: HashMap<String, HashSet<String>>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

/// Shared store kept entirely in memory.
pub struct MemoryStore {
    state: Mutex<State>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty, reachable store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    ///
    /// While unavailable every [`SharedStore`] operation fails with
    /// [`StoreError::Unavailable`]. Existing subscriptions keep working.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Sorted members of the set at `key`.
    pub fn members(&self, key: &str) -> Vec<String> {
        let state = self.state.lock();
        let mut members: Vec<String> = state
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Drop a channel, ending every open subscription to it.
    pub fn close_channel(&self, channel: &str) {
        let _ = self.state.lock().channels.remove(channel);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store marked offline".into()))
        }
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn add_member(&self, key: &str, member: &str) -> Result<()> {
        self.check()?;
        let _ = self
            .state
            .lock()
            .sets
            .entry(key.to_owned())
            .or_default()
            .insert(member.to_owned());
        Ok(())
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock();
        if let Some(set) = state.sets.get_mut(key) {
            let _ = set.remove(member);
            if set.is_empty() {
                let _ = state.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn cardinality(&self, key: &str) -> Result<usize> {
        self.check()?;
        Ok(self.state.lock().sets.get(key).map_or(0, HashSet::len))
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        self.check()?;
        let _ = self.state.lock().sets.remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        self.check()?;
        let state = self.state.lock();
        let Some(sender) = state.channels.get(channel) else {
            return Ok(0);
        };
        // send fails only when nobody is listening
        Ok(sender.send(payload.to_owned()).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        self.check()?;
        let receiver = self
            .state
            .lock()
            .channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        Ok(Box::new(MemorySubscription {
            receiver,
            channel: channel.to_owned(),
        }))
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

/// Subscription handed out by [`MemoryStore`].
pub struct MemorySubscription {
    receiver: broadcast::Receiver<String>,
    channel: String,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> Result<Option<String>> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Ok(Some(payload)),
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "subscriber lagged, messages dropped");
                }
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
