//! WebSocket client connection state.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Cluster-unique identifier of one live socket: `<worker-id>:<uuid v4>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Issue a fresh identifier for a connection accepted by `worker_id`.
    pub fn generate(worker_id: &str) -> Self {
        Self(format!("{worker_id}:{}", Uuid::new_v4()))
    }

    /// The identifier as stored in the shared registry.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The worker prefix.
    pub fn worker_id(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(worker, _)| worker)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a frame could not be handed to a live connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendFault {
    /// The outbound queue is at capacity; the client is not keeping up.
    QueueFull,
}

/// Result of offering a frame to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for the writer task.
    Sent,
    /// The writer task is gone (socket closed or failed).
    Closed,
    /// The connection is alive but could not accept the frame.
    Fault(SendFault),
}

impl SendOutcome {
    /// Whether the frame was queued.
    pub fn is_sent(self) -> bool {
        matches!(self, Self::Sent)
    }
}

/// A connected WebSocket client as seen by the connection manager.
///
/// Frames are queued on a bounded channel drained by the session's writer
/// task, so sending never waits on the network.
pub struct ClientConnection {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
    closed: CancellationToken,
    connected_at: Instant,
}

impl ClientConnection {
    /// Create a connection around the sending half of its outbound queue.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id,
            tx,
            closed: CancellationToken::new(),
            connected_at: Instant::now(),
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a text frame without waiting.
    pub fn send(&self, frame: Arc<str>) -> SendOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => SendOutcome::Sent,
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
            Err(TrySendError::Full(_)) => SendOutcome::Fault(SendFault::QueueFull),
        }
    }

    /// Queue a text frame, waiting for room if the queue is full.
    ///
    /// Only `Sent` or `Closed` are returned.
    pub async fn send_wait(&self, frame: Arc<str>) -> SendOutcome {
        match self.tx.send(frame).await {
            Ok(()) => SendOutcome::Sent,
            Err(_) => SendOutcome::Closed,
        }
    }

    /// Ask the owning session to close the socket.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
