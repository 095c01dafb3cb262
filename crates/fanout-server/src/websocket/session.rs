//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, SendOutcome};
use crate::manager::ConnectionManager;

/// Prefix added to every echoed frame.
pub const ECHO_PREFIX: &str = "echo: ";

/// How long the writer gets to flush a close frame after deregistration.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection (closes with 1011 if the shared store fails)
/// 2. Forwards queued frames (echoes and broadcasts) via a writer task
/// 3. Echoes each text frame, and each UTF-8 binary frame, as `echo: <text>`,
///    waiting for room in the outbound queue
/// 4. Ends on close frame, stream end, transport fault, or eviction
/// 5. Always deregisters on exit
#[instrument(skip_all)]
pub async fn run_ws_session(mut ws: WebSocket, manager: Arc<ConnectionManager>) {
    let (connection, outbound_rx) = match manager.connect().await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "connection registration failed, closing socket");
            let _ = ws
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: Utf8Bytes::from_static("connection registry unavailable"),
                })))
                .await;
            return;
        }
    };
    let client_id = connection.id().clone();

    let (ws_tx, mut ws_rx) = ws.split();
    let mut writer = tokio::spawn(write_outbound(ws_tx, outbound_rx, connection.clone()));
    let mut writer_done = false;

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            _ = &mut writer => {
                writer_done = true;
                debug!(%client_id, "writer finished, ending session");
                break;
            }
        };

        let text = match msg {
            Some(Ok(Message::Text(t))) => t.as_str().to_owned(),
            Some(Ok(Message::Binary(data))) => {
                if let Ok(s) = std::str::from_utf8(&data) {
                    s.to_owned()
                } else {
                    info!(%client_id, len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            }
            Some(Ok(Message::Close(_))) => {
                info!(%client_id, "client sent close frame");
                break;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Err(e)) => {
                debug!(%client_id, error = %e, "transport fault");
                break;
            }
            None => break,
        };

        // echoes wait for queue room instead of dropping
        let echo: Arc<str> = Arc::from(format!("{ECHO_PREFIX}{text}"));
        let outcome = tokio::select! {
            outcome = connection.send_wait(echo) => outcome,
            () = connection.closed() => SendOutcome::Closed,
        };
        if !outcome.is_sent() {
            debug!(%client_id, ?outcome, "echo not queued, ending session");
            break;
        }
    }

    if let Err(e) = manager.disconnect(&client_id).await {
        warn!(%client_id, error = %e, "failed to remove connection from shared store");
    }
    if !writer_done && tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(%client_id, age_secs = connection.age().as_secs(), "session ended");
}

/// Drain the outbound queue into the socket until it closes, the write
/// fails, or the connection is deregistered.
async fn write_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Arc<str>>,
    connection: Arc<ClientConnection>,
) {
    loop {
        tokio::select! {
            biased;
            () = connection.closed() => {
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: Utf8Bytes::from_static("connection deregistered"),
                    })))
                    .await;
                break;
            }
            frame = outbound_rx.recv() => {
                let Some(text) = frame else { break };
                if ws_tx.send(Message::Text(Utf8Bytes::from(text.to_string()))).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_prefix_matches_wire_format() {
        assert_eq!(format!("{ECHO_PREFIX}{}", "hi"), "echo: hi");
    }
}
