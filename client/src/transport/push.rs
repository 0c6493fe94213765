//! WebSocket invalidation feed.
//!
//! Connects to the server's push endpoint, turns product messages into
//! [`InvalidationEvent`]s and keeps reconnecting with capped exponential
//! backoff until the receiving side goes away. Every reconnect after the
//! first emits a resync event, since messages may have been missed.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{ClientMessage, InvalidationEvent, InvalidationSender, PushMessage, TransportError};

/// Base delay between reconnection attempts.
const RECONNECT_BASE_DELAY_MS: u64 = 500;

/// Maximum delay between reconnection attempts.
const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// Handle to a running feed task.
#[derive(Debug)]
pub struct PushFeed {
    task: JoinHandle<()>,
}

impl PushFeed {
    /// Spawn the connection loop.
    pub fn spawn(ws_url: String, handler: InvalidationSender) -> Self {
        let task = tokio::spawn(connection_loop(ws_url, handler));
        Self { task }
    }

    /// Stop the feed.
    pub fn stop(self) {
        self.task.abort();
    }
}

async fn connection_loop(ws_url: String, handler: InvalidationSender) {
    let mut attempts = 0u32;
    let mut connected_before = false;

    while !handler.is_closed() {
        let mut connected = false;
        let result = run_connection(&ws_url, &handler, connected_before, &mut connected).await;
        if connected {
            // Any session that got past the handshake resets the backoff.
            connected_before = true;
            attempts = 0;
        } else {
            attempts += 1;
        }

        match result {
            Ok(()) => tracing::info!(url = %ws_url, "Push feed closed by server"),
            Err(e) => tracing::warn!(url = %ws_url, attempts, "Push feed error: {}", e),
        }

        if handler.is_closed() {
            break;
        }
        tokio::time::sleep(backoff_delay(attempts)).await;
    }

    tracing::debug!(url = %ws_url, "Push feed stopped");
}

/// Capped exponential backoff.
fn backoff_delay(attempts: u32) -> Duration {
    let delay = RECONNECT_BASE_DELAY_MS.saturating_mul(1 << attempts.min(6));
    Duration::from_millis(delay.min(MAX_RECONNECT_DELAY_MS))
}

async fn run_connection(
    ws_url: &str,
    handler: &InvalidationSender,
    resync: bool,
    connected: &mut bool,
) -> Result<(), TransportError> {
    let (ws_stream, _) = connect_async(ws_url)
        .await
        .map_err(|e| TransportError::Push(e.to_string()))?;
    *connected = true;

    tracing::info!(url = %ws_url, "Push feed connected");
    if resync && handler.send(InvalidationEvent::resync()).is_err() {
        return Ok(());
    }

    let (mut write, mut read) = ws_stream.split();

    while let Some(result) = read.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let message: PushMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("Invalid push message: {}", e);
                        continue;
                    }
                };

                match &message {
                    PushMessage::Ping => {
                        let pong = serde_json::to_string(&ClientMessage::Pong)
                            .map_err(|e| TransportError::Push(e.to_string()))?;
                        write
                            .send(Message::Text(pong.into()))
                            .await
                            .map_err(|e| TransportError::Push(e.to_string()))?;
                    }
                    PushMessage::Error { message } => {
                        tracing::warn!("Push feed reported error: {}", message);
                    }
                    _ => {}
                }

                if let Some(event) = message.invalidation() {
                    tracing::debug!(
                        kind = ?event.kind,
                        product_id = ?event.product_id,
                        "Invalidation received"
                    );
                    if handler.send(event).is_err() {
                        return Ok(());
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => return Err(TransportError::Push(e.to_string())),
        }
    }

    Ok(())
}
