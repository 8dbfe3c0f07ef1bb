//! Gateway Socket Session
//!
//! Manages the real-time connection to the server with automatic
//! reconnection. Outbound events go through an mpsc queue; inbound events
//! fan out on a broadcast channel so the chat UI and the voice session can
//! subscribe independently.

use std::sync::Arc;
use std::time::Duration;

use chorus_common::{ClientEvent, ServerEvent};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Capacity of the inbound broadcast buffer. Slow subscribers lag rather
/// than stall the socket.
const EVENT_BUFFER: usize = 256;

/// Connection status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Handle to a running socket session.
pub struct SocketHandle {
    /// Queue of events to send to the server.
    tx: mpsc::Sender<ClientEvent>,
    /// Fan-out of events received from the server.
    events: broadcast::Sender<ServerEvent>,
    /// Connection status.
    status: Arc<RwLock<ConnectionStatus>>,
    /// Handle for shutdown.
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl SocketHandle {
    /// Connect to the gateway and keep the connection alive.
    #[must_use]
    pub fn connect(server_url: String, token: String) -> Self {
        let (event_tx, event_rx) = mpsc::channel::<ClientEvent>(100);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let status = Arc::new(RwLock::new(ConnectionStatus::Connecting));

        let status_clone = status.clone();
        let events_clone = events.clone();
        tokio::spawn(async move {
            connection_loop(
                server_url,
                token,
                event_rx,
                shutdown_rx,
                events_clone,
                status_clone,
            )
            .await;
        });

        Self {
            tx: event_tx,
            events,
            status,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Send an event to the server.
    pub async fn send(&self, event: ClientEvent) -> Result<(), SocketClosed> {
        self.tx.send(event).await.map_err(|_| SocketClosed)
    }

    /// Subscribe to events received from the server.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Clone of the outbound queue, for components that send on their own
    /// (the mesh manager uploads candidates as the transport produces them).
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<ClientEvent> {
        self.tx.clone()
    }

    /// Get the current connection status.
    pub async fn status(&self) -> ConnectionStatus {
        self.status.read().await.clone()
    }

    /// Disconnect from the server.
    pub async fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

/// The socket session has shut down; the event was not sent.
#[derive(Debug, thiserror::Error)]
#[error("gateway socket is closed")]
pub struct SocketClosed;

/// Main connection loop with reconnection logic.
async fn connection_loop(
    server_url: String,
    token: String,
    mut event_rx: mpsc::Receiver<ClientEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
    events: broadcast::Sender<ServerEvent>,
    status: Arc<RwLock<ConnectionStatus>>,
) {
    let mut attempt = 0u32;
    let max_backoff = Duration::from_secs(30);

    loop {
        // Check for shutdown
        if shutdown_rx.try_recv().is_ok() {
            info!("Socket shutdown requested");
            *status.write().await = ConnectionStatus::Disconnected;
            return;
        }

        let ws_url = build_ws_url(&server_url, &token);
        info!(
            "Connecting to gateway: {}",
            ws_url.split('?').next().unwrap_or(&ws_url)
        );

        if attempt > 0 {
            *status.write().await = ConnectionStatus::Reconnecting { attempt };
        } else {
            *status.write().await = ConnectionStatus::Connecting;
        }

        match connect_async(&ws_url).await {
            Ok((ws_stream, _)) => {
                info!("Gateway connected");
                attempt = 0;
                *status.write().await = ConnectionStatus::Connected;

                let (mut write, mut read) = ws_stream.split();

                loop {
                    tokio::select! {
                        // Handle incoming messages
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    match serde_json::from_str::<ServerEvent>(text.as_str()) {
                                        Ok(event) => {
                                            debug!("Received: {:?}", event);
                                            let _ = events.send(event);
                                        }
                                        Err(e) => {
                                            warn!("Failed to parse server message: {} - {}", e, text);
                                        }
                                    }
                                }
                                Some(Ok(Message::Ping(data))) => {
                                    if let Err(e) = write.send(Message::Pong(data)).await {
                                        warn!("Failed to send pong: {}", e);
                                    }
                                }
                                Some(Ok(Message::Close(_))) => {
                                    info!("Server closed connection");
                                    break;
                                }
                                Some(Err(e)) => {
                                    error!("Socket error: {}", e);
                                    break;
                                }
                                None => {
                                    info!("Socket stream ended");
                                    break;
                                }
                                _ => {} // Ignore other message types
                            }
                        }

                        // Handle outgoing events
                        event = event_rx.recv() => {
                            if let Some(ev) = event {
                                if let Ok(json) = serde_json::to_string(&ev) {
                                    debug!("Sending: {}", json);
                                    if let Err(e) = write.send(Message::Text(json.into())).await {
                                        error!("Failed to send message: {}", e);
                                        break;
                                    }
                                }
                            } else {
                                info!("Event channel closed");
                                break;
                            }
                        }

                        // Handle shutdown
                        _ = shutdown_rx.recv() => {
                            info!("Shutdown received during connection");
                            let _ = write.send(Message::Close(None)).await;
                            *status.write().await = ConnectionStatus::Disconnected;
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Failed to connect: {}", e);
            }
        }

        // Connection lost or failed - attempt reconnection
        *status.write().await = ConnectionStatus::Disconnected;

        attempt += 1;
        let backoff = std::cmp::min(Duration::from_secs(2u64.pow(attempt.min(5))), max_backoff);
        info!("Reconnecting in {:?} (attempt {})", backoff, attempt);

        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.recv() => {
                info!("Shutdown during reconnect backoff");
                return;
            }
        }
    }
}

/// Build the gateway URL with the authentication token.
fn build_ws_url(server_url: &str, token: &str) -> String {
    let base = server_url
        .replace("http://", "ws://")
        .replace("https://", "wss://");
    format!("{}/ws?token={}", base.trim_end_matches('/'), token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_swaps_scheme_and_appends_token() {
        assert_eq!(
            build_ws_url("https://chat.example.org/", "abc"),
            "wss://chat.example.org/ws?token=abc"
        );
        assert_eq!(
            build_ws_url("http://localhost:8080", "t"),
            "ws://localhost:8080/ws?token=t"
        );
    }
}
