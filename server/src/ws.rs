//! WebSocket Gateway
//!
//! One socket per authenticated client. The token is validated before the
//! upgrade completes; a connection that fails authentication never sees a
//! gateway event. After that, a single read loop dispatches client events to
//! the registries and a writer task drains the connection's outbound queue.

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use chorus_common::{rooms, ClientEvent, ServerEvent};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth;
use crate::presence;
use crate::voice::{self, VoiceError};

/// WebSocket connection query params.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Session token for authentication
    pub token: String,
}

/// Errors surfaced to the client as `Error` events.
#[derive(Debug, Error)]
enum GatewayError {
    #[error("Malformed event: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Voice(#[from] VoiceError),
}

impl GatewayError {
    const fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "bad_event",
            Self::Voice(e) => e.code(),
        }
    }
}

/// WebSocket upgrade handler.
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    // Validate token before upgrade
    let user_id = match auth::authenticate(&query.token, &state.config.jwt_secret) {
        Ok(user_id) => user_id,
        Err(_) => {
            return Response::builder()
                .status(401)
                .body("Invalid token".into())
                .unwrap();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// Handle an authenticated WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending events to the WebSocket
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(100);

    let connection_id = Uuid::now_v7();
    state.rooms.register(connection_id, user_id, tx.clone()).await;

    info!(user_id = %user_id, connection_id = %connection_id, "WebSocket connected");

    // Send ready event
    let _ = tx
        .send(ServerEvent::Ready {
            user_id,
            connection_id,
        })
        .await;

    // Spawn task to forward events to the WebSocket
    let sender_handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let msg = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };

            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = dispatch(text.as_str(), user_id, connection_id, &state, &tx).await {
                    warn!(user_id = %user_id, error = %e, "Error handling message");
                    let _ = tx
                        .send(ServerEvent::Error {
                            code: e.code().to_string(),
                            message: e.to_string(),
                        })
                        .await;
                }
            }
            Ok(Message::Ping(_)) => {
                // Axum replies with pong automatically
                debug!(user_id = %user_id, "Received ping");
            }
            Ok(Message::Close(_)) => {
                info!(user_id = %user_id, "WebSocket closed");
                break;
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    // Cleanup. Voice first, so leave notifications still reach the channel's
    // remaining members; then drop all memberships; then re-announce presence
    // to the rooms that lost this connection.
    state.voice.disconnect(connection_id).await;
    let left_rooms = state.rooms.unregister(connection_id).await;
    presence::handle_disconnect(&state.rooms, &left_rooms).await;

    sender_handle.abort();

    info!(user_id = %user_id, connection_id = %connection_id, "WebSocket disconnected");
}

/// Decode and route one client event.
async fn dispatch(
    text: &str,
    user_id: Uuid,
    connection_id: Uuid,
    state: &AppState,
    tx: &mpsc::Sender<ServerEvent>,
) -> Result<(), GatewayError> {
    let event: ClientEvent = serde_json::from_str(text)?;

    match event {
        ClientEvent::Ping => {
            let _ = tx.send(ServerEvent::Pong).await;
        }

        ClientEvent::JoinChannel { channel_id } => {
            state
                .rooms
                .join(connection_id, &rooms::channel(channel_id))
                .await;
            debug!(user_id = %user_id, channel_id = %channel_id, "Subscribed to channel");
        }

        ClientEvent::SendMessage {
            channel_id,
            message,
        } => {
            // Pure fan-out; the record store persists messages out of band.
            state
                .rooms
                .broadcast(
                    &rooms::channel(channel_id),
                    &ServerEvent::MessageNew {
                        channel_id,
                        user_id,
                        message,
                    },
                    None,
                )
                .await;
        }

        ClientEvent::Typing {
            channel_id,
            display_name,
        } => {
            presence::typing(&state.rooms, connection_id, channel_id, user_id, display_name)
                .await;
        }

        ClientEvent::JoinServer { server_id } => {
            presence::join_server(&state.rooms, connection_id, server_id).await;
        }

        voice_event @ (ClientEvent::JoinVoice { .. }
        | ClientEvent::LeaveVoice { .. }
        | ClientEvent::VoiceStateUpdate { .. }
        | ClientEvent::GetVoiceParticipants { .. }
        | ClientEvent::Signal { .. }) => {
            voice::handlers::handle_voice_event(
                &state.voice,
                &state.relay,
                user_id,
                connection_id,
                voice_event,
                tx,
            )
            .await?;
        }
    }

    Ok(())
}
