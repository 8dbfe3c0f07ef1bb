//! API Router and Application State
//!
//! Central routing configuration and shared state.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Config;
use crate::rooms::RoomRegistry;
use crate::voice::{SignalRelay, VoiceRegistry};
use crate::ws;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Room membership registry
    pub rooms: Arc<RoomRegistry>,
    /// Voice channel participant registry
    pub voice: Arc<VoiceRegistry>,
    /// Signaling relay
    pub relay: Arc<SignalRelay>,
}

impl AppState {
    /// Create new application state.
    ///
    /// The registries are the only mutable shared state in the process;
    /// they are owned here and injected into the gateway, never ambient.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let rooms = RoomRegistry::new();
        let voice = VoiceRegistry::new(rooms.clone(), config.voice_channel_capacity);
        let relay = SignalRelay::new(rooms.clone(), voice.clone());
        Self {
            config: Arc::new(config),
            rooms,
            voice,
            relay,
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // ICE configuration for clients
        .route("/api/voice/ice-servers", get(get_ice_servers))
        // Realtime gateway
        .route("/ws", get(ws::handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// ICE server configuration.
#[derive(Debug, Serialize)]
pub struct IceServer {
    /// Server URLs (e.g., "stun:stun.l.google.com:19302")
    pub urls: Vec<String>,
    /// Username for TURN servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Credential for TURN servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Response containing ICE server configuration.
#[derive(Debug, Serialize)]
pub struct IceServersResponse {
    /// List of ICE servers to use for WebRTC.
    pub ice_servers: Vec<IceServer>,
}

/// Get ICE server configuration.
///
/// GET /api/voice/ice-servers
///
/// Returns STUN and TURN server configuration for WebRTC connections.
/// Clients should use these servers for NAT traversal.
async fn get_ice_servers(State(state): State<AppState>) -> Json<IceServersResponse> {
    let mut servers = vec![IceServer {
        urls: state.config.stun_servers.clone(),
        username: None,
        credential: None,
    }];

    // Add TURN server if configured
    if let Some(turn) = &state.config.turn_server {
        servers.push(IceServer {
            urls: vec![turn.clone()],
            username: state.config.turn_username.clone(),
            credential: state.config.turn_credential.clone(),
        });
    }

    Json(IceServersResponse {
        ice_servers: servers,
    })
}
