//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use std::env;

/// Default maximum participants per voice channel.
const DEFAULT_VOICE_CHANNEL_CAPACITY: usize = 25;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// JWT signing secret used to verify session tokens
    pub jwt_secret: String,

    /// WebRTC STUN servers handed to clients
    pub stun_servers: Vec<String>,

    /// WebRTC TURN server (optional)
    pub turn_server: Option<String>,

    /// WebRTC TURN username (optional)
    pub turn_username: Option<String>,

    /// WebRTC TURN credential (optional)
    pub turn_credential: Option<String>,

    /// Maximum participants per voice channel (default: 25)
    pub voice_channel_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            stun_servers: env::var("STUN_SERVERS")
                .unwrap_or_else(|_| "stun:stun.l.google.com:19302".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            turn_server: env::var("TURN_SERVER").ok(),
            turn_username: env::var("TURN_USERNAME").ok(),
            turn_credential: env::var("TURN_CREDENTIAL").ok(),
            voice_channel_capacity: env::var("VOICE_CHANNEL_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_VOICE_CHANNEL_CAPACITY),
        })
    }

    /// Check if TURN is configured.
    #[must_use]
    pub const fn has_turn(&self) -> bool {
        self.turn_server.is_some()
    }

    /// Create a default configuration for testing.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            jwt_secret: "test-secret".into(),
            stun_servers: vec!["stun:stun.l.google.com:19302".into()],
            turn_server: None,
            turn_username: None,
            turn_credential: None,
            voice_channel_capacity: DEFAULT_VOICE_CHANNEL_CAPACITY,
        }
    }
}
