//! Room Name Keys
//!
//! Rooms are named groups of connections that receive broadcasts together.
//! Each room class gets its own key namespace so ids never collide across
//! classes.

use uuid::Uuid;

/// Room for a text channel's events (messages, typing).
#[must_use]
pub fn channel(channel_id: Uuid) -> String {
    format!("channel:{channel_id}")
}

/// Presence room for a server: everyone online in that server.
#[must_use]
pub fn server(server_id: Uuid) -> String {
    format!("server:{server_id}")
}

/// Room for a voice channel's participants.
#[must_use]
pub fn voice(channel_id: Uuid) -> String {
    format!("voice:{channel_id}")
}

/// Extract the server id back out of a presence room key.
#[must_use]
pub fn parse_server(room: &str) -> Option<Uuid> {
    room.strip_prefix("server:")
        .and_then(|id| Uuid::parse_str(id).ok())
}
