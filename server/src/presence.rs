//! Presence and Typing Broadcast
//!
//! Thin fan-out of ephemeral events layered on the room registry. Nothing
//! here is persisted: the online set is recomputed from live room membership
//! on every change, and typing indicators expire client-side (3 seconds, no
//! stop event).

use std::sync::Arc;

use chorus_common::{rooms, ServerEvent};
use tracing::debug;
use uuid::Uuid;

use crate::rooms::RoomRegistry;

/// Subscribe a connection to a server's presence room and announce the
/// resulting online set to everyone in it, the joiner included.
pub async fn join_server(registry: &Arc<RoomRegistry>, connection_id: Uuid, server_id: Uuid) {
    let room = rooms::server(server_id);
    registry.join(connection_id, &room).await;
    broadcast_online_set(registry, server_id).await;
}

/// Recompute a server's online set from current room membership and
/// broadcast it.
pub async fn broadcast_online_set(registry: &Arc<RoomRegistry>, server_id: Uuid) {
    let room = rooms::server(server_id);
    let online_user_ids = registry.room_user_ids(&room).await;
    debug!(server_id = %server_id, online = online_user_ids.len(), "Presence update");
    registry
        .broadcast(
            &room,
            &ServerEvent::Presence {
                server_id,
                online_user_ids,
            },
            None,
        )
        .await;
}

/// Re-announce presence for every presence room a dropped connection was in.
pub async fn handle_disconnect(registry: &Arc<RoomRegistry>, left_rooms: &[String]) {
    for room in left_rooms {
        if let Some(server_id) = rooms::parse_server(room) {
            broadcast_online_set(registry, server_id).await;
        }
    }
}

/// Fan a typing indicator out to a text channel's room, sender excluded.
pub async fn typing(
    registry: &Arc<RoomRegistry>,
    connection_id: Uuid,
    channel_id: Uuid,
    user_id: Uuid,
    display_name: String,
) {
    registry
        .broadcast(
            &rooms::channel(channel_id),
            &ServerEvent::Typing {
                channel_id,
                user_id,
                display_name,
            },
            Some(connection_id),
        )
        .await;
}
