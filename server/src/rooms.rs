//! Room Membership Registry
//!
//! The grouping primitive everything above it builds on: a connection can
//! join or leave named rooms, and an event sent to a room reaches every
//! connection currently in it. Text channels, server presence, and voice
//! channels are all just rooms with different key namespaces.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chorus_common::ServerEvent;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// One live authenticated connection.
struct Connection {
    /// Owner of the connection.
    user_id: Uuid,
    /// Channel to the connection's socket writer task.
    tx: mpsc::Sender<ServerEvent>,
    /// Rooms this connection has joined.
    rooms: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    /// All live connections, indexed by connection id.
    connections: HashMap<Uuid, Connection>,
    /// Room name -> member connection ids.
    rooms: HashMap<String, HashSet<Uuid>>,
}

/// Registry of connections and their room memberships.
///
/// Single mutable owner of all membership state in the process. All mutation
/// passes through these operations; nothing reaches into the maps directly.
#[derive(Default)]
pub struct RoomRegistry {
    inner: RwLock<Inner>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a freshly authenticated connection.
    pub async fn register(&self, connection_id: Uuid, user_id: Uuid, tx: mpsc::Sender<ServerEvent>) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            connection_id,
            Connection {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        debug!(connection_id = %connection_id, user_id = %user_id, "Connection registered");
    }

    /// Remove a connection and every room membership it held.
    ///
    /// Returns the rooms the connection was in, so callers can run per-room
    /// cleanup (presence recompute) against the remaining members.
    pub async fn unregister(&self, connection_id: Uuid) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let Some(connection) = inner.connections.remove(&connection_id) else {
            return Vec::new();
        };

        let left_rooms: Vec<String> = connection.rooms.into_iter().collect();
        for room in &left_rooms {
            Self::remove_member(&mut inner.rooms, room, connection_id);
        }

        debug!(connection_id = %connection_id, rooms = left_rooms.len(), "Connection unregistered");
        left_rooms
    }

    /// Add a connection to a room. Idempotent.
    pub async fn join(&self, connection_id: Uuid, room: &str) {
        let mut inner = self.inner.write().await;
        let Some(connection) = inner.connections.get_mut(&connection_id) else {
            warn!(connection_id = %connection_id, room, "Room join for unknown connection");
            return;
        };
        connection.rooms.insert(room.to_string());
        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id);
    }

    /// Remove a connection from a room. Leaving a room the connection is not
    /// in is a no-op.
    pub async fn leave(&self, connection_id: Uuid, room: &str) {
        let mut inner = self.inner.write().await;
        if let Some(connection) = inner.connections.get_mut(&connection_id) {
            connection.rooms.remove(room);
        }
        Self::remove_member(&mut inner.rooms, room, connection_id);
    }

    /// Broadcast an event to every member of a room, optionally excluding one
    /// connection (typically the sender).
    ///
    /// Clones the sender handles before sending to avoid holding the lock
    /// during I/O. Within a room, delivery order per receiver matches send
    /// order: each connection drains a single FIFO queue.
    pub async fn broadcast(&self, room: &str, event: &ServerEvent, exclude: Option<Uuid>) {
        let senders: Vec<(Uuid, mpsc::Sender<ServerEvent>)> = {
            let inner = self.inner.read().await;
            let Some(members) = inner.rooms.get(room) else {
                return;
            };
            members
                .iter()
                .filter(|id| Some(**id) != exclude)
                .filter_map(|id| {
                    inner
                        .connections
                        .get(id)
                        .map(|connection| (*id, connection.tx.clone()))
                })
                .collect()
        };

        for (connection_id, tx) in senders {
            if let Err(e) = tx.send(event.clone()).await {
                warn!(connection_id = %connection_id, error = %e, "Failed to deliver room event");
            }
        }
    }

    /// Deliver an event to one connection. Returns false when the connection
    /// is gone or its queue is closed. The message is simply lost; there is
    /// no buffering at this layer.
    pub async fn send_to(&self, connection_id: Uuid, event: ServerEvent) -> bool {
        let tx = {
            let inner = self.inner.read().await;
            inner
                .connections
                .get(&connection_id)
                .map(|connection| connection.tx.clone())
        };

        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Owner of a connection, if it is still registered.
    pub async fn connection_user(&self, connection_id: Uuid) -> Option<Uuid> {
        let inner = self.inner.read().await;
        inner.connections.get(&connection_id).map(|c| c.user_id)
    }

    /// Deduplicated user ids of a room's current members, sorted for
    /// deterministic output.
    pub async fn room_user_ids(&self, room: &str) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(room) else {
            return Vec::new();
        };

        let mut user_ids: Vec<Uuid> = members
            .iter()
            .filter_map(|id| inner.connections.get(id).map(|c| c.user_id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        user_ids.sort_unstable();
        user_ids
    }

    /// Member count of a room.
    pub async fn member_count(&self, room: &str) -> usize {
        let inner = self.inner.read().await;
        inner.rooms.get(room).map_or(0, HashSet::len)
    }

    fn remove_member(rooms: &mut HashMap<String, HashSet<Uuid>>, room: &str, connection_id: Uuid) {
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&connection_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }
}
