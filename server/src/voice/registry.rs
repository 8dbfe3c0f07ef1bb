//! Voice Channel Participant Registry
//!
//! In-memory, single-process source of truth for who is in which voice
//! channel. Channel state is created lazily on first join and deleted the
//! moment the last participant leaves: a channel id maps to a state only
//! while non-empty. A user is a participant of at most one channel across
//! the whole registry: joining a second channel implicitly leaves the first.
//!
//! All mutation passes through the operations here; broadcasts go out through
//! the room registry after the write lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use chorus_common::{rooms, Participant, ServerEvent, VoiceStateFlags, VoiceStatePatch};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::error::VoiceError;
use crate::rooms::RoomRegistry;

/// Participants of one live voice channel.
#[derive(Default)]
struct ChannelState {
    participants: HashMap<Uuid, Participant>,
}

#[derive(Default)]
struct VoiceInner {
    /// Only non-empty channels have an entry.
    channels: HashMap<Uuid, ChannelState>,
    /// Reverse index: user id -> the one channel they are in.
    member_of: HashMap<Uuid, Uuid>,
}

/// Everything needed to finish a removal once the lock is released.
struct Removal {
    channel_id: Uuid,
    participant: Participant,
    remaining: Vec<Participant>,
}

/// Registry of voice channel participants.
pub struct VoiceRegistry {
    rooms: Arc<RoomRegistry>,
    inner: RwLock<VoiceInner>,
    /// Maximum participants per channel.
    capacity: usize,
}

impl VoiceRegistry {
    /// Create a new registry backed by the given room registry.
    #[must_use]
    pub fn new(rooms: Arc<RoomRegistry>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            rooms,
            inner: RwLock::new(VoiceInner::default()),
            capacity,
        })
    }

    /// Join a voice channel.
    ///
    /// If the user is already in a different channel, that channel is left
    /// first (with the usual leave broadcasts to its remaining members).
    /// Returns the snapshot of the *other* participants as they were before
    /// this join; the caller negotiates toward exactly these.
    pub async fn join(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        connection_id: Uuid,
        display_name: String,
        avatar_url: Option<String>,
    ) -> Result<Vec<Participant>, VoiceError> {
        let participant = Participant {
            user_id,
            connection_id,
            display_name,
            avatar_url,
            flags: VoiceStateFlags::default(),
        };

        let (previous, existing) = {
            let mut inner = self.inner.write().await;

            // Capacity is checked against the target channel, not counting a
            // stale entry for this same user about to be replaced.
            let occupied = inner.channels.get(&channel_id).map_or(0, |state| {
                state.participants.len() - usize::from(state.participants.contains_key(&user_id))
            });
            if occupied >= self.capacity {
                return Err(VoiceError::ChannelFull {
                    max_participants: self.capacity,
                });
            }

            let old_channel = inner.member_of.get(&user_id).copied();
            let previous = old_channel
                .and_then(|old_channel| Self::remove_locked(&mut inner, old_channel, user_id));

            let existing: Vec<Participant> = inner
                .channels
                .get(&channel_id)
                .map(|state| Self::snapshot(state))
                .unwrap_or_default();

            inner
                .channels
                .entry(channel_id)
                .or_default()
                .participants
                .insert(user_id, participant.clone());
            inner.member_of.insert(user_id, channel_id);

            (previous, existing)
        };

        if let Some(removal) = previous {
            self.finish_removal(removal).await;
        }

        self.rooms
            .join(connection_id, &rooms::voice(channel_id))
            .await;
        self.rooms
            .broadcast(
                &rooms::voice(channel_id),
                &ServerEvent::VoiceParticipantJoined {
                    channel_id,
                    participant,
                },
                Some(connection_id),
            )
            .await;

        info!(user_id = %user_id, channel_id = %channel_id, "User joined voice channel");
        Ok(existing)
    }

    /// Leave a voice channel.
    ///
    /// Leaving a channel the user is not in produces no error and no
    /// broadcast, since disconnect races must never throw.
    pub async fn leave(&self, channel_id: Uuid, user_id: Uuid) {
        let removal = {
            let mut inner = self.inner.write().await;
            Self::remove_locked(&mut inner, channel_id, user_id)
        };

        if let Some(removal) = removal {
            info!(user_id = %user_id, channel_id = %channel_id, "User left voice channel");
            self.finish_removal(removal).await;
        }
    }

    /// Merge a partial flag update into a participant and broadcast the new
    /// full flag set to the whole room, sender included.
    ///
    /// Returns the merged flags, or `None` when the channel or participant
    /// does not exist (deliberately a no-op).
    pub async fn update_state(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        patch: VoiceStatePatch,
    ) -> Option<VoiceStateFlags> {
        let flags = {
            let mut inner = self.inner.write().await;
            let participant = inner
                .channels
                .get_mut(&channel_id)?
                .participants
                .get_mut(&user_id)?;
            participant.flags = patch.apply(participant.flags);
            participant.flags
        };

        self.rooms
            .broadcast(
                &rooms::voice(channel_id),
                &ServerEvent::VoiceStateChanged {
                    channel_id,
                    user_id,
                    flags,
                },
                None,
            )
            .await;

        Some(flags)
    }

    /// Clean up after a hard disconnect: remove whatever participation this
    /// connection owned, exactly as an explicit leave would.
    ///
    /// A participation the same user re-established under a newer connection
    /// is left untouched (reconnect race).
    pub async fn disconnect(&self, connection_id: Uuid) {
        let removal = {
            let mut inner = self.inner.write().await;
            let owned = inner.channels.iter().find_map(|(channel_id, state)| {
                state
                    .participants
                    .values()
                    .find(|p| p.connection_id == connection_id)
                    .map(|p| (*channel_id, p.user_id))
            });

            owned.and_then(|(channel_id, user_id)| {
                Self::remove_locked(&mut inner, channel_id, user_id)
            })
        };

        if let Some(removal) = removal {
            debug!(
                connection_id = %connection_id,
                channel_id = %removal.channel_id,
                "Disconnect cleanup removed voice participant"
            );
            self.finish_removal(removal).await;
        }
    }

    /// Read-only participant snapshot, sorted by user id. Empty when the
    /// channel has no state.
    pub async fn participants(&self, channel_id: Uuid) -> Vec<Participant> {
        let inner = self.inner.read().await;
        inner
            .channels
            .get(&channel_id)
            .map(|state| Self::snapshot(state))
            .unwrap_or_default()
    }

    /// Look up one participant of a channel.
    pub async fn participant(&self, channel_id: Uuid, user_id: Uuid) -> Option<Participant> {
        let inner = self.inner.read().await;
        inner
            .channels
            .get(&channel_id)?
            .participants
            .get(&user_id)
            .cloned()
    }

    /// The channel a user is currently in, if any.
    pub async fn channel_of(&self, user_id: Uuid) -> Option<Uuid> {
        let inner = self.inner.read().await;
        inner.member_of.get(&user_id).copied()
    }

    /// Number of channels with live state.
    pub async fn channel_count(&self) -> usize {
        self.inner.read().await.channels.len()
    }

    fn snapshot(state: &ChannelState) -> Vec<Participant> {
        let mut participants: Vec<Participant> = state.participants.values().cloned().collect();
        participants.sort_by_key(|p| p.user_id);
        participants
    }

    /// Remove a participant under the write lock, deleting the channel state
    /// if it became empty. Returns what is needed to broadcast afterwards.
    fn remove_locked(inner: &mut VoiceInner, channel_id: Uuid, user_id: Uuid) -> Option<Removal> {
        let state = inner.channels.get_mut(&channel_id)?;
        let participant = state.participants.remove(&user_id)?;
        inner.member_of.remove(&user_id);

        let remaining = if state.participants.is_empty() {
            inner.channels.remove(&channel_id);
            debug!(channel_id = %channel_id, "Removed empty voice channel state");
            Vec::new()
        } else {
            Self::snapshot(state)
        };

        Some(Removal {
            channel_id,
            participant,
            remaining,
        })
    }

    /// Room bookkeeping and broadcasts for a completed removal. The leaver is
    /// out of the room before the notifications go out, so only remaining
    /// members receive them.
    async fn finish_removal(&self, removal: Removal) {
        let room = rooms::voice(removal.channel_id);
        self.rooms
            .leave(removal.participant.connection_id, &room)
            .await;
        self.rooms
            .broadcast(
                &room,
                &ServerEvent::VoiceParticipantLeft {
                    channel_id: removal.channel_id,
                    user_id: removal.participant.user_id,
                },
                None,
            )
            .await;
        self.rooms
            .broadcast(
                &room,
                &ServerEvent::VoiceParticipants {
                    channel_id: removal.channel_id,
                    participants: removal.remaining,
                },
                None,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct TestClient {
        user_id: Uuid,
        connection_id: Uuid,
        rx: mpsc::Receiver<ServerEvent>,
    }

    impl TestClient {
        fn drain(&mut self) -> Vec<ServerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }
    }

    async fn setup() -> (Arc<RoomRegistry>, Arc<VoiceRegistry>) {
        let rooms = RoomRegistry::new();
        let voice = VoiceRegistry::new(rooms.clone(), 25);
        (rooms, voice)
    }

    async fn connect(rooms: &RoomRegistry) -> TestClient {
        let (tx, rx) = mpsc::channel(64);
        let user_id = Uuid::new_v4();
        let connection_id = Uuid::now_v7();
        rooms.register(connection_id, user_id, tx).await;
        TestClient {
            user_id,
            connection_id,
            rx,
        }
    }

    async fn join(voice: &VoiceRegistry, channel_id: Uuid, client: &TestClient) -> Vec<Participant> {
        voice
            .join(
                channel_id,
                client.user_id,
                client.connection_id,
                "tester".to_string(),
                None,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_join_returns_empty_snapshot() {
        let (rooms, voice) = setup().await;
        let client = connect(&rooms).await;
        let channel = Uuid::new_v4();

        let existing = join(&voice, channel, &client).await;
        assert!(existing.is_empty());
        assert_eq!(voice.participants(channel).await.len(), 1);
    }

    #[tokio::test]
    async fn second_join_sees_first_and_first_is_notified() {
        let (rooms, voice) = setup().await;
        let mut a = connect(&rooms).await;
        let b = connect(&rooms).await;
        let channel = Uuid::new_v4();

        join(&voice, channel, &a).await;
        a.drain();
        let existing = join(&voice, channel, &b).await;

        assert_eq!(existing.len(), 1);
        assert_eq!(existing[0].user_id, a.user_id);
        assert!(!existing[0].flags.muted);

        let events = a.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::VoiceParticipantJoined { participant, .. } if participant.user_id == b.user_id
        )));
    }

    #[tokio::test]
    async fn user_is_in_at_most_one_channel() {
        let (rooms, voice) = setup().await;
        let mut a = connect(&rooms).await;
        let b = connect(&rooms).await;
        let channel_1 = Uuid::new_v4();
        let channel_2 = Uuid::new_v4();

        join(&voice, channel_1, &a).await;
        join(&voice, channel_1, &b).await;
        a.drain();

        // B hops to channel_2: implicit leave of channel_1 first.
        join(&voice, channel_2, &b).await;

        assert_eq!(voice.channel_of(b.user_id).await, Some(channel_2));
        assert_eq!(voice.participants(channel_1).await.len(), 1);
        assert_eq!(voice.participants(channel_2).await.len(), 1);

        let events = a.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::VoiceParticipantLeft { user_id, .. } if *user_id == b.user_id
        )));
    }

    #[tokio::test]
    async fn empty_channel_state_is_deleted() {
        let (rooms, voice) = setup().await;
        let a = connect(&rooms).await;
        let channel = Uuid::new_v4();

        join(&voice, channel, &a).await;
        assert_eq!(voice.channel_count().await, 1);

        voice.leave(channel, a.user_id).await;
        assert_eq!(voice.channel_count().await, 0);
        assert!(voice.participants(channel).await.is_empty());
        assert_eq!(voice.channel_of(a.user_id).await, None);
    }

    #[tokio::test]
    async fn leave_when_not_registered_is_noop() {
        let (rooms, voice) = setup().await;
        let mut a = connect(&rooms).await;
        let channel = Uuid::new_v4();

        join(&voice, channel, &a).await;
        a.drain();

        // Unknown channel and unknown user: nothing happens, nothing thrown.
        voice.leave(Uuid::new_v4(), a.user_id).await;
        voice.leave(channel, Uuid::new_v4()).await;

        assert!(a.drain().is_empty());
        assert_eq!(voice.participants(channel).await.len(), 1);
    }

    #[tokio::test]
    async fn update_state_merges_and_broadcasts_to_sender_too() {
        let (rooms, voice) = setup().await;
        let mut a = connect(&rooms).await;
        let channel = Uuid::new_v4();

        join(&voice, channel, &a).await;
        a.drain();

        let patch = VoiceStatePatch {
            muted: Some(true),
            ..Default::default()
        };
        let flags = voice.update_state(channel, a.user_id, patch).await.unwrap();
        assert!(flags.muted);
        assert!(!flags.deafened);

        let events = a.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::VoiceStateChanged { user_id, flags, .. }
                if *user_id == a.user_id && flags.muted
        )));
    }

    #[tokio::test]
    async fn update_state_on_missing_channel_is_noop() {
        let (_rooms, voice) = setup().await;
        let patch = VoiceStatePatch {
            muted: Some(true),
            ..Default::default()
        };
        assert!(voice
            .update_state(Uuid::new_v4(), Uuid::new_v4(), patch)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn disconnect_cleans_up_like_a_leave() {
        let (rooms, voice) = setup().await;
        let mut a = connect(&rooms).await;
        let b = connect(&rooms).await;
        let channel = Uuid::new_v4();

        join(&voice, channel, &a).await;
        join(&voice, channel, &b).await;
        a.drain();

        voice.disconnect(b.connection_id).await;

        let events = a.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::VoiceParticipantLeft { user_id, .. } if *user_id == b.user_id
        )));
        // Channel still exists: A remains.
        assert_eq!(voice.participants(channel).await.len(), 1);

        // A second disconnect for the same connection is a no-op.
        voice.disconnect(b.connection_id).await;
    }

    #[tokio::test]
    async fn capacity_limit_is_enforced() {
        let rooms = RoomRegistry::new();
        let voice = VoiceRegistry::new(rooms.clone(), 2);
        let channel = Uuid::new_v4();

        let a = connect(&rooms).await;
        let b = connect(&rooms).await;
        let c = connect(&rooms).await;

        join(&voice, channel, &a).await;
        join(&voice, channel, &b).await;

        let result = voice
            .join(
                channel,
                c.user_id,
                c.connection_id,
                "tester".to_string(),
                None,
            )
            .await;
        assert!(matches!(
            result,
            Err(VoiceError::ChannelFull {
                max_participants: 2
            })
        ));
        // The refused joiner is nowhere in the registry.
        assert_eq!(voice.channel_of(c.user_id).await, None);
    }

    #[tokio::test]
    async fn rejoining_same_channel_refreshes_connection_id() {
        let (rooms, voice) = setup().await;
        let a = connect(&rooms).await;
        let channel = Uuid::new_v4();

        join(&voice, channel, &a).await;

        // Same user reconnects with a new connection.
        let (tx, _rx) = mpsc::channel(64);
        let new_connection = Uuid::now_v7();
        rooms.register(new_connection, a.user_id, tx).await;
        voice
            .join(channel, a.user_id, new_connection, "tester".to_string(), None)
            .await
            .unwrap();

        let participants = voice.participants(channel).await;
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].connection_id, new_connection);

        // Old connection's disconnect must not remove the refreshed entry.
        voice.disconnect(a.connection_id).await;
        assert_eq!(voice.participants(channel).await.len(), 1);
    }
}
