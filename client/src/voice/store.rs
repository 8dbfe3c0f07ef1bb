//! Voice Roster Store
//!
//! Client-side mirror of the channel the user is in: participant list, the
//! local user's media flags, and transient typing indicators. The server's
//! broadcasts are authoritative; a local toggle is tentative until the
//! corresponding `VoiceStateChanged` echo lands, which keeps concurrent
//! state from other tabs or devices consistent.

use std::time::{Duration, Instant};

use chorus_common::{Participant, VoiceStateFlags};
use uuid::Uuid;

/// How long a typing indicator stays visible without a refresh.
pub const TYPING_EXPIRY: Duration = Duration::from_secs(3);

/// Connection phase of the local user with respect to a voice channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Not in a channel.
    #[default]
    Idle,
    /// Acquiring media / waiting for the join ack.
    Joining,
    /// In the channel with the mesh up.
    Joined,
}

/// One live typing indicator.
#[derive(Debug, Clone)]
struct TypingEntry {
    user_id: Uuid,
    display_name: String,
    seen_at: Instant,
}

/// Client-side view of the active voice channel.
#[derive(Debug, Default)]
pub struct VoiceStore {
    /// Channel currently joined (or being joined).
    pub channel_id: Option<Uuid>,
    /// Server the channel belongs to.
    pub server_id: Option<Uuid>,
    phase: SessionPhase,
    /// Remote participants, as last announced by the server.
    participants: Vec<Participant>,
    /// The local user's flags. Tentative between a toggle and its echo.
    local_flags: VoiceStateFlags,
    typing: Vec<TypingEntry>,
}

impl VoiceStore {
    /// Fresh, idle store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Local flags as currently displayed.
    #[must_use]
    pub const fn local_flags(&self) -> VoiceStateFlags {
        self.local_flags
    }

    /// Begin joining a channel.
    pub fn begin_join(&mut self, channel_id: Uuid, server_id: Uuid) {
        self.channel_id = Some(channel_id);
        self.server_id = Some(server_id);
        self.phase = SessionPhase::Joining;
        self.participants.clear();
        self.local_flags = VoiceStateFlags::default();
    }

    /// The join ack arrived; the mesh is coming up.
    pub fn mark_joined(&mut self) {
        if self.phase == SessionPhase::Joining {
            self.phase = SessionPhase::Joined;
        }
    }

    /// Reset to idle (leave, join failure, disconnect).
    pub fn reset(&mut self) {
        *self = Self {
            typing: std::mem::take(&mut self.typing),
            ..Self::default()
        };
    }

    /// Replace the participant list with a full server snapshot.
    pub fn set_participants(&mut self, participants: Vec<Participant>) {
        self.participants = participants;
    }

    /// Insert or replace one participant.
    pub fn upsert_participant(&mut self, participant: Participant) {
        self.participants
            .retain(|p| p.user_id != participant.user_id);
        self.participants.push(participant);
    }

    /// Remove a participant.
    pub fn remove_participant(&mut self, user_id: Uuid) {
        self.participants.retain(|p| p.user_id != user_id);
    }

    /// Apply an authoritative flag broadcast. The local user's own echo
    /// overwrites any tentative toggle.
    pub fn apply_state_changed(
        &mut self,
        user_id: Uuid,
        local_user_id: Uuid,
        flags: VoiceStateFlags,
    ) {
        if user_id == local_user_id {
            self.local_flags = flags;
        }
        if let Some(p) = self.participants.iter_mut().find(|p| p.user_id == user_id) {
            p.flags = flags;
        }
    }

    /// Tentatively set local flags (before the echo).
    pub fn set_local_flags(&mut self, flags: VoiceStateFlags) {
        self.local_flags = flags;
    }

    /// Current remote participants.
    #[must_use]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Look up a participant.
    #[must_use]
    pub fn participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    /// Record a typing indicator.
    pub fn note_typing(&mut self, user_id: Uuid, display_name: String, now: Instant) {
        self.typing.retain(|t| t.user_id != user_id);
        self.typing.push(TypingEntry {
            user_id,
            display_name,
            seen_at: now,
        });
    }

    /// Names currently typing, pruning anything older than [`TYPING_EXPIRY`].
    pub fn typing_users(&mut self, now: Instant) -> Vec<String> {
        self.typing
            .retain(|t| now.duration_since(t.seen_at) < TYPING_EXPIRY);
        self.typing.iter().map(|t| t.display_name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(user_id: Uuid) -> Participant {
        Participant {
            user_id,
            connection_id: Uuid::now_v7(),
            display_name: "remote".to_string(),
            avatar_url: None,
            flags: VoiceStateFlags::default(),
        }
    }

    #[test]
    fn join_phases_advance_and_reset() {
        let mut store = VoiceStore::new();
        assert_eq!(store.phase(), SessionPhase::Idle);

        store.begin_join(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(store.phase(), SessionPhase::Joining);

        store.mark_joined();
        assert_eq!(store.phase(), SessionPhase::Joined);

        store.reset();
        assert_eq!(store.phase(), SessionPhase::Idle);
        assert!(store.channel_id.is_none());
    }

    #[test]
    fn upsert_replaces_existing_entry() {
        let mut store = VoiceStore::new();
        let user = Uuid::new_v4();

        store.upsert_participant(participant(user));
        let mut updated = participant(user);
        updated.flags.muted = true;
        store.upsert_participant(updated);

        assert_eq!(store.participants().len(), 1);
        assert!(store.participant(user).unwrap().flags.muted);
    }

    #[test]
    fn authoritative_echo_overwrites_tentative_local_flags() {
        let mut store = VoiceStore::new();
        let local_user = Uuid::new_v4();

        // Optimistic toggle...
        store.set_local_flags(VoiceStateFlags {
            muted: true,
            ..Default::default()
        });

        // ...but another device of the same user turned the camera on too;
        // the echo wins wholesale.
        let echoed = VoiceStateFlags {
            muted: true,
            camera_on: true,
            ..Default::default()
        };
        store.apply_state_changed(local_user, local_user, echoed);
        assert_eq!(store.local_flags(), echoed);
    }

    #[test]
    fn typing_entries_expire_after_three_seconds() {
        let mut store = VoiceStore::new();
        let start = Instant::now();

        store.note_typing(Uuid::new_v4(), "Alice".to_string(), start);
        assert_eq!(store.typing_users(start + Duration::from_secs(1)), vec!["Alice"]);
        assert!(store
            .typing_users(start + Duration::from_secs(4))
            .is_empty());
    }

    #[test]
    fn repeated_typing_refreshes_the_timer() {
        let mut store = VoiceStore::new();
        let user = Uuid::new_v4();
        let start = Instant::now();

        store.note_typing(user, "Alice".to_string(), start);
        store.note_typing(user, "Alice".to_string(), start + Duration::from_secs(2));

        let names = store.typing_users(start + Duration::from_secs(4));
        assert_eq!(names, vec!["Alice"]);
    }
}
