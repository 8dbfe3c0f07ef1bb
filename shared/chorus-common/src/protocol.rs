//! Socket Wire Protocol
//!
//! Every frame on the gateway socket is one of these enums, JSON-encoded with
//! an internal `type` tag. Negotiation payloads (SDP, ICE candidates) are
//! carried opaquely; the server relays them without inspection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Participant, VoiceStatePatch};

/// Kind of a relayed negotiation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Session description proposed by the initiator.
    Offer,
    /// Session description accepting an offer.
    Answer,
    /// One network-path candidate.
    Candidate,
}

/// Client-to-server events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Ping for keepalive
    Ping,
    /// Subscribe to a text channel's events
    JoinChannel { channel_id: Uuid },
    /// Fan a chat message out to a channel room (persistence is external)
    SendMessage {
        channel_id: Uuid,
        message: serde_json::Value,
    },
    /// Send typing indicator
    Typing {
        channel_id: Uuid,
        display_name: String,
    },
    /// Subscribe to a server's presence room
    JoinServer { server_id: Uuid },
    /// Join a voice channel
    JoinVoice {
        channel_id: Uuid,
        server_id: Uuid,
        display_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        avatar_url: Option<String>,
    },
    /// Leave a voice channel
    LeaveVoice { channel_id: Uuid },
    /// Partial media-state update for the local participant
    VoiceStateUpdate {
        channel_id: Uuid,
        #[serde(flatten)]
        patch: VoiceStatePatch,
    },
    /// Read-only snapshot of a channel's participants
    GetVoiceParticipants { channel_id: Uuid },
    /// Relay a negotiation message to one participant
    Signal {
        kind: SignalKind,
        target_user_id: Uuid,
        channel_id: Uuid,
        payload: serde_json::Value,
    },
}

/// Server-to-client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection authenticated successfully
    Ready { user_id: Uuid, connection_id: Uuid },
    /// Pong response
    Pong,
    /// New message in channel
    MessageNew {
        channel_id: Uuid,
        user_id: Uuid,
        message: serde_json::Value,
    },
    /// User typing (consumers apply a local expiry; no stop event is sent)
    Typing {
        channel_id: Uuid,
        user_id: Uuid,
        display_name: String,
    },
    /// Online-user set for a server's presence room
    Presence {
        server_id: Uuid,
        online_user_ids: Vec<Uuid>,
    },
    /// Join acknowledgement: who was already in the channel
    VoiceJoined {
        channel_id: Uuid,
        existing_participants: Vec<Participant>,
    },
    /// A participant entered the channel
    VoiceParticipantJoined {
        channel_id: Uuid,
        participant: Participant,
    },
    /// A participant left the channel
    VoiceParticipantLeft { channel_id: Uuid, user_id: Uuid },
    /// Full participant snapshot
    VoiceParticipants {
        channel_id: Uuid,
        participants: Vec<Participant>,
    },
    /// A participant's media-state flags changed (full, authoritative set)
    VoiceStateChanged {
        channel_id: Uuid,
        user_id: Uuid,
        #[serde(flatten)]
        flags: crate::types::VoiceStateFlags,
    },
    /// Relayed negotiation message (point-to-point, never room-broadcast)
    Signal {
        kind: SignalKind,
        from_user_id: Uuid,
        channel_id: Uuid,
        payload: serde_json::Value,
    },
    /// Relay failed: the named target is not a participant of the channel
    SignalError {
        kind: SignalKind,
        target_user_id: Uuid,
        channel_id: Uuid,
        reason: String,
    },
    /// Error
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_uses_snake_case_tag() {
        let event = ClientEvent::JoinVoice {
            channel_id: Uuid::new_v4(),
            server_id: Uuid::new_v4(),
            display_name: "Alice".to_string(),
            avatar_url: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"join_voice\""));
    }

    #[test]
    fn voice_state_update_flattens_patch() {
        let json = r#"{"type":"voice_state_update","channel_id":"018f65a0-0000-7000-8000-000000000000","muted":true}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::VoiceStateUpdate { patch, .. } => {
                assert_eq!(patch.muted, Some(true));
                assert_eq!(patch.deafened, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn signal_roundtrip_preserves_opaque_payload() {
        let payload = serde_json::json!({"sdp": "v=0...", "type": "offer"});
        let event = ServerEvent::Signal {
            kind: SignalKind::Offer,
            from_user_id: Uuid::new_v4(),
            channel_id: Uuid::new_v4(),
            payload: payload.clone(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        match back {
            ServerEvent::Signal {
                kind,
                payload: decoded,
                ..
            } => {
                assert_eq!(kind, SignalKind::Offer);
                assert_eq!(decoded, payload);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
