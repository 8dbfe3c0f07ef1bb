//! Signaling Relay
//!
//! Routes negotiation messages (offers, answers, network-path candidates)
//! from one participant to one named target inside a shared voice channel.
//! Point-to-point only: relayed messages are never room-broadcast.
//!
//! There is no buffering here: if the target's connection is mid-disconnect
//! the message is lost, and the sender's own negotiation timeout is the
//! recovery mechanism. A target that is not a participant at all produces a
//! typed error so the gateway can acknowledge the failure to the sender.

use std::sync::Arc;

use chorus_common::{ServerEvent, SignalKind};
use tracing::debug;
use uuid::Uuid;

use super::error::VoiceError;
use super::registry::VoiceRegistry;
use crate::rooms::RoomRegistry;

/// Relay for peer-negotiation messages.
pub struct SignalRelay {
    rooms: Arc<RoomRegistry>,
    voice: Arc<VoiceRegistry>,
}

impl SignalRelay {
    /// Create a relay over the given registries.
    #[must_use]
    pub fn new(rooms: Arc<RoomRegistry>, voice: Arc<VoiceRegistry>) -> Arc<Self> {
        Arc::new(Self { rooms, voice })
    }

    /// Forward a negotiation message to the named target.
    ///
    /// Both sender and target must currently be participants of
    /// `channel_id`; the membership check also keeps a participant from
    /// signaling into a channel they already left.
    pub async fn relay(
        &self,
        kind: SignalKind,
        from_user_id: Uuid,
        target_user_id: Uuid,
        channel_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), VoiceError> {
        if self
            .voice
            .participant(channel_id, from_user_id)
            .await
            .is_none()
        {
            return Err(VoiceError::SenderNotInChannel { channel_id });
        }

        let target = self
            .voice
            .participant(channel_id, target_user_id)
            .await
            .ok_or(VoiceError::TargetNotInChannel {
                target_user_id,
                channel_id,
            })?;

        let delivered = self
            .rooms
            .send_to(
                target.connection_id,
                ServerEvent::Signal {
                    kind,
                    from_user_id,
                    channel_id,
                    payload,
                },
            )
            .await;

        if !delivered {
            // Target dropped between lookup and delivery. Not an error: the
            // sender's negotiation timeout handles it.
            debug!(
                target_user_id = %target_user_id,
                channel_id = %channel_id,
                "Signal lost: target connection closed mid-relay"
            );
        }

        Ok(())
    }
}
