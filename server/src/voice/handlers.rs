//! Voice Gateway Event Handlers
//!
//! Handles voice-related client events coming off a gateway connection.

use std::sync::Arc;

use chorus_common::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::VoiceError;
use super::registry::VoiceRegistry;
use super::relay::SignalRelay;

/// Handle a voice-related client event.
pub async fn handle_voice_event(
    voice: &Arc<VoiceRegistry>,
    relay: &Arc<SignalRelay>,
    user_id: Uuid,
    connection_id: Uuid,
    event: ClientEvent,
    tx: &mpsc::Sender<ServerEvent>,
) -> Result<(), VoiceError> {
    match event {
        ClientEvent::JoinVoice {
            channel_id,
            server_id: _,
            display_name,
            avatar_url,
        } => {
            let existing_participants = voice
                .join(channel_id, user_id, connection_id, display_name, avatar_url)
                .await?;

            // The ack tells the joiner who to negotiate with; existing
            // participants never initiate toward the newcomer.
            if tx
                .send(ServerEvent::VoiceJoined {
                    channel_id,
                    existing_participants,
                })
                .await
                .is_err()
            {
                warn!(user_id = %user_id, channel_id = %channel_id, "Joiner disconnected before ack");
            }
            Ok(())
        }

        ClientEvent::LeaveVoice { channel_id } => {
            voice.leave(channel_id, user_id).await;
            Ok(())
        }

        ClientEvent::VoiceStateUpdate { channel_id, patch } => {
            if voice.update_state(channel_id, user_id, patch).await.is_none() {
                // Raced with a leave; deliberately not an error.
                debug!(user_id = %user_id, channel_id = %channel_id, "State update for absent participant");
            }
            Ok(())
        }

        ClientEvent::GetVoiceParticipants { channel_id } => {
            let participants = voice.participants(channel_id).await;
            let _ = tx
                .send(ServerEvent::VoiceParticipants {
                    channel_id,
                    participants,
                })
                .await;
            Ok(())
        }

        ClientEvent::Signal {
            kind,
            target_user_id,
            channel_id,
            payload,
        } => {
            match relay
                .relay(kind, user_id, target_user_id, channel_id, payload)
                .await
            {
                Ok(()) => Ok(()),
                // Acknowledge the failure so the sender can fail its peer
                // link fast instead of waiting out the negotiation timeout.
                Err(VoiceError::TargetNotInChannel {
                    target_user_id,
                    channel_id,
                }) => {
                    let _ = tx
                        .send(ServerEvent::SignalError {
                            kind,
                            target_user_id,
                            channel_id,
                            reason: "target is not a participant of this channel".to_string(),
                        })
                        .await;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }

        _ => Ok(()), // Non-voice events handled elsewhere
    }
}

#[cfg(test)]
#[path = "handlers_test.rs"]
mod handlers_test;
