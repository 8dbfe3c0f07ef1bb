//! Voice Service Errors

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during voice operations.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Voice channel is full.
    #[error("Voice channel is full (max: {max_participants})")]
    ChannelFull {
        /// Maximum allowed participants.
        max_participants: usize,
    },

    /// Signaling sender is not a participant of the channel.
    #[error("Sender is not a participant of channel {channel_id}")]
    SenderNotInChannel {
        /// The channel named in the signaling message.
        channel_id: Uuid,
    },

    /// Signaling target is not a participant of the channel.
    #[error("Target {target_user_id} is not a participant of channel {channel_id}")]
    TargetNotInChannel {
        /// The user the message was addressed to.
        target_user_id: Uuid,
        /// The channel named in the signaling message.
        channel_id: Uuid,
    },
}

impl VoiceError {
    /// Stable error code sent to clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ChannelFull { .. } => "channel_full",
            Self::SenderNotInChannel { .. } => "not_in_channel",
            Self::TargetNotInChannel { .. } => "unknown_target",
        }
    }
}
