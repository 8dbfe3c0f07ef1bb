//! Voice Participant Types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Media-state flags for a voice participant.
///
/// The four flags are independent; all start out false when a user joins a
/// channel. The server's broadcast of the full set is the authoritative
/// state; local toggles are tentative until the echo arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStateFlags {
    /// Microphone muted.
    pub muted: bool,
    /// Incoming audio muted.
    pub deafened: bool,
    /// Webcam active.
    pub camera_on: bool,
    /// Screen share active.
    pub screen_sharing: bool,
}

/// Partial update for [`VoiceStateFlags`].
///
/// Any subset of flags may be supplied; unset fields leave the current value
/// unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deafened: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_sharing: Option<bool>,
}

impl VoiceStatePatch {
    /// Merge the set fields into `flags`, returning the updated value.
    #[must_use]
    pub fn apply(self, mut flags: VoiceStateFlags) -> VoiceStateFlags {
        if let Some(muted) = self.muted {
            flags.muted = muted;
        }
        if let Some(deafened) = self.deafened {
            flags.deafened = deafened;
        }
        if let Some(camera_on) = self.camera_on {
            flags.camera_on = camera_on;
        }
        if let Some(screen_sharing) = self.screen_sharing {
            flags.screen_sharing = screen_sharing;
        }
        flags
    }

    /// True when no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.muted.is_none()
            && self.deafened.is_none()
            && self.camera_on.is_none()
            && self.screen_sharing.is_none()
    }
}

/// One user's presence inside one voice channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// User ID.
    pub user_id: Uuid,
    /// Connection that owns this participation.
    pub connection_id: Uuid,
    /// Display name shown on the participant tile.
    pub display_name: String,
    /// Avatar image URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Current media-state flags.
    #[serde(flatten)]
    pub flags: VoiceStateFlags,
}
