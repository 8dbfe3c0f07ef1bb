//! Chorus Common Library
//!
//! Wire protocol and voice types shared by the signaling server and the
//! desktop client. Both sides of the socket speak exactly these enums.

pub mod protocol;
pub mod rooms;
pub mod types;

pub use protocol::{ClientEvent, ServerEvent, SignalKind};
pub use types::{Participant, VoiceStateFlags, VoiceStatePatch};
