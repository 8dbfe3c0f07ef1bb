//! Voice Channel Coordination
//!
//! Server-side half of the calling core: the participant registry (who is in
//! which channel, with which media flags) and the signaling relay that
//! forwards negotiation messages between participants. Media flows directly
//! peer-to-peer; nothing in this module ever sees it.

pub mod error;
pub mod handlers;
pub mod registry;
pub mod relay;

pub use error::VoiceError;
pub use registry::VoiceRegistry;
pub use relay::SignalRelay;
