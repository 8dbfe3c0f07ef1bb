//! Chorus Server
//!
//! Real-time session coordination for voice/video calling: a WebSocket
//! gateway that lets voice-channel participants discover each other and
//! exchange the negotiation messages needed to build a full peer-to-peer
//! media mesh. The server relays signaling only; media never touches it.

pub mod api;
pub mod auth;
pub mod config;
pub mod presence;
pub mod rooms;
pub mod voice;
pub mod ws;
