//! Chorus Client
//!
//! Client-side half of the calling core: the gateway socket session and the
//! per-channel peer-connection mesh manager. For every joined voice channel
//! the mesh manager owns one bidirectional media link per remote participant,
//! drives offer/answer negotiation end to end, buffers out-of-order
//! network-path candidates, resolves simultaneous-negotiation conflicts, and
//! tears everything down cleanly on leave or disconnect.

pub mod voice;
pub mod ws;
