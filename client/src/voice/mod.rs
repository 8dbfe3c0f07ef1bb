//! Voice Channel Client
//!
//! Everything needed to be in a voice channel: the roster store, the peer
//! link state machine, the mesh manager that owns one link per remote
//! participant, the WebRTC transport driver, and the session task that
//! drives the join/leave protocol against the gateway.

pub mod driver;
pub mod link;
pub mod media;
pub mod mesh;
pub mod session;
pub mod store;

pub use driver::{DriverEvent, IceServerConfig, LinkDriver, VideoFeed, WebRtcDriver};
pub use link::{LinkState, PeerLink};
pub use media::{MediaError, MediaSource, RtpMediaSource};
pub use mesh::MeshManager;
pub use session::{SessionEvent, VoiceCommand, VoiceSession, VoiceSessionHandle};
pub use store::{SessionPhase, VoiceStore};
