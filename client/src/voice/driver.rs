//! Peer Link Transport Driver
//!
//! Executes the state machine's effects against the WebRTC stack: one
//! `RTCPeerConnection` per link, local tracks attached, candidates and
//! transport-state changes reported back through an event queue the mesh
//! manager consumes. The trait seam keeps the mesh testable without a
//! media stack.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine, APIBuilder,
        API,
    },
    ice_transport::{ice_candidate::RTCIceCandidateInit, ice_server::RTCIceServer},
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, offer_answer_options::RTCOfferOptions,
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::{RTCRtpCodecParameters, RTPCodecType},
        rtp_sender::RTCRtpSender,
    },
    track::track_local::{track_local_static_rtp::TrackLocalStaticRTP, TrackLocal},
    track::track_remote::TrackRemote,
};

use super::media::{opus_capability, vp8_capability, LocalMedia, MediaError, MediaSource};

/// Driver errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// WebRTC stack error.
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// A relayed payload did not decode as a description or candidate.
    #[error("Invalid negotiation payload: {0}")]
    Payload(String),

    /// Media acquisition failed.
    #[error(transparent)]
    Media(#[from] MediaError),

    /// A link was opened before local media was acquired.
    #[error("No local media acquired")]
    NoMedia,
}

impl From<webrtc::Error> for DriverError {
    fn from(err: webrtc::Error) -> Self {
        Self::WebRtc(err.to_string())
    }
}

/// Which video goes out on the links right now.
///
/// Screen share takes precedence over the camera while active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoFeed {
    /// No outgoing video.
    #[default]
    None,
    /// Webcam.
    Camera,
    /// Screen capture.
    Screen,
}

/// Transport-level status of one link, as reported by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// The connection reached its connected state.
    Connected,
    /// The connection failed.
    Failed,
}

/// Events the driver pushes back to the mesh manager.
#[derive(Debug)]
pub enum DriverEvent {
    /// The transport produced a local network-path candidate to relay.
    LocalCandidate {
        remote_user_id: Uuid,
        candidate: Value,
    },
    /// The transport's connection state changed.
    Transport {
        remote_user_id: Uuid,
        status: TransportStatus,
    },
    /// A remote media track arrived (UI pulls it from the link).
    RemoteTrack { remote_user_id: Uuid },
}

/// ICE server configuration.
#[derive(Debug, Clone)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl Default for IceServerConfig {
    fn default() -> Self {
        Self {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            username: None,
            credential: None,
        }
    }
}

/// Transport seam between the mesh manager and the media stack.
///
/// Methods return `Send` futures so the session task can drive any concrete
/// driver from a spawned task.
pub trait LinkDriver: Send + Sync + 'static {
    /// Per-link connection handle.
    type Link: Send + Sync;

    /// Acquire local media (microphone, optionally webcam). Cancel-safe:
    /// dropping the future abandons the acquisition.
    fn acquire_media(&self, video: bool)
        -> impl Future<Output = Result<(), MediaError>> + Send;

    /// Stop and drop all local media tracks.
    fn release_media(&self) -> impl Future<Output = ()> + Send;

    /// Create the underlying connection for a link and attach local tracks.
    fn open_link(
        &self,
        remote_user_id: Uuid,
    ) -> impl Future<Output = Result<Self::Link, DriverError>> + Send;

    /// Generate a local offer, record it, and return its wire payload.
    fn create_offer(
        &self,
        link: &Self::Link,
        ice_restart: bool,
    ) -> impl Future<Output = Result<Value, DriverError>> + Send;

    /// Generate an answer for the applied remote offer and return its
    /// wire payload.
    fn create_answer(
        &self,
        link: &Self::Link,
    ) -> impl Future<Output = Result<Value, DriverError>> + Send;

    /// Apply a remote session description (offer or answer).
    fn apply_remote_description(
        &self,
        link: &Self::Link,
        payload: &Value,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Apply one remote network-path candidate.
    fn apply_candidate(
        &self,
        link: &Self::Link,
        candidate: &Value,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Swap the outgoing video track on the link's sender (adding one when
    /// the link never had video). No renegotiation.
    fn set_video_feed(
        &self,
        link: &Self::Link,
        feed: VideoFeed,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Close the underlying connection and drop its remote media.
    fn close_link(&self, link: &Self::Link) -> impl Future<Output = ()> + Send;
}

/// One peer's connection handle.
pub struct WebRtcLink {
    remote_user_id: Uuid,
    pc: Arc<RTCPeerConnection>,
    video_sender: RwLock<Option<Arc<RTCRtpSender>>>,
    remote_tracks: RwLock<Vec<Arc<TrackRemote>>>,
}

impl WebRtcLink {
    /// Remote media tracks received so far (for the UI's tiles).
    pub async fn remote_tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.remote_tracks.read().await.clone()
    }
}

/// WebRTC-backed driver.
pub struct WebRtcDriver<M: MediaSource> {
    api: API,
    rtc_config: RTCConfiguration,
    source: M,
    media: RwLock<Option<LocalMedia>>,
    screen: RwLock<Option<Arc<TrackLocalStaticRTP>>>,
    events: mpsc::Sender<DriverEvent>,
}

impl<M: MediaSource> WebRtcDriver<M> {
    /// Build the WebRTC API with the codecs the mesh negotiates.
    pub fn new(
        ice_servers: &[IceServerConfig],
        source: M,
        events: mpsc::Sender<DriverEvent>,
    ) -> Result<Self, DriverError> {
        let mut media_engine = MediaEngine::default();

        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: opus_capability(),
                    payload_type: 111,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(|e| DriverError::WebRtc(e.to_string()))?;

        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: vp8_capability(),
                    payload_type: 96,
                    ..Default::default()
                },
                RTPCodecType::Video,
            )
            .map_err(|e| DriverError::WebRtc(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| DriverError::WebRtc(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        info!("WebRTC driver initialized");

        Ok(Self {
            api,
            rtc_config: Self::rtc_configuration(ice_servers),
            source,
            media: RwLock::new(None),
            screen: RwLock::new(None),
            events,
        })
    }

    fn rtc_configuration(ice_servers: &[IceServerConfig]) -> RTCConfiguration {
        let ice_servers: Vec<RTCIceServer> = ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone().unwrap_or_default(),
                credential: s.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }

    /// Camera track, acquiring and caching it on first use.
    async fn camera_track(&self) -> Result<Arc<TrackLocalStaticRTP>, DriverError> {
        let mut media = self.media.write().await;
        let local = media.as_mut().ok_or(DriverError::NoMedia)?;
        if let Some(camera) = &local.camera {
            return Ok(camera.clone());
        }
        let camera = self.source.acquire_camera().await?;
        local.camera = Some(camera.clone());
        Ok(camera)
    }

    /// Screen track, acquiring and caching it on first use.
    async fn screen_track(&self) -> Result<Arc<TrackLocalStaticRTP>, DriverError> {
        let mut screen = self.screen.write().await;
        if let Some(track) = &*screen {
            return Ok(track.clone());
        }
        let track = self.source.acquire_screen().await?;
        *screen = Some(track.clone());
        Ok(track)
    }

    /// Wire the connection's callbacks to the driver event queue.
    fn attach_handlers(&self, pc: &Arc<RTCPeerConnection>, link: &Arc<WebRtcLink>) {
        let remote_user_id = link.remote_user_id;

        let events = self.events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let events = events.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(init) => match serde_json::to_value(&init) {
                            Ok(payload) => {
                                if events
                                    .send(DriverEvent::LocalCandidate {
                                        remote_user_id,
                                        candidate: payload,
                                    })
                                    .await
                                    .is_err()
                                {
                                    debug!("Driver event queue closed; dropping candidate");
                                }
                            }
                            Err(e) => warn!(error = %e, "Failed to serialize ICE candidate"),
                        },
                        Err(e) => warn!(error = %e, "Failed to convert ICE candidate"),
                    }
                }
            })
        }));

        let events = self.events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = events.clone();
            Box::pin(async move {
                debug!(remote_user_id = %remote_user_id, state = ?state, "Peer connection state changed");
                let status = match state {
                    RTCPeerConnectionState::Connected => Some(TransportStatus::Connected),
                    RTCPeerConnectionState::Failed => Some(TransportStatus::Failed),
                    _ => None,
                };
                if let Some(status) = status {
                    let _ = events
                        .send(DriverEvent::Transport {
                            remote_user_id,
                            status,
                        })
                        .await;
                }
            })
        }));

        let events = self.events.clone();
        let link_weak = Arc::downgrade(link);
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = events.clone();
            let link_weak = link_weak.clone();
            Box::pin(async move {
                info!(
                    remote_user_id = %remote_user_id,
                    kind = ?track.kind(),
                    "Remote track received"
                );
                if let Some(link) = link_weak.upgrade() {
                    link.remote_tracks.write().await.push(track);
                    let _ = events
                        .send(DriverEvent::RemoteTrack { remote_user_id })
                        .await;
                }
            })
        }));
    }
}

impl<M: MediaSource> LinkDriver for WebRtcDriver<M> {
    type Link = Arc<WebRtcLink>;

    async fn acquire_media(&self, video: bool) -> Result<(), MediaError> {
        let local = self.source.acquire(video).await?;
        *self.media.write().await = Some(local);
        Ok(())
    }

    async fn release_media(&self) {
        *self.media.write().await = None;
        *self.screen.write().await = None;
    }

    async fn open_link(&self, remote_user_id: Uuid) -> Result<Self::Link, DriverError> {
        let audio = {
            let media = self.media.read().await;
            media.as_ref().ok_or(DriverError::NoMedia)?.audio.clone()
        };

        let pc = Arc::new(self.api.new_peer_connection(self.rtc_config.clone()).await?);

        pc.add_track(audio as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        let link = Arc::new(WebRtcLink {
            remote_user_id,
            pc: pc.clone(),
            video_sender: RwLock::new(None),
            remote_tracks: RwLock::new(Vec::new()),
        });

        self.attach_handlers(&pc, &link);

        debug!(remote_user_id = %remote_user_id, "Peer connection created");
        Ok(link)
    }

    async fn create_offer(
        &self,
        link: &Self::Link,
        ice_restart: bool,
    ) -> Result<Value, DriverError> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });

        let offer = link.pc.create_offer(options).await?;
        link.pc.set_local_description(offer.clone()).await?;

        serde_json::to_value(&offer).map_err(|e| DriverError::Payload(e.to_string()))
    }

    async fn create_answer(&self, link: &Self::Link) -> Result<Value, DriverError> {
        let answer = link.pc.create_answer(None).await?;
        link.pc.set_local_description(answer.clone()).await?;

        serde_json::to_value(&answer).map_err(|e| DriverError::Payload(e.to_string()))
    }

    async fn apply_remote_description(
        &self,
        link: &Self::Link,
        payload: &Value,
    ) -> Result<(), DriverError> {
        let description: RTCSessionDescription = serde_json::from_value(payload.clone())
            .map_err(|e| DriverError::Payload(e.to_string()))?;
        link.pc.set_remote_description(description).await?;
        Ok(())
    }

    async fn apply_candidate(
        &self,
        link: &Self::Link,
        candidate: &Value,
    ) -> Result<(), DriverError> {
        let init: RTCIceCandidateInit = serde_json::from_value(candidate.clone())
            .map_err(|e| DriverError::Payload(e.to_string()))?;
        link.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn set_video_feed(&self, link: &Self::Link, feed: VideoFeed) -> Result<(), DriverError> {
        let track = match feed {
            VideoFeed::None => None,
            VideoFeed::Camera => Some(self.camera_track().await?),
            VideoFeed::Screen => Some(self.screen_track().await?),
        };

        let mut slot = link.video_sender.write().await;
        if let Some(existing) = slot.clone() {
            match track {
                Some(track) => {
                    existing
                        .replace_track(Some(track as Arc<dyn TrackLocal + Send + Sync>))
                        .await?;
                }
                None => existing.replace_track(None).await?,
            }
        } else if let Some(track) = track {
            let new_sender = link
                .pc
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            *slot = Some(new_sender);
        }

        Ok(())
    }

    async fn close_link(&self, link: &Self::Link) {
        if let Err(e) = link.pc.close().await {
            warn!(remote_user_id = %link.remote_user_id, error = %e, "Error closing peer connection");
        }
        link.remote_tracks.write().await.clear();
    }
}
