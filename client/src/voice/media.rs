//! Local Media Acquisition
//!
//! Track factory behind the mesh manager. Acquisition may block indefinitely
//! on a user permission prompt, so every method is async and cancel-safe:
//! leaving the channel while a prompt is pending simply drops the future.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

/// Media acquisition errors.
#[derive(Debug, Clone, Error)]
pub enum MediaError {
    /// The user denied the permission prompt.
    #[error("Media permission denied")]
    PermissionDenied,

    /// No capture device is available.
    #[error("No capture device available")]
    NoDevice,

    /// Device-level capture failure.
    #[error("Capture error: {0}")]
    Capture(String),
}

/// The local tracks attached to every peer link.
#[derive(Clone)]
pub struct LocalMedia {
    /// Microphone audio.
    pub audio: Arc<TrackLocalStaticRTP>,
    /// Webcam video, when acquired.
    pub camera: Option<Arc<TrackLocalStaticRTP>>,
}

/// Source of local media tracks.
///
/// Methods return `Send` futures so sessions can run them from spawned
/// tasks regardless of the concrete source.
pub trait MediaSource: Send + Sync + 'static {
    /// Acquire microphone audio, and webcam video when `video` is set.
    fn acquire(&self, video: bool)
        -> impl Future<Output = Result<LocalMedia, MediaError>> + Send;

    /// Acquire a webcam track on its own (camera toggled on mid-call).
    fn acquire_camera(
        &self,
    ) -> impl Future<Output = Result<Arc<TrackLocalStaticRTP>, MediaError>> + Send;

    /// Acquire a screen-capture track.
    fn acquire_screen(
        &self,
    ) -> impl Future<Output = Result<Arc<TrackLocalStaticRTP>, MediaError>> + Send;
}

/// Opus capability matching what the peer links negotiate.
pub(crate) fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// VP8 capability for camera and screen tracks.
pub(crate) fn vp8_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "video/VP8".to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Default source: creates RTP tracks the capture pipeline writes into.
///
/// Device capture itself (microphone, webcam, screen grabber) feeds samples
/// to these tracks from outside the mesh; the mesh only owns their
/// attachment to peer links.
#[derive(Default)]
pub struct RtpMediaSource;

impl MediaSource for RtpMediaSource {
    async fn acquire(&self, video: bool) -> Result<LocalMedia, MediaError> {
        let audio = Arc::new(TrackLocalStaticRTP::new(
            opus_capability(),
            "audio".to_string(),
            "chorus-voice".to_string(),
        ));
        let camera = if video {
            Some(self.acquire_camera().await?)
        } else {
            None
        };
        Ok(LocalMedia { audio, camera })
    }

    async fn acquire_camera(&self) -> Result<Arc<TrackLocalStaticRTP>, MediaError> {
        Ok(Arc::new(TrackLocalStaticRTP::new(
            vp8_capability(),
            "camera".to_string(),
            "chorus-voice".to_string(),
        )))
    }

    async fn acquire_screen(&self) -> Result<Arc<TrackLocalStaticRTP>, MediaError> {
        Ok(Arc::new(TrackLocalStaticRTP::new(
            vp8_capability(),
            "screen".to_string(),
            "chorus-screen".to_string(),
        )))
    }
}
