//! Voice Session Task
//!
//! Drives the join protocol for one user: `Idle → Joining → Joined → Idle`.
//! Joining acquires local media first (cancellable: a leave issued while
//! the permission prompt is pending aborts the acquisition), then sends
//! `join_voice` and waits for the ack naming the participants to negotiate
//! with. Everything after that is routed into the mesh manager.

use std::sync::Arc;
use std::time::Duration;

use chorus_common::{
    ClientEvent, ServerEvent, VoiceStateFlags, VoiceStatePatch,
};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::driver::{DriverEvent, LinkDriver};
use super::media::MediaError;
use super::mesh::MeshManager;
use super::store::VoiceStore;

/// How long the join ack may take before the attempt is abandoned.
pub const JOIN_ACK_TIMEOUT: Duration = Duration::from_secs(15);

/// Commands from the UI.
#[derive(Debug, Clone)]
pub enum VoiceCommand {
    /// Join a voice channel (leaving the current one first if needed).
    Join {
        channel_id: Uuid,
        server_id: Uuid,
        display_name: String,
        avatar_url: Option<String>,
        /// Acquire the webcam up front (video channels).
        video: bool,
    },
    /// Leave the current channel.
    Leave,
    /// Toggle the microphone.
    SetMuted(bool),
    /// Toggle incoming audio. Deafening also mutes.
    SetDeafened(bool),
    /// Toggle the webcam.
    SetCamera(bool),
    /// Toggle screen sharing.
    SetScreenShare(bool),
}

/// Notifications to the UI.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The join completed; the mesh is negotiating.
    Joined { channel_id: Uuid },
    /// The join was abandoned.
    JoinFailed { reason: String },
    /// The channel was left.
    Left,
}

/// Internal results from spawned work.
enum Internal {
    MediaReady {
        generation: u64,
        result: Result<(), MediaError>,
    },
}

/// A join waiting on media acquisition or the server ack.
struct PendingJoin {
    channel_id: Uuid,
    server_id: Uuid,
    display_name: String,
    avatar_url: Option<String>,
    generation: u64,
    /// Acquisition task; aborted on cancel.
    acquire: Option<JoinHandle<()>>,
    /// Armed once `join_voice` is sent.
    ack_deadline: Option<Instant>,
}

/// Handle to a running voice session task.
pub struct VoiceSessionHandle {
    commands: mpsc::Sender<VoiceCommand>,
    events: broadcast::Sender<SessionEvent>,
    store: Arc<RwLock<VoiceStore>>,
}

impl VoiceSessionHandle {
    /// Send a command to the session.
    pub async fn command(&self, command: VoiceCommand) {
        let _ = self.commands.send(command).await;
    }

    /// Subscribe to session notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Shared roster store for the UI to render from.
    #[must_use]
    pub fn store(&self) -> Arc<RwLock<VoiceStore>> {
        self.store.clone()
    }
}

/// The session task state.
pub struct VoiceSession<D: LinkDriver> {
    user_id: Uuid,
    driver: Arc<D>,
    /// Outbound queue to the gateway socket.
    outbound: mpsc::Sender<ClientEvent>,
    /// Inbound events from the gateway socket.
    server_rx: broadcast::Receiver<ServerEvent>,
    /// Events from the transport driver.
    driver_rx: mpsc::Receiver<DriverEvent>,
    store: Arc<RwLock<VoiceStore>>,
    events: broadcast::Sender<SessionEvent>,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: mpsc::Receiver<Internal>,
    mesh: Option<MeshManager<D>>,
    pending: Option<PendingJoin>,
    generation: u64,
}

impl<D: LinkDriver> VoiceSession<D> {
    /// Create a session and spawn its task.
    pub fn spawn(
        user_id: Uuid,
        driver: Arc<D>,
        outbound: mpsc::Sender<ClientEvent>,
        server_rx: broadcast::Receiver<ServerEvent>,
        driver_rx: mpsc::Receiver<DriverEvent>,
    ) -> VoiceSessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (events, _) = broadcast::channel(32);
        let (internal_tx, internal_rx) = mpsc::channel(8);
        let store = Arc::new(RwLock::new(VoiceStore::new()));

        let session = Self {
            user_id,
            driver,
            outbound,
            server_rx,
            driver_rx,
            store: store.clone(),
            events: events.clone(),
            internal_tx,
            internal_rx,
            mesh: None,
            pending: None,
            generation: 0,
        };
        tokio::spawn(session.run(commands_rx));

        VoiceSessionHandle {
            commands: commands_tx,
            events,
            store,
        }
    }

    /// Main loop. Single task; every suspension point is a select arm, so
    /// nothing here blocks the queue.
    async fn run(mut self, mut commands: mpsc::Receiver<VoiceCommand>) {
        let mut tick = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command).await;
                }

                event = self.server_rx.recv() => {
                    match event {
                        Ok(event) => self.handle_server_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Session lagged behind the gateway stream");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                Some(event) = self.driver_rx.recv() => {
                    if let Some(mesh) = &mut self.mesh {
                        mesh.handle_driver_event(event).await;
                    }
                }

                Some(internal) = self.internal_rx.recv() => {
                    self.handle_internal(internal).await;
                }

                _ = tick.tick() => {
                    self.on_tick().await;
                }
            }
        }

        self.leave(false).await;
    }

    async fn handle_command(&mut self, command: VoiceCommand) {
        match command {
            VoiceCommand::Join {
                channel_id,
                server_id,
                display_name,
                avatar_url,
                video,
            } => {
                // Hopping channels: clean local state first; the server does
                // its own implicit leave on the join.
                self.leave(false).await;
                self.begin_join(channel_id, server_id, display_name, avatar_url, video)
                    .await;
            }
            VoiceCommand::Leave => self.leave(true).await,
            VoiceCommand::SetMuted(muted) => {
                self.update_flags(VoiceStatePatch {
                    muted: Some(muted),
                    ..Default::default()
                })
                .await;
            }
            VoiceCommand::SetDeafened(deafened) => {
                // Deafening forces mute on; undeafening leaves mute as-is.
                self.update_flags(VoiceStatePatch {
                    deafened: Some(deafened),
                    muted: deafened.then_some(true),
                    ..Default::default()
                })
                .await;
            }
            VoiceCommand::SetCamera(on) => {
                if let Some(mesh) = &mut self.mesh {
                    mesh.set_camera(on).await;
                }
                self.update_flags(VoiceStatePatch {
                    camera_on: Some(on),
                    ..Default::default()
                })
                .await;
            }
            VoiceCommand::SetScreenShare(on) => {
                if let Some(mesh) = &mut self.mesh {
                    mesh.set_screen_share(on).await;
                }
                self.update_flags(VoiceStatePatch {
                    screen_sharing: Some(on),
                    ..Default::default()
                })
                .await;
            }
        }
    }

    async fn begin_join(
        &mut self,
        channel_id: Uuid,
        server_id: Uuid,
        display_name: String,
        avatar_url: Option<String>,
        video: bool,
    ) {
        self.generation += 1;
        let generation = self.generation;

        self.store.write().await.begin_join(channel_id, server_id);

        let driver = self.driver.clone();
        let internal = self.internal_tx.clone();
        let acquire = tokio::spawn(async move {
            let result = driver.acquire_media(video).await;
            let _ = internal
                .send(Internal::MediaReady { generation, result })
                .await;
        });

        self.pending = Some(PendingJoin {
            channel_id,
            server_id,
            display_name,
            avatar_url,
            generation,
            acquire: Some(acquire),
            ack_deadline: None,
        });

        info!(channel_id = %channel_id, "Joining voice channel");
    }

    async fn handle_internal(&mut self, internal: Internal) {
        let Internal::MediaReady { generation, result } = internal;

        // A cancelled or superseded join; the result is stale.
        if self.pending.as_ref().map(|p| p.generation) != Some(generation) {
            debug!("Discarding stale media acquisition result");
            return;
        }

        match result {
            Ok(()) => {
                let (channel_id, event) = {
                    let Some(pending) = self.pending.as_mut() else {
                        return;
                    };
                    pending.acquire = None;
                    pending.ack_deadline = Some(Instant::now() + JOIN_ACK_TIMEOUT);
                    (
                        pending.channel_id,
                        ClientEvent::JoinVoice {
                            channel_id: pending.channel_id,
                            server_id: pending.server_id,
                            display_name: pending.display_name.clone(),
                            avatar_url: pending.avatar_url.clone(),
                        },
                    )
                };
                debug!(channel_id = %channel_id, "Local media ready, requesting join");
                let _ = self.outbound.send(event).await;
            }
            Err(e) => {
                // Permission denied or no device: abort back to idle, no
                // server interaction has happened yet.
                warn!(error = %e, "Media acquisition failed");
                self.pending = None;
                self.store.write().await.reset();
                let _ = self.events.send(SessionEvent::JoinFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::VoiceJoined {
                channel_id,
                existing_participants,
            } => {
                let matches = self
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.channel_id == channel_id);
                if !matches {
                    return;
                }
                self.pending = None;

                let mut mesh = MeshManager::new(
                    self.user_id,
                    channel_id,
                    self.driver.clone(),
                    self.outbound.clone(),
                );
                let remotes: Vec<Uuid> =
                    existing_participants.iter().map(|p| p.user_id).collect();
                mesh.connect_to_existing(&remotes).await;
                self.mesh = Some(mesh);

                {
                    let mut store = self.store.write().await;
                    store.set_participants(existing_participants);
                    store.mark_joined();
                }
                info!(channel_id = %channel_id, peers = remotes.len(), "Voice channel joined");
                let _ = self.events.send(SessionEvent::Joined { channel_id });
            }

            ServerEvent::VoiceParticipantJoined {
                channel_id,
                participant,
            } => {
                if self.in_channel(channel_id).await && participant.user_id != self.user_id {
                    // The newcomer initiates toward us; nothing to send.
                    self.store.write().await.upsert_participant(participant);
                }
            }

            ServerEvent::VoiceParticipantLeft {
                channel_id,
                user_id,
            } => {
                if self.in_channel(channel_id).await {
                    self.store.write().await.remove_participant(user_id);
                    if let Some(mesh) = &mut self.mesh {
                        mesh.handle_participant_left(user_id).await;
                    }
                }
            }

            ServerEvent::VoiceParticipants {
                channel_id,
                participants,
            } => {
                if self.in_channel(channel_id).await {
                    let local_user_id = self.user_id;
                    self.store.write().await.set_participants(
                        participants
                            .into_iter()
                            .filter(|p| p.user_id != local_user_id)
                            .collect(),
                    );
                }
            }

            ServerEvent::VoiceStateChanged {
                channel_id,
                user_id,
                flags,
            } => {
                if self.in_channel(channel_id).await {
                    self.store
                        .write()
                        .await
                        .apply_state_changed(user_id, self.user_id, flags);
                }
            }

            ServerEvent::Signal {
                kind,
                from_user_id,
                channel_id,
                payload,
            } => {
                if let Some(mesh) = &mut self.mesh {
                    mesh.handle_signal(kind, from_user_id, channel_id, payload)
                        .await;
                }
            }

            ServerEvent::SignalError {
                target_user_id,
                channel_id,
                reason,
                ..
            } => {
                debug!(target_user_id = %target_user_id, reason, "Signaling error");
                if let Some(mesh) = &mut self.mesh {
                    mesh.handle_signal_error(target_user_id, channel_id).await;
                }
            }

            ServerEvent::Typing {
                user_id,
                display_name,
                ..
            } => {
                if user_id != self.user_id {
                    self.store.write().await.note_typing(
                        user_id,
                        display_name,
                        std::time::Instant::now(),
                    );
                }
            }

            _ => {}
        }
    }

    async fn on_tick(&mut self) {
        // Abandon a join whose ack never came.
        let timed_out = self
            .pending
            .as_ref()
            .is_some_and(|p| p.ack_deadline.is_some_and(|d| Instant::now() >= d));
        if timed_out {
            warn!("Join acknowledgement timed out");
            // The server may have processed the join even though the ack
            // never arrived; retract it rather than linger as a ghost.
            if let Some(pending) = self.pending.take() {
                let _ = self
                    .outbound
                    .send(ClientEvent::LeaveVoice {
                        channel_id: pending.channel_id,
                    })
                    .await;
            }
            self.driver.release_media().await;
            self.store.write().await.reset();
            let _ = self.events.send(SessionEvent::JoinFailed {
                reason: "join timed out".to_string(),
            });
        }

        if let Some(mesh) = &mut self.mesh {
            mesh.expire_offers(std::time::Instant::now()).await;
        }
    }

    /// Tear down local state; `notify` distinguishes a user-issued leave
    /// from the cleanup half of a channel hop.
    async fn leave(&mut self, notify: bool) {
        if let Some(pending) = self.pending.take() {
            if let Some(handle) = pending.acquire {
                // Cancel a media prompt still waiting on the user.
                handle.abort();
            }
            if pending.ack_deadline.is_some() {
                // The join request is already on the wire; retract it.
                let _ = self
                    .outbound
                    .send(ClientEvent::LeaveVoice {
                        channel_id: pending.channel_id,
                    })
                    .await;
            }
            self.driver.release_media().await;
        }

        let channel_id = self.mesh.as_ref().map(MeshManager::channel_id);
        if let Some(mut mesh) = self.mesh.take() {
            mesh.teardown().await;
        }
        if let Some(channel_id) = channel_id {
            let _ = self
                .outbound
                .send(ClientEvent::LeaveVoice { channel_id })
                .await;
        }

        let had_state = channel_id.is_some() || self.store.read().await.channel_id.is_some();
        self.store.write().await.reset();
        if notify && had_state {
            let _ = self.events.send(SessionEvent::Left);
        }
    }

    /// Optimistic local flag update plus the server round-trip; the echoed
    /// `VoiceStateChanged` is what makes it authoritative.
    async fn update_flags(&mut self, patch: VoiceStatePatch) {
        let channel_id = {
            let store = self.store.read().await;
            store.channel_id
        };
        let Some(channel_id) = channel_id else {
            return;
        };

        {
            let mut store = self.store.write().await;
            let tentative: VoiceStateFlags = patch.apply(store.local_flags());
            store.set_local_flags(tentative);
        }

        let _ = self
            .outbound
            .send(ClientEvent::VoiceStateUpdate { channel_id, patch })
            .await;
    }

    async fn in_channel(&self, channel_id: Uuid) -> bool {
        self.mesh
            .as_ref()
            .is_some_and(|m| m.channel_id() == channel_id)
            || self.store.read().await.channel_id == Some(channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::driver::DriverError;
    use crate::voice::store::SessionPhase;
    use chorus_common::{Participant, SignalKind};
    use serde_json::Value;

    /// Minimal driver: instant media, scripted failures, no-op transport.
    #[derive(Default)]
    struct StubDriver {
        deny_media: bool,
        /// Never resolve acquisition (a permission prompt left hanging).
        hang_media: bool,
    }

    struct StubLink;

    impl LinkDriver for StubDriver {
        type Link = StubLink;

        async fn acquire_media(&self, _video: bool) -> Result<(), MediaError> {
            if self.hang_media {
                futures::future::pending::<()>().await;
            }
            if self.deny_media {
                return Err(MediaError::PermissionDenied);
            }
            Ok(())
        }

        async fn release_media(&self) {}

        async fn open_link(&self, _remote_user_id: Uuid) -> Result<Self::Link, DriverError> {
            Ok(StubLink)
        }

        async fn create_offer(
            &self,
            _link: &Self::Link,
            _ice_restart: bool,
        ) -> Result<Value, DriverError> {
            Ok(serde_json::json!({"type": "offer", "sdp": "v=0"}))
        }

        async fn create_answer(&self, _link: &Self::Link) -> Result<Value, DriverError> {
            Ok(serde_json::json!({"type": "answer", "sdp": "v=0"}))
        }

        async fn apply_remote_description(
            &self,
            _link: &Self::Link,
            _payload: &Value,
        ) -> Result<(), DriverError> {
            Ok(())
        }

        async fn apply_candidate(
            &self,
            _link: &Self::Link,
            _candidate: &Value,
        ) -> Result<(), DriverError> {
            Ok(())
        }

        async fn set_video_feed(
            &self,
            _link: &Self::Link,
            _feed: crate::voice::driver::VideoFeed,
        ) -> Result<(), DriverError> {
            Ok(())
        }

        async fn close_link(&self, _link: &Self::Link) {}
    }

    struct Fixture {
        user_id: Uuid,
        handle: VoiceSessionHandle,
        outbound_rx: mpsc::Receiver<ClientEvent>,
        server_tx: broadcast::Sender<ServerEvent>,
    }

    fn fixture(driver: StubDriver) -> Fixture {
        let user_id = Uuid::new_v4();
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (server_tx, server_rx) = broadcast::channel(64);
        let (_driver_tx, driver_rx) = mpsc::channel(64);
        let handle = VoiceSession::spawn(
            user_id,
            Arc::new(driver),
            outbound_tx,
            server_rx,
            driver_rx,
        );
        Fixture {
            user_id,
            handle,
            outbound_rx,
            server_tx,
        }
    }

    fn join_command(channel_id: Uuid) -> VoiceCommand {
        VoiceCommand::Join {
            channel_id,
            server_id: Uuid::new_v4(),
            display_name: "tester".to_string(),
            avatar_url: None,
            video: false,
        }
    }

    async fn recv_outbound(rx: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for outbound event")
            .expect("outbound channel closed")
    }

    #[tokio::test]
    async fn join_sends_request_then_offers_to_existing_participants() {
        let mut fx = fixture(StubDriver::default());
        let channel = Uuid::new_v4();
        let remote = Uuid::new_v4();

        fx.handle.command(join_command(channel)).await;

        let event = recv_outbound(&mut fx.outbound_rx).await;
        assert!(matches!(
            event,
            ClientEvent::JoinVoice { channel_id, .. } if channel_id == channel
        ));

        let _ = fx.server_tx.send(ServerEvent::VoiceJoined {
            channel_id: channel,
            existing_participants: vec![Participant {
                user_id: remote,
                connection_id: Uuid::now_v7(),
                display_name: "peer".to_string(),
                avatar_url: None,
                flags: VoiceStateFlags::default(),
            }],
        });

        let event = recv_outbound(&mut fx.outbound_rx).await;
        assert!(matches!(
            event,
            ClientEvent::Signal {
                kind: SignalKind::Offer,
                target_user_id,
                ..
            } if target_user_id == remote
        ));

        let store = fx.handle.store();
        let store = store.read().await;
        assert_eq!(store.phase(), SessionPhase::Joined);
        assert_eq!(store.participants().len(), 1);
    }

    #[tokio::test]
    async fn denied_media_aborts_without_touching_the_server() {
        let mut fx = fixture(StubDriver {
            deny_media: true,
            ..Default::default()
        });
        let mut events = fx.handle.subscribe();

        fx.handle.command(join_command(Uuid::new_v4())).await;

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, SessionEvent::JoinFailed { .. }));

        // No join request ever left the client.
        assert!(fx.outbound_rx.try_recv().is_err());
        assert_eq!(
            fx.handle.store().read().await.phase(),
            SessionPhase::Idle
        );
    }

    #[tokio::test]
    async fn leave_cancels_a_hanging_permission_prompt() {
        let mut fx = fixture(StubDriver {
            hang_media: true,
            ..Default::default()
        });
        let channel = Uuid::new_v4();

        fx.handle.command(join_command(channel)).await;
        fx.handle.command(VoiceCommand::Leave).await;

        // Give the session a moment; nothing may reach the server.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fx.outbound_rx.try_recv().is_err());
        assert_eq!(
            fx.handle.store().read().await.phase(),
            SessionPhase::Idle
        );
    }

    #[tokio::test]
    async fn leave_before_ack_retracts_the_join() {
        let mut fx = fixture(StubDriver::default());
        let channel = Uuid::new_v4();

        fx.handle.command(join_command(channel)).await;
        let _ = recv_outbound(&mut fx.outbound_rx).await; // join_voice

        // The ack has not arrived, but the request is on the wire: the
        // server may already count us as a participant.
        fx.handle.command(VoiceCommand::Leave).await;

        let event = recv_outbound(&mut fx.outbound_rx).await;
        assert!(matches!(
            event,
            ClientEvent::LeaveVoice { channel_id } if channel_id == channel
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_times_the_join_out() {
        let mut fx = fixture(StubDriver::default());
        let mut events = fx.handle.subscribe();

        fx.handle.command(join_command(Uuid::new_v4())).await;
        let _ = recv_outbound(&mut fx.outbound_rx).await; // join_voice

        // No ack ever arrives; paused time fast-forwards past the window.
        let event = tokio::time::timeout(JOIN_ACK_TIMEOUT * 2, events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, SessionEvent::JoinFailed { .. }));
    }

    #[tokio::test]
    async fn deafen_forces_mute_in_the_patch() {
        let mut fx = fixture(StubDriver::default());
        let channel = Uuid::new_v4();

        fx.handle.command(join_command(channel)).await;
        let _ = recv_outbound(&mut fx.outbound_rx).await; // join_voice
        let _ = fx.server_tx.send(ServerEvent::VoiceJoined {
            channel_id: channel,
            existing_participants: vec![],
        });

        fx.handle.command(VoiceCommand::SetDeafened(true)).await;

        let event = recv_outbound(&mut fx.outbound_rx).await;
        match event {
            ClientEvent::VoiceStateUpdate { patch, .. } => {
                assert_eq!(patch.deafened, Some(true));
                assert_eq!(patch.muted, Some(true));
            }
            other => panic!("expected state update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn authoritative_echo_updates_local_flags() {
        let fx = fixture(StubDriver::default());
        let channel = Uuid::new_v4();

        fx.handle.command(join_command(channel)).await;
        let _ = fx.server_tx.send(ServerEvent::VoiceJoined {
            channel_id: channel,
            existing_participants: vec![],
        });

        // Wait until the join lands before feeding the echo.
        for _ in 0..50 {
            if fx.handle.store().read().await.phase() == SessionPhase::Joined {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let _ = fx.server_tx.send(ServerEvent::VoiceStateChanged {
            channel_id: channel,
            user_id: fx.user_id,
            flags: VoiceStateFlags {
                muted: true,
                ..Default::default()
            },
        });

        for _ in 0..50 {
            if fx.handle.store().read().await.local_flags().muted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("echo never applied");
    }

    #[tokio::test]
    async fn participant_left_drops_them_from_the_roster() {
        let mut fx = fixture(StubDriver::default());
        let channel = Uuid::new_v4();
        let remote = Uuid::new_v4();

        fx.handle.command(join_command(channel)).await;
        let _ = recv_outbound(&mut fx.outbound_rx).await;
        let _ = fx.server_tx.send(ServerEvent::VoiceJoined {
            channel_id: channel,
            existing_participants: vec![Participant {
                user_id: remote,
                connection_id: Uuid::now_v7(),
                display_name: "peer".to_string(),
                avatar_url: None,
                flags: VoiceStateFlags::default(),
            }],
        });
        let _ = recv_outbound(&mut fx.outbound_rx).await; // offer

        let _ = fx.server_tx.send(ServerEvent::VoiceParticipantLeft {
            channel_id: channel,
            user_id: remote,
        });

        for _ in 0..50 {
            if fx.handle.store().read().await.participants().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("participant never removed");
    }
}
