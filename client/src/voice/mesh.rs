//! Peer Connection Mesh Manager
//!
//! One instance per joined voice channel. Owns a [`PeerLink`] per remote
//! participant, executes the state machine's effects through the transport
//! driver, and uploads outbound signaling through the gateway socket. The
//! newcomer always initiates: on join it starts an offer toward every
//! existing participant, and existing participants only ever answer, which
//! yields exactly one media connection per unordered pair.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chorus_common::{ClientEvent, SignalKind};
use serde_json::Value;
use tracing::{debug, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::driver::{DriverError, DriverEvent, LinkDriver, TransportStatus, VideoFeed};
use super::link::{LinkEffect, LinkEvent, LinkState, PeerLink, NEGOTIATION_TIMEOUT};

/// One remote participant's link and its transport handle.
struct Entry<L> {
    link: PeerLink,
    conn: Option<L>,
    /// Set while an offer is waiting for its answer.
    offer_deadline: Option<Instant>,
}

/// Mesh of peer links for the active voice channel.
pub struct MeshManager<D: LinkDriver> {
    local_user_id: Uuid,
    channel_id: Uuid,
    driver: Arc<D>,
    /// Outbound queue to the gateway socket.
    outbound: mpsc::Sender<ClientEvent>,
    links: HashMap<Uuid, Entry<D::Link>>,
    camera_on: bool,
    screen_sharing: bool,
}

impl<D: LinkDriver> MeshManager<D> {
    /// Create a mesh for one channel.
    pub fn new(
        local_user_id: Uuid,
        channel_id: Uuid,
        driver: Arc<D>,
        outbound: mpsc::Sender<ClientEvent>,
    ) -> Self {
        Self {
            local_user_id,
            channel_id,
            driver,
            outbound,
            links: HashMap::new(),
            camera_on: false,
            screen_sharing: false,
        }
    }

    /// The channel this mesh belongs to.
    #[must_use]
    pub const fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    /// Negotiation state of the link toward a remote, if one exists.
    #[must_use]
    pub fn link_state(&self, remote_user_id: Uuid) -> Option<LinkState> {
        self.links.get(&remote_user_id).map(|e| e.link.state())
    }

    /// Remotes with a live link record.
    #[must_use]
    pub fn remotes(&self) -> Vec<Uuid> {
        self.links.keys().copied().collect()
    }

    /// Transport handle for a remote (the UI pulls remote tracks off it).
    #[must_use]
    pub fn conn(&self, remote_user_id: Uuid) -> Option<&D::Link> {
        self.links.get(&remote_user_id)?.conn.as_ref()
    }

    /// Begin negotiating toward every participant that was already in the
    /// channel when we joined. We are the initiator for each of them.
    pub async fn connect_to_existing(&mut self, existing: &[Uuid]) {
        for &remote in existing {
            if remote == self.local_user_id {
                continue;
            }
            let local_user_id = self.local_user_id;
            self.links.entry(remote).or_insert_with(|| Entry {
                link: PeerLink::new(local_user_id, remote),
                conn: None,
                offer_deadline: None,
            });
            self.process(remote, LinkEvent::StartOffer).await;
        }
    }

    /// Route a relayed negotiation message to its link.
    pub async fn handle_signal(
        &mut self,
        kind: SignalKind,
        from_user_id: Uuid,
        channel_id: Uuid,
        payload: Value,
    ) {
        if channel_id != self.channel_id {
            debug!(channel_id = %channel_id, "Dropping signal for a different channel");
            return;
        }

        match kind {
            SignalKind::Offer => {
                // An offer may open a link we have never seen (responder
                // path); anything else requires an existing link.
                let local_user_id = self.local_user_id;
                self.links.entry(from_user_id).or_insert_with(|| Entry {
                    link: PeerLink::new(local_user_id, from_user_id),
                    conn: None,
                    offer_deadline: None,
                });
                self.process(from_user_id, LinkEvent::RemoteOffer(payload))
                    .await;
            }
            SignalKind::Answer => {
                if self.links.contains_key(&from_user_id) {
                    self.process(from_user_id, LinkEvent::RemoteAnswer(payload))
                        .await;
                } else {
                    debug!(from_user_id = %from_user_id, "Answer for unknown link dropped");
                }
            }
            SignalKind::Candidate => {
                // Teardown may race a still-in-flight candidate; without a
                // link there is nothing to apply it to.
                if self.links.contains_key(&from_user_id) {
                    self.process(from_user_id, LinkEvent::RemoteCandidate(payload))
                        .await;
                } else {
                    debug!(from_user_id = %from_user_id, "Candidate for unknown link dropped");
                }
            }
        }
    }

    /// The relay reported our target missing from the channel: fail the
    /// pending negotiation immediately instead of waiting out the timer.
    pub async fn handle_signal_error(&mut self, target_user_id: Uuid, channel_id: Uuid) {
        if channel_id != self.channel_id {
            return;
        }
        if self.links.contains_key(&target_user_id) {
            self.process(target_user_id, LinkEvent::NegotiationTimeout)
                .await;
        }
    }

    /// A participant left: destroy their link and release the remote media.
    pub async fn handle_participant_left(&mut self, user_id: Uuid) {
        if self.links.contains_key(&user_id) {
            self.process(user_id, LinkEvent::Close).await;
        }
    }

    /// Consume one event from the transport driver.
    pub async fn handle_driver_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::LocalCandidate {
                remote_user_id,
                candidate,
            } => {
                let live = self
                    .links
                    .get(&remote_user_id)
                    .is_some_and(|e| !e.link.is_terminal());
                if live {
                    let _ = self
                        .outbound
                        .send(ClientEvent::Signal {
                            kind: SignalKind::Candidate,
                            target_user_id: remote_user_id,
                            channel_id: self.channel_id,
                            payload: candidate,
                        })
                        .await;
                }
            }
            DriverEvent::Transport {
                remote_user_id,
                status,
            } => {
                let event = match status {
                    TransportStatus::Connected => LinkEvent::TransportConnected,
                    TransportStatus::Failed => LinkEvent::TransportFailed,
                };
                if self.links.contains_key(&remote_user_id) {
                    self.process(remote_user_id, event).await;
                }
            }
            DriverEvent::RemoteTrack { remote_user_id } => {
                debug!(remote_user_id = %remote_user_id, "Remote track ready");
            }
        }
    }

    /// Fail any offer that has outlived the negotiation window.
    pub async fn expire_offers(&mut self, now: Instant) {
        let overdue: Vec<Uuid> = self
            .links
            .iter()
            .filter(|(_, e)| e.offer_deadline.is_some_and(|deadline| deadline <= now))
            .map(|(remote, _)| *remote)
            .collect();

        for remote in overdue {
            warn!(remote_user_id = %remote, "Negotiation timed out");
            self.process(remote, LinkEvent::NegotiationTimeout).await;
        }
    }

    /// Toggle the webcam. While a screen share is active the camera state is
    /// only recorded; the share keeps the video sender.
    pub async fn set_camera(&mut self, on: bool) {
        self.camera_on = on;
        if !self.screen_sharing {
            self.apply_feed().await;
        }
    }

    /// Toggle screen sharing. Takes precedence over the camera while active;
    /// ending it restores the camera if that was on.
    pub async fn set_screen_share(&mut self, on: bool) {
        self.screen_sharing = on;
        self.apply_feed().await;
    }

    /// Tear down every link and stop local media.
    pub async fn teardown(&mut self) {
        let remotes: Vec<Uuid> = self.links.keys().copied().collect();
        for remote in remotes {
            self.process(remote, LinkEvent::Close).await;
        }
        self.links.clear();
        self.driver.release_media().await;
    }

    fn current_feed(&self) -> VideoFeed {
        if self.screen_sharing {
            VideoFeed::Screen
        } else if self.camera_on {
            VideoFeed::Camera
        } else {
            VideoFeed::None
        }
    }

    /// Swap the outgoing video track on every link's sender.
    async fn apply_feed(&mut self) {
        let feed = self.current_feed();
        let driver = self.driver.clone();
        for (remote, entry) in &self.links {
            if let Some(conn) = entry.conn.as_ref() {
                if let Err(e) = driver.set_video_feed(conn, feed).await {
                    warn!(remote_user_id = %remote, error = %e, "Failed to switch video feed");
                }
            }
        }
    }

    /// Run one event through a link's state machine and execute the
    /// resulting effects. Effects can feed follow-up events (a successfully
    /// applied description, a failure) back into the machine.
    async fn process(&mut self, remote: Uuid, event: LinkEvent) {
        let mut queue = VecDeque::new();
        queue.push_back(event);

        while let Some(event) = queue.pop_front() {
            let effects = match self.links.get_mut(&remote) {
                Some(entry) => entry.link.handle(event),
                None => return,
            };

            for effect in effects {
                if let Err(e) = self.execute(remote, effect, &mut queue).await {
                    warn!(remote_user_id = %remote, error = %e, "Link effect failed");
                    queue.push_back(LinkEvent::TransportFailed);
                }
            }
        }

        if let Some(entry) = self.links.get_mut(&remote) {
            if entry.link.state() != LinkState::Offering {
                entry.offer_deadline = None;
            }
            if entry.link.state() == LinkState::Closed {
                self.links.remove(&remote);
            }
        }
    }

    async fn execute(
        &mut self,
        remote: Uuid,
        effect: LinkEffect,
        queue: &mut VecDeque<LinkEvent>,
    ) -> Result<(), DriverError> {
        let driver = self.driver.clone();

        match effect {
            LinkEffect::SendOffer { ice_restart } => {
                self.ensure_conn(remote).await?;
                let payload = {
                    let Some(conn) = self.links.get(&remote).and_then(|e| e.conn.as_ref()) else {
                        return Ok(());
                    };
                    driver.create_offer(conn, ice_restart).await?
                };
                let _ = self
                    .outbound
                    .send(ClientEvent::Signal {
                        kind: SignalKind::Offer,
                        target_user_id: remote,
                        channel_id: self.channel_id,
                        payload,
                    })
                    .await;
                if let Some(entry) = self.links.get_mut(&remote) {
                    entry.offer_deadline = Some(Instant::now() + NEGOTIATION_TIMEOUT);
                }
            }

            LinkEffect::ResetConnection => {
                if let Some(conn) = self.links.get_mut(&remote).and_then(|e| e.conn.take()) {
                    driver.close_link(&conn).await;
                }
                self.ensure_conn(remote).await?;
            }

            LinkEffect::ApplyRemoteOffer(payload) => {
                self.ensure_conn(remote).await?;
                let Some(conn) = self.links.get(&remote).and_then(|e| e.conn.as_ref()) else {
                    return Ok(());
                };
                driver.apply_remote_description(conn, &payload).await?;
                queue.push_back(LinkEvent::RemoteDescriptionApplied);
            }

            LinkEffect::ApplyRemoteAnswer(payload) => {
                let Some(conn) = self.links.get(&remote).and_then(|e| e.conn.as_ref()) else {
                    return Ok(());
                };
                driver.apply_remote_description(conn, &payload).await?;
                queue.push_back(LinkEvent::RemoteDescriptionApplied);
            }

            LinkEffect::SendAnswer => {
                let payload = {
                    let Some(conn) = self.links.get(&remote).and_then(|e| e.conn.as_ref()) else {
                        return Ok(());
                    };
                    driver.create_answer(conn).await?
                };
                let _ = self
                    .outbound
                    .send(ClientEvent::Signal {
                        kind: SignalKind::Answer,
                        target_user_id: remote,
                        channel_id: self.channel_id,
                        payload,
                    })
                    .await;
            }

            LinkEffect::ApplyCandidate(candidate) => {
                let Some(conn) = self.links.get(&remote).and_then(|e| e.conn.as_ref()) else {
                    return Ok(());
                };
                // A rejected candidate is not fatal; the next one may land.
                if let Err(e) = driver.apply_candidate(conn, &candidate).await {
                    warn!(remote_user_id = %remote, error = %e, "Failed to apply candidate");
                }
            }

            LinkEffect::CloseConnection => {
                if let Some(conn) = self.links.get_mut(&remote).and_then(|e| e.conn.take()) {
                    driver.close_link(&conn).await;
                }
            }
        }

        Ok(())
    }

    /// Open the transport for a link when it has none, attaching the active
    /// video feed to the fresh connection.
    async fn ensure_conn(&mut self, remote: Uuid) -> Result<(), DriverError> {
        let needs = self
            .links
            .get(&remote)
            .is_some_and(|entry| entry.conn.is_none());
        if !needs {
            return Ok(());
        }

        let driver = self.driver.clone();
        let conn = driver.open_link(remote).await?;
        let feed = self.current_feed();
        if feed != VideoFeed::None {
            driver.set_video_feed(&conn, feed).await?;
        }
        if let Some(entry) = self.links.get_mut(&remote) {
            entry.conn = Some(conn);
        }
        Ok(())
    }
}
