//! Peer Link Negotiation State Machine
//!
//! One `PeerLink` per remote participant in the active voice channel. The
//! machine is pure: every input is a [`LinkEvent`], every transition returns
//! the [`LinkEffect`]s the driver must carry out, in order. Nothing here
//! touches the network or the media stack, which keeps the protocol rules
//! (candidate buffering, glare resolution, timeout, teardown races) testable
//! without a transport.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

/// How long an offer may wait for an accepted answer before the link fails.
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Negotiation state of one peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, nothing sent or received yet.
    New,
    /// We sent an offer and are waiting for the answer.
    Offering,
    /// We received an offer and are answering it.
    Answering,
    /// Negotiation completed; media flows.
    Connected,
    /// Negotiation or transport gave up. Terminal until the user rejoins.
    Failed,
    /// Torn down.
    Closed,
}

/// Inputs to the state machine.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Start negotiating as the initiator (we are the newcomer).
    StartOffer,
    /// A relayed offer arrived from the remote side.
    RemoteOffer(Value),
    /// A relayed answer arrived from the remote side.
    RemoteAnswer(Value),
    /// A relayed network-path candidate arrived.
    RemoteCandidate(Value),
    /// The driver finished applying the remote description.
    RemoteDescriptionApplied,
    /// The underlying transport reached its connected state.
    TransportConnected,
    /// The underlying transport reported failure.
    TransportFailed,
    /// The offer window elapsed without an accepted answer.
    NegotiationTimeout,
    /// Local teardown: leave, or the remote participant left.
    Close,
}

/// Side effects the driver must execute, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEffect {
    /// Create the transport if needed, attach local tracks, generate a local
    /// offer, record it, and send it to the target through the relay.
    SendOffer {
        /// Request a network-path restart in the generated offer.
        ice_restart: bool,
    },
    /// Discard the pending local offer by recreating the transport
    /// (the yielding half of glare resolution).
    ResetConnection,
    /// Apply the remote offer as the remote description.
    ApplyRemoteOffer(Value),
    /// Apply the remote answer as the remote description.
    ApplyRemoteAnswer(Value),
    /// Generate an answer for the applied remote offer and send it.
    SendAnswer,
    /// Apply one network-path candidate.
    ApplyCandidate(Value),
    /// Close the transport and release the remote media reference.
    CloseConnection,
}

/// Client-owned record of one remote participant's connection state.
#[derive(Debug)]
pub struct PeerLink {
    local_user_id: Uuid,
    remote_user_id: Uuid,
    state: LinkState,
    /// Candidates that arrived before the remote description was applied,
    /// in arrival order.
    pending_candidates: VecDeque<Value>,
    remote_description_applied: bool,
    /// One best-effort network-path restart per failure episode.
    restart_attempted: bool,
}

impl PeerLink {
    /// Create a link toward `remote_user_id`.
    #[must_use]
    pub fn new(local_user_id: Uuid, remote_user_id: Uuid) -> Self {
        Self {
            local_user_id,
            remote_user_id,
            state: LinkState::New,
            pending_candidates: VecDeque::new(),
            remote_description_applied: false,
            restart_attempted: false,
        }
    }

    /// Current negotiation state.
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// The remote participant this link negotiates with.
    #[must_use]
    pub const fn remote_user_id(&self) -> Uuid {
        self.remote_user_id
    }

    /// True once the link is past any useful work.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.state, LinkState::Failed | LinkState::Closed)
    }

    /// Feed one event through the machine, returning the effects to execute.
    ///
    /// Events arriving after `Closed` or `Failed` are ignored rather than
    /// treated as errors: teardown may race with still-in-flight relay
    /// messages.
    pub fn handle(&mut self, event: LinkEvent) -> Vec<LinkEffect> {
        if self.is_terminal() && !matches!(event, LinkEvent::Close) {
            return Vec::new();
        }

        match event {
            LinkEvent::StartOffer => self.on_start_offer(),
            LinkEvent::RemoteOffer(offer) => self.on_remote_offer(offer),
            LinkEvent::RemoteAnswer(answer) => self.on_remote_answer(answer),
            LinkEvent::RemoteCandidate(candidate) => self.on_remote_candidate(candidate),
            LinkEvent::RemoteDescriptionApplied => self.on_remote_description_applied(),
            LinkEvent::TransportConnected => {
                self.state = LinkState::Connected;
                self.restart_attempted = false;
                Vec::new()
            }
            LinkEvent::TransportFailed => self.on_transport_failed(),
            LinkEvent::NegotiationTimeout => self.on_negotiation_timeout(),
            LinkEvent::Close => self.on_close(),
        }
    }

    fn on_start_offer(&mut self) -> Vec<LinkEffect> {
        match self.state {
            LinkState::New => {
                self.state = LinkState::Offering;
                vec![LinkEffect::SendOffer { ice_restart: false }]
            }
            // Already negotiating; a duplicate start is a no-op.
            _ => Vec::new(),
        }
    }

    fn on_remote_offer(&mut self, offer: Value) -> Vec<LinkEffect> {
        match self.state {
            // Responder path: the first thing this link sees is their offer.
            LinkState::New => {
                self.state = LinkState::Answering;
                vec![LinkEffect::ApplyRemoteOffer(offer)]
            }

            // Glare: both sides offered at the same time. Deterministic
            // tie-break: the smaller user id yields its pending offer and
            // answers; the larger side ignores the incoming offer and lets
            // its own stand.
            LinkState::Offering => {
                if self.local_user_id < self.remote_user_id {
                    self.state = LinkState::Answering;
                    self.remote_description_applied = false;
                    vec![
                        LinkEffect::ResetConnection,
                        LinkEffect::ApplyRemoteOffer(offer),
                    ]
                } else {
                    Vec::new()
                }
            }

            // Renegotiation from an established or answering link: accept
            // the fresh offer and answer again.
            LinkState::Answering | LinkState::Connected => {
                self.state = LinkState::Answering;
                self.remote_description_applied = false;
                vec![LinkEffect::ApplyRemoteOffer(offer)]
            }

            LinkState::Failed | LinkState::Closed => Vec::new(),
        }
    }

    fn on_remote_answer(&mut self, answer: Value) -> Vec<LinkEffect> {
        match self.state {
            LinkState::Offering => vec![LinkEffect::ApplyRemoteAnswer(answer)],
            // An answer to an offer we no longer hold (yielded in glare, or
            // already done) is stale; drop it.
            _ => Vec::new(),
        }
    }

    fn on_remote_candidate(&mut self, candidate: Value) -> Vec<LinkEffect> {
        if self.remote_description_applied {
            vec![LinkEffect::ApplyCandidate(candidate)]
        } else {
            self.pending_candidates.push_back(candidate);
            Vec::new()
        }
    }

    fn on_remote_description_applied(&mut self) -> Vec<LinkEffect> {
        self.remote_description_applied = true;

        // Drain early candidates in arrival order, then (as responder) send
        // the answer for the description we just accepted.
        let mut effects: Vec<LinkEffect> = self
            .pending_candidates
            .drain(..)
            .map(LinkEffect::ApplyCandidate)
            .collect();

        match self.state {
            LinkState::Answering => effects.push(LinkEffect::SendAnswer),
            // Initiator: the accepted answer completes negotiation.
            LinkState::Offering => self.state = LinkState::Connected,
            _ => {}
        }

        effects
    }

    fn on_transport_failed(&mut self) -> Vec<LinkEffect> {
        if self.restart_attempted {
            self.state = LinkState::Failed;
            return Vec::new();
        }

        // Best-effort network-path restart: one fresh offer with the
        // restart flag, then give up for good.
        self.restart_attempted = true;
        self.state = LinkState::Offering;
        self.remote_description_applied = false;
        vec![LinkEffect::SendOffer { ice_restart: true }]
    }

    fn on_negotiation_timeout(&mut self) -> Vec<LinkEffect> {
        match self.state {
            LinkState::Offering => {
                self.state = LinkState::Failed;
                Vec::new()
            }
            // Timer fired after the answer landed; stale.
            _ => Vec::new(),
        }
    }

    fn on_close(&mut self) -> Vec<LinkEffect> {
        let was_closed = self.state == LinkState::Closed;
        self.state = LinkState::Closed;
        self.pending_candidates.clear();
        if was_closed {
            Vec::new()
        } else {
            vec![LinkEffect::CloseConnection]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ordered_ids() -> (Uuid, Uuid) {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    fn candidate(seq: u64) -> Value {
        serde_json::json!({ "candidate": format!("candidate:{seq}") })
    }

    #[test]
    fn initiator_happy_path() {
        let (local, remote) = ordered_ids();
        let mut link = PeerLink::new(local, remote);

        let effects = link.handle(LinkEvent::StartOffer);
        assert_eq!(effects, vec![LinkEffect::SendOffer { ice_restart: false }]);
        assert_eq!(link.state(), LinkState::Offering);

        let answer = serde_json::json!({"type": "answer", "sdp": "v=0"});
        let effects = link.handle(LinkEvent::RemoteAnswer(answer.clone()));
        assert_eq!(effects, vec![LinkEffect::ApplyRemoteAnswer(answer)]);
        assert_eq!(link.state(), LinkState::Offering);

        let effects = link.handle(LinkEvent::RemoteDescriptionApplied);
        assert!(effects.is_empty());
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn responder_happy_path() {
        let (local, remote) = ordered_ids();
        let mut link = PeerLink::new(local, remote);

        let offer = serde_json::json!({"type": "offer", "sdp": "v=0"});
        let effects = link.handle(LinkEvent::RemoteOffer(offer.clone()));
        assert_eq!(effects, vec![LinkEffect::ApplyRemoteOffer(offer)]);
        assert_eq!(link.state(), LinkState::Answering);

        let effects = link.handle(LinkEvent::RemoteDescriptionApplied);
        assert_eq!(effects, vec![LinkEffect::SendAnswer]);

        let effects = link.handle(LinkEvent::TransportConnected);
        assert!(effects.is_empty());
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn candidates_buffer_until_description_applied_then_drain_in_order() {
        let (local, remote) = ordered_ids();
        let mut link = PeerLink::new(local, remote);
        link.handle(LinkEvent::StartOffer);

        // Early candidates: nothing may be applied yet.
        for seq in 0..3 {
            assert!(link.handle(LinkEvent::RemoteCandidate(candidate(seq))).is_empty());
        }

        link.handle(LinkEvent::RemoteAnswer(serde_json::json!({"type": "answer"})));
        let effects = link.handle(LinkEvent::RemoteDescriptionApplied);
        assert_eq!(
            effects,
            vec![
                LinkEffect::ApplyCandidate(candidate(0)),
                LinkEffect::ApplyCandidate(candidate(1)),
                LinkEffect::ApplyCandidate(candidate(2)),
            ]
        );

        // After acceptance, candidates apply immediately.
        let effects = link.handle(LinkEvent::RemoteCandidate(candidate(3)));
        assert_eq!(effects, vec![LinkEffect::ApplyCandidate(candidate(3))]);
    }

    #[test]
    fn glare_smaller_id_yields_and_answers() {
        let (smaller, larger) = ordered_ids();
        let mut link = PeerLink::new(smaller, larger);
        link.handle(LinkEvent::StartOffer);

        let offer = serde_json::json!({"type": "offer", "sdp": "their-offer"});
        let effects = link.handle(LinkEvent::RemoteOffer(offer.clone()));
        assert_eq!(
            effects,
            vec![
                LinkEffect::ResetConnection,
                LinkEffect::ApplyRemoteOffer(offer),
            ]
        );
        assert_eq!(link.state(), LinkState::Answering);
    }

    #[test]
    fn glare_larger_id_ignores_the_incoming_offer() {
        let (smaller, larger) = ordered_ids();
        let mut link = PeerLink::new(larger, smaller);
        link.handle(LinkEvent::StartOffer);

        let effects = link.handle(LinkEvent::RemoteOffer(serde_json::json!({"type": "offer"})));
        assert!(effects.is_empty());
        assert_eq!(link.state(), LinkState::Offering);
    }

    #[test]
    fn glare_resolves_consistently_on_both_sides() {
        let (id_a, id_b) = ordered_ids();
        let mut side_a = PeerLink::new(id_a, id_b);
        let mut side_b = PeerLink::new(id_b, id_a);

        // Truly simultaneous offers.
        side_a.handle(LinkEvent::StartOffer);
        side_b.handle(LinkEvent::StartOffer);

        let offer_a = serde_json::json!({"type": "offer", "sdp": "from-a"});
        let offer_b = serde_json::json!({"type": "offer", "sdp": "from-b"});
        let effects_a = side_a.handle(LinkEvent::RemoteOffer(offer_b));
        let effects_b = side_b.handle(LinkEvent::RemoteOffer(offer_a));

        // Exactly one side yields; the other keeps its pending offer.
        assert_eq!(side_a.state(), LinkState::Answering);
        assert!(effects_a.contains(&LinkEffect::ResetConnection));
        assert_eq!(side_b.state(), LinkState::Offering);
        assert!(effects_b.is_empty());

        // The yielding side's stale answer path: B eventually answers A's
        // accepted offer, A's answer to the discarded offer never comes.
        side_a.handle(LinkEvent::RemoteDescriptionApplied);
        let effects = side_b.handle(LinkEvent::RemoteAnswer(serde_json::json!({"type": "answer"})));
        assert_eq!(effects.len(), 1);
        side_b.handle(LinkEvent::RemoteDescriptionApplied);
        assert_eq!(side_b.state(), LinkState::Connected);
    }

    #[test]
    fn stale_answer_after_yield_is_dropped() {
        let (smaller, larger) = ordered_ids();
        let mut link = PeerLink::new(smaller, larger);
        link.handle(LinkEvent::StartOffer);
        link.handle(LinkEvent::RemoteOffer(serde_json::json!({"type": "offer"})));
        assert_eq!(link.state(), LinkState::Answering);

        // The remote answered our discarded offer before seeing the yield.
        let effects = link.handle(LinkEvent::RemoteAnswer(serde_json::json!({"type": "answer"})));
        assert!(effects.is_empty());
        assert_eq!(link.state(), LinkState::Answering);
    }

    #[test]
    fn negotiation_timeout_fails_a_pending_offer() {
        let (local, remote) = ordered_ids();
        let mut link = PeerLink::new(local, remote);
        link.handle(LinkEvent::StartOffer);

        let effects = link.handle(LinkEvent::NegotiationTimeout);
        assert!(effects.is_empty());
        assert_eq!(link.state(), LinkState::Failed);
    }

    #[test]
    fn timeout_after_connection_is_stale() {
        let (local, remote) = ordered_ids();
        let mut link = PeerLink::new(local, remote);
        link.handle(LinkEvent::StartOffer);
        link.handle(LinkEvent::RemoteAnswer(serde_json::json!({"type": "answer"})));
        link.handle(LinkEvent::RemoteDescriptionApplied);
        assert_eq!(link.state(), LinkState::Connected);

        link.handle(LinkEvent::NegotiationTimeout);
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn transport_failure_restarts_once_then_fails() {
        let (local, remote) = ordered_ids();
        let mut link = PeerLink::new(local, remote);
        link.handle(LinkEvent::StartOffer);
        link.handle(LinkEvent::RemoteAnswer(serde_json::json!({"type": "answer"})));
        link.handle(LinkEvent::RemoteDescriptionApplied);

        let effects = link.handle(LinkEvent::TransportFailed);
        assert_eq!(effects, vec![LinkEffect::SendOffer { ice_restart: true }]);
        assert_eq!(link.state(), LinkState::Offering);

        let effects = link.handle(LinkEvent::TransportFailed);
        assert!(effects.is_empty());
        assert_eq!(link.state(), LinkState::Failed);
    }

    #[test]
    fn reconnecting_allows_a_later_restart() {
        let (local, remote) = ordered_ids();
        let mut link = PeerLink::new(local, remote);
        link.handle(LinkEvent::StartOffer);
        link.handle(LinkEvent::TransportConnected);

        link.handle(LinkEvent::TransportFailed);
        link.handle(LinkEvent::TransportConnected);

        // A later failure episode gets its own restart attempt.
        let effects = link.handle(LinkEvent::TransportFailed);
        assert_eq!(effects, vec![LinkEffect::SendOffer { ice_restart: true }]);
    }

    #[test]
    fn events_after_close_are_ignored() {
        let (local, remote) = ordered_ids();
        let mut link = PeerLink::new(local, remote);
        link.handle(LinkEvent::StartOffer);

        let effects = link.handle(LinkEvent::Close);
        assert_eq!(effects, vec![LinkEffect::CloseConnection]);
        assert_eq!(link.state(), LinkState::Closed);

        // Late relay traffic raced with teardown: no effects, no panic.
        assert!(link.handle(LinkEvent::RemoteCandidate(candidate(9))).is_empty());
        assert!(link
            .handle(LinkEvent::RemoteOffer(serde_json::json!({"type": "offer"})))
            .is_empty());
        assert!(link.handle(LinkEvent::Close).is_empty());
    }

    #[test]
    fn queued_candidates_are_discarded_on_close() {
        let (local, remote) = ordered_ids();
        let mut link = PeerLink::new(local, remote);
        link.handle(LinkEvent::StartOffer);
        link.handle(LinkEvent::RemoteCandidate(candidate(0)));

        link.handle(LinkEvent::Close);

        // Reopening the queue path must not resurrect old candidates: the
        // link is terminal and drops everything.
        assert!(link.handle(LinkEvent::RemoteDescriptionApplied).is_empty());
    }
}
