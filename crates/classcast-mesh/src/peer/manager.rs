//! Owns every peer link of one session.
//!
//! All mutation happens through `&mut self`, so the orchestrator's single
//! task is the only writer. Link-local failures never escape as errors:
//! the link is closed and a `LinkIntent::Reconnect` is queued for the
//! orchestrator to act on.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use classcast_common::{MeshError, ParticipantId, SessionId};
use classcast_config::schema::IceServerConfig;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::MeshConfig;
use crate::media::{LocalTrack, MediaStreamHandle};
use crate::protocol::{ClientMessage, IceCandidate, SdpKind, SessionDescription};
use crate::signaling::SignalingChannel;

use super::backend::{
    LinkId, LinkState, PeerConnectionFactory, PeerEvent, PeerEventKind, PeerEventSink,
};
use super::link::PeerLink;
use super::negotiation::{OfferDecision, Renegotiation};
use super::PeerRole;

/// Why a link was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFailure {
    NegotiationTimeout,
    IceFailed,
    /// The backend closed the connection on its own.
    Closed,
    Backend(String),
}

impl fmt::Display for LinkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegotiationTimeout => write!(f, "negotiation timed out"),
            Self::IceFailed => write!(f, "ICE failed"),
            Self::Closed => write!(f, "connection closed"),
            Self::Backend(reason) => write!(f, "backend error: {reason}"),
        }
    }
}

/// Something the orchestrator must act on.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkIntent {
    /// The link was closed after a failure.
    Reconnect {
        remote_id: ParticipantId,
        role: PeerRole,
        failure: LinkFailure,
    },
    /// Media is flowing.
    Established { remote_id: ParticipantId },
    RemoteStream {
        remote_id: ParticipantId,
        stream: MediaStreamHandle,
    },
}

pub struct PeerConnectionManager {
    factory: Arc<dyn PeerConnectionFactory>,
    signaling: Arc<dyn SignalingChannel>,
    ice_servers: Vec<IceServerConfig>,
    negotiation_timeout: Duration,
    links: BTreeMap<ParticipantId, PeerLink>,
    /// Tracks every new link starts with.
    local_tracks: BTreeMap<String, LocalTrack>,
    session_id: Option<SessionId>,
    /// Our own id and the session's teacher, used to rank the two ends of
    /// a pair when both offer at once.
    self_id: Option<ParticipantId>,
    teacher_id: Option<ParticipantId>,
    next_link_id: u64,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    intents: Vec<LinkIntent>,
    suspended: bool,
}

impl PeerConnectionManager {
    /// Returns the manager and the receiver its connections report into.
    pub fn new(
        factory: Arc<dyn PeerConnectionFactory>,
        signaling: Arc<dyn SignalingChannel>,
        config: &MeshConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            factory,
            signaling,
            ice_servers: config.ice_servers.clone(),
            negotiation_timeout: config.negotiation_timeout,
            links: BTreeMap::new(),
            local_tracks: BTreeMap::new(),
            session_id: None,
            self_id: None,
            teacher_id: None,
            next_link_id: 0,
            events_tx,
            intents: Vec::new(),
            suspended: false,
        };
        (manager, events_rx)
    }

    pub fn set_session(&mut self, session_id: Option<SessionId>) {
        self.session_id = session_id;
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Record who we are and who teaches. Applies to links created from now
    /// on.
    pub fn set_identity(
        &mut self,
        self_id: Option<ParticipantId>,
        teacher_id: Option<ParticipantId>,
    ) {
        self.self_id = self_id;
        self.teacher_id = teacher_id;
    }

    /// Whether our end of the link to `remote_id` gives way on glare.
    ///
    /// The teacher outranks every student; between students the lower id
    /// keeps its offer. Both ends compute the same answer from the same
    /// ids. Without an identity the responder yields.
    fn yields_on_glare(&self, remote_id: &ParticipantId, role: PeerRole) -> bool {
        let Some(self_id) = &self.self_id else {
            return role == PeerRole::Responder;
        };
        match &self.teacher_id {
            Some(teacher) if teacher == self_id => false,
            Some(teacher) if teacher == remote_id => true,
            _ => self_id > remote_id,
        }
    }

    // -----------------------------------------------------------------------
    // Link lifecycle
    // -----------------------------------------------------------------------

    /// Create a link to `remote_id` unless one exists.
    ///
    /// Returns the link's role, which is fixed at first creation. A new
    /// initiator link sends its first offer right away.
    pub async fn ensure_link(
        &mut self,
        remote_id: &ParticipantId,
        role: PeerRole,
    ) -> Result<PeerRole, MeshError> {
        if let Some(link) = self.links.get(remote_id) {
            if link.role != role {
                debug!(
                    remote_id = %remote_id,
                    existing = %link.role,
                    requested = %role,
                    "Link exists, keeping its role"
                );
            }
            return Ok(link.role);
        }

        self.next_link_id += 1;
        let link_id = LinkId(self.next_link_id);
        let sink = PeerEventSink::new(link_id, remote_id.clone(), self.events_tx.clone());
        let connection = self
            .factory
            .create(remote_id, &self.ice_servers, sink)
            .await?;

        let yields = self.yields_on_glare(remote_id, role);
        let mut link = PeerLink::new(
            link_id,
            remote_id.clone(),
            role,
            connection,
            self.local_tracks.clone(),
            yields,
            Instant::now(),
        );
        if role == PeerRole::Initiator {
            link.negotiation.request(Renegotiation::tracks_changed());
        }
        self.links.insert(remote_id.clone(), link);
        info!(
            remote_id = %remote_id,
            link_id = %link_id,
            role = %role,
            tracks = self.local_tracks.len(),
            "Peer link created"
        );

        self.negotiate(remote_id).await;
        Ok(role)
    }

    /// Release a link. Returns `false` if there was none.
    pub async fn close_link(&mut self, remote_id: &ParticipantId) -> bool {
        match self.links.remove(remote_id) {
            Some(link) => {
                link.connection.close().await;
                info!(
                    remote_id = %remote_id,
                    link_id = %link.link_id,
                    state = ?link.negotiation.state(),
                    "Peer link closed"
                );
                true
            }
            None => false,
        }
    }

    /// Close every link and drop queued intents. Used on leave.
    pub async fn close_all(&mut self) {
        let links = std::mem::take(&mut self.links);
        let count = links.len();
        for (_, link) in links {
            link.connection.close().await;
        }
        self.intents.clear();
        if count > 0 {
            info!(count, "Closed all peer links");
        }
    }

    // -----------------------------------------------------------------------
    // Local tracks
    // -----------------------------------------------------------------------

    /// Add a track to every link. Initiator links renegotiate; responder
    /// links stage it for their next answer.
    pub async fn attach_local_track(&mut self, track: LocalTrack) {
        info!(
            track_id = %track.id,
            kind = ?track.kind,
            links = self.links.len(),
            "Attaching local track"
        );
        self.local_tracks.insert(track.id.clone(), track.clone());
        for remote_id in self.link_ids() {
            if let Some(link) = self.links.get_mut(&remote_id) {
                link.stage_track(track.clone());
            }
            self.after_track_change(&remote_id).await;
        }
    }

    /// Remove a track from every link. Returns `false` if it was not attached.
    pub async fn detach_local_track(&mut self, track_id: &str) -> bool {
        if self.local_tracks.remove(track_id).is_none() {
            return false;
        }
        info!(track_id, links = self.links.len(), "Detaching local track");
        for remote_id in self.link_ids() {
            if let Some(link) = self.links.get_mut(&remote_id) {
                link.unstage_track(track_id);
            }
            self.after_track_change(&remote_id).await;
        }
        true
    }

    async fn after_track_change(&mut self, remote_id: &ParticipantId) {
        let Some(link) = self.links.get_mut(remote_id) else {
            return;
        };
        match link.role {
            PeerRole::Initiator => {
                link.negotiation.request(Renegotiation::tracks_changed());
                self.negotiate(remote_id).await;
            }
            PeerRole::Responder => {
                debug!(remote_id = %remote_id, "Track change staged until the next remote offer");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Remote negotiation input
    // -----------------------------------------------------------------------

    pub async fn handle_remote_description(
        &mut self,
        remote_id: &ParticipantId,
        description: SessionDescription,
    ) -> Result<(), MeshError> {
        match description.kind {
            SdpKind::Offer => self.handle_remote_offer(remote_id, description).await,
            SdpKind::Answer => self.handle_remote_answer(remote_id, description).await,
        }
    }

    async fn handle_remote_offer(
        &mut self,
        remote_id: &ParticipantId,
        offer: SessionDescription,
    ) -> Result<(), MeshError> {
        let session_id = self.session_id.clone().ok_or(MeshError::NotInSession)?;
        if !self.links.contains_key(remote_id) {
            self.ensure_link(remote_id, PeerRole::Responder).await?;
        }
        let Some(link) = self.links.get_mut(remote_id) else {
            return Ok(());
        };

        match link.negotiation.remote_offer(Instant::now())? {
            OfferDecision::Ignore => {
                debug!(remote_id = %remote_id, role = %link.role, "Glare: keeping our offer, remote yields");
                return Ok(());
            }
            OfferDecision::AcceptAfterRollback => {
                info!(remote_id = %remote_id, role = %link.role, "Glare: yielding to remote offer");
                if let Err(e) = link.connection.rollback().await {
                    self.fail_link(remote_id, LinkFailure::Backend(e.to_string()))
                        .await;
                    return Ok(());
                }
            }
            OfferDecision::Accept => {}
        }

        let answer = match link.answer_offer(offer).await {
            Ok(answer) => answer,
            Err(e) => {
                self.fail_link(remote_id, LinkFailure::Backend(e.to_string()))
                    .await;
                return Ok(());
            }
        };
        link.negotiation.local_answer_sent(Instant::now())?;

        let message = ClientMessage::Answer {
            target_id: remote_id.clone(),
            session_id,
            description: answer,
        };
        match self.signaling.send(message).await {
            Ok(()) => debug!(remote_id = %remote_id, "Answer sent"),
            Err(e) => warn!(remote_id = %remote_id, error = %e, "Answer not sent"),
        }

        self.negotiate(remote_id).await;
        Ok(())
    }

    async fn handle_remote_answer(
        &mut self,
        remote_id: &ParticipantId,
        answer: SessionDescription,
    ) -> Result<(), MeshError> {
        let Some(link) = self.links.get_mut(remote_id) else {
            return Err(MeshError::UnknownRemoteParticipant(remote_id.clone()));
        };
        link.negotiation.remote_answer(Instant::now())?;
        if let Err(e) = link.apply_remote_description(answer).await {
            self.fail_link(remote_id, LinkFailure::Backend(e.to_string()))
                .await;
            return Ok(());
        }
        debug!(remote_id = %remote_id, "Answer applied, link stable");

        self.negotiate(remote_id).await;
        Ok(())
    }

    /// Apply a remote candidate, or buffer it until a remote description
    /// exists.
    pub async fn handle_remote_candidate(
        &mut self,
        remote_id: &ParticipantId,
        candidate: IceCandidate,
    ) -> Result<(), MeshError> {
        let Some(link) = self.links.get_mut(remote_id) else {
            return Err(MeshError::UnknownRemoteParticipant(remote_id.clone()));
        };
        if !link.remote_description_set {
            link.pending_candidates.push(candidate);
            trace!(
                remote_id = %remote_id,
                buffered = link.pending_candidates.len(),
                "Candidate buffered"
            );
            return Ok(());
        }
        if let Err(e) = link.connection.add_ice_candidate(candidate).await {
            warn!(remote_id = %remote_id, error = %e, "Remote candidate rejected");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Backend events and timers
    // -----------------------------------------------------------------------

    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        let PeerEvent {
            link_id,
            remote_id,
            kind,
        } = event;
        let Some(link) = self.links.get_mut(&remote_id) else {
            trace!(remote_id = %remote_id, link_id = %link_id, "Event for closed link ignored");
            return;
        };
        if link.link_id != link_id {
            debug!(
                remote_id = %remote_id,
                stale = %link_id,
                current = %link.link_id,
                "Event from replaced connection ignored"
            );
            return;
        }

        match kind {
            PeerEventKind::LocalCandidate(candidate) => {
                let Some(session_id) = self.session_id.clone() else {
                    return;
                };
                let message = ClientMessage::Candidate {
                    target_id: remote_id.clone(),
                    session_id,
                    candidate,
                };
                if let Err(e) = self.signaling.send(message).await {
                    trace!(remote_id = %remote_id, error = %e, "Local candidate not sent");
                }
            }
            PeerEventKind::StateChanged(state) => {
                let previous = std::mem::replace(&mut link.link_state, state);
                if previous == state {
                    return;
                }
                debug!(remote_id = %remote_id, ?previous, ?state, "Link state changed");
                match state {
                    LinkState::Connected => {
                        info!(remote_id = %remote_id, "Peer link connected");
                        self.intents.push(LinkIntent::Established { remote_id });
                    }
                    LinkState::Disconnected => {
                        info!(remote_id = %remote_id, "Peer link disconnected, restarting ICE");
                        link.negotiation.request(Renegotiation::ice_restart());
                        self.negotiate(&remote_id).await;
                    }
                    LinkState::Failed => self.fail_link(&remote_id, LinkFailure::IceFailed).await,
                    LinkState::Closed => self.fail_link(&remote_id, LinkFailure::Closed).await,
                    LinkState::New | LinkState::Connecting => {}
                }
            }
            PeerEventKind::RemoteStream(stream) => {
                info!(
                    remote_id = %remote_id,
                    stream_id = %stream.id,
                    tracks = stream.tracks.len(),
                    "Remote stream attached"
                );
                self.intents
                    .push(LinkIntent::RemoteStream { remote_id, stream });
            }
        }
    }

    /// Close links whose negotiation has waited past the timeout. Returns
    /// how many were closed.
    pub async fn sweep(&mut self, now: Instant) -> usize {
        if self.suspended {
            return 0;
        }
        let timeout = self.negotiation_timeout;
        let stalled: Vec<ParticipantId> = self
            .links
            .values()
            .filter(|link| link.negotiation.is_stalled(now, timeout))
            .map(|link| link.remote_id.clone())
            .collect();
        for remote_id in &stalled {
            warn!(
                remote_id = %remote_id,
                timeout_secs = timeout.as_secs(),
                "Negotiation stalled"
            );
            self.fail_link(remote_id, LinkFailure::NegotiationTimeout)
                .await;
        }
        stalled.len()
    }

    /// Stop sending offers and pause stall timers while signaling is down.
    pub fn suspend(&mut self) {
        if !self.suspended {
            self.suspended = true;
            info!(links = self.links.len(), "Peer links suspended");
        }
    }

    /// Undo `suspend`: restart stall timers and send any queued offers.
    pub async fn resume(&mut self) {
        if !self.suspended {
            return;
        }
        self.suspended = false;
        let now = Instant::now();
        for link in self.links.values_mut() {
            link.negotiation.reset_timer(now);
        }
        for remote_id in self.link_ids() {
            self.negotiate(&remote_id).await;
        }
        info!(links = self.links.len(), "Peer links resumed");
    }

    /// Drain the intents queued since the last call.
    pub fn take_intents(&mut self) -> Vec<LinkIntent> {
        std::mem::take(&mut self.intents)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn link(&self, remote_id: &ParticipantId) -> Option<&PeerLink> {
        self.links.get(remote_id)
    }

    pub fn links(&self) -> impl Iterator<Item = &PeerLink> {
        self.links.values()
    }

    pub fn link_ids(&self) -> Vec<ParticipantId> {
        self.links.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn local_track_ids(&self) -> Vec<&str> {
        self.local_tracks.keys().map(String::as_str).collect()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Send an offer for the link's pending request, if it has one and is
    /// free to act on it.
    async fn negotiate(&mut self, remote_id: &ParticipantId) {
        if self.suspended {
            return;
        }
        let Some(session_id) = self.session_id.clone() else {
            return;
        };
        let Some(link) = self.links.get_mut(remote_id) else {
            return;
        };
        let Some(request) = link.negotiation.take_ready() else {
            return;
        };

        let offer = match link.make_offer(request.ice_restart).await {
            Ok(offer) => offer,
            Err(e) => {
                self.fail_link(remote_id, LinkFailure::Backend(e.to_string()))
                    .await;
                return;
            }
        };
        if let Err(e) = link.negotiation.local_offer_sent(request, Instant::now()) {
            warn!(remote_id = %remote_id, error = %e, "Offer built in unexpected state");
            return;
        }
        let link_id = link.link_id;
        let tracks = link.attached_track_ids().len();

        let message = ClientMessage::Offer {
            target_id: remote_id.clone(),
            session_id,
            description: offer,
        };
        if let Err(e) = self.signaling.send(message).await {
            debug!(remote_id = %remote_id, error = %e, "Offer not sent, re-queued");
            if let Some(link) = self.links.get_mut(remote_id) {
                if let Err(e) = link.connection.rollback().await {
                    warn!(remote_id = %remote_id, error = %e, "Rollback failed");
                }
                if let Err(e) = link.negotiation.abort_local_offer(Instant::now()) {
                    warn!(remote_id = %remote_id, error = %e, "Offer abort refused");
                }
            }
            return;
        }
        info!(
            remote_id = %remote_id,
            link_id = %link_id,
            ice_restart = request.ice_restart,
            tracks,
            "Offer sent"
        );
    }

    async fn fail_link(&mut self, remote_id: &ParticipantId, failure: LinkFailure) {
        let Some(link) = self.links.remove(remote_id) else {
            return;
        };
        warn!(
            remote_id = %remote_id,
            link_id = %link.link_id,
            role = %link.role,
            failure = %failure,
            "Peer link failed, closing"
        );
        link.connection.close().await;
        self.intents.push(LinkIntent::Reconnect {
            remote_id: remote_id.clone(),
            role: link.role,
            failure,
        });
    }
}
