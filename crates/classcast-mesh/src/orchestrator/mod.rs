//! The per-client session actor.
//!
//! One task owns membership, peer links, capture and the message log.
//! Signaling events, backend events, UI commands and the sweep timer are
//! all serialized through `run`, so no state is shared between tasks.

mod handle;
mod types;


use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use classcast_common::{MeshError, Notification, ParticipantId, SessionId};
use classcast_config::ClasscastConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::capture::{LocalCaptureState, MediaCaptureSource, ScreenCapture};
use crate::config::MeshConfig;
use crate::membership::{JoinOutcome, Participant, SessionMembershipTracker};
use crate::messages::MessageLog;
use crate::peer::{
    LinkIntent, PeerConnectionFactory, PeerConnectionManager, PeerEvent, PeerRole,
};
use crate::protocol::{
    ClientMessage, IceCandidate, MessageKind, MessagePayload, ParticipantInfo, Role, SdpKind,
    ServerMessage, SessionDescription,
};
use crate::signaling::{SignalingChannel, SignalingClient, SignalingEvent};

pub use handle::SessionHandle;
pub use types::{JoinRequest, SessionCommand, SessionEvent, SessionPhase};

pub struct SessionOrchestrator {
    config: MeshConfig,
    request: JoinRequest,
    signaling: Arc<dyn SignalingChannel>,
    membership: SessionMembershipTracker,
    peers: PeerConnectionManager,
    peer_events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    capture: ScreenCapture,
    messages: MessageLog,
    phase: SessionPhase,
    session_id: Option<SessionId>,
    self_id: Option<ParticipantId>,
    signaling_up: bool,
    /// Consecutive rebuilds of a failing initiator link.
    retry_attempts: HashMap<ParticipantId, u32>,
    retry_due: BTreeMap<ParticipantId, Instant>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionOrchestrator {
    pub fn new(
        request: JoinRequest,
        config: MeshConfig,
        signaling: Arc<dyn SignalingChannel>,
        factory: Arc<dyn PeerConnectionFactory>,
        capture: Arc<dyn MediaCaptureSource>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (peers, peer_events) =
            PeerConnectionManager::new(factory, Arc::clone(&signaling), &config);
        let orchestrator = Self {
            capture: ScreenCapture::new(capture, config.share_quality, config.capture_audio),
            messages: MessageLog::new(config.max_history, config.max_message_length),
            config,
            request,
            signaling,
            membership: SessionMembershipTracker::new(),
            peers,
            peer_events: Some(peer_events),
            phase: SessionPhase::Idle,
            session_id: None,
            self_id: None,
            signaling_up: false,
            retry_attempts: HashMap::new(),
            retry_due: BTreeMap::new(),
            event_tx,
        };
        (orchestrator, event_rx)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn self_id(&self) -> Option<&ParticipantId> {
        self.self_id.as_ref()
    }

    pub fn role(&self) -> Role {
        self.request.role
    }

    pub fn membership(&self) -> &SessionMembershipTracker {
        &self.membership
    }

    pub fn peers(&self) -> &PeerConnectionManager {
        &self.peers
    }

    pub fn capture_state(&self) -> &LocalCaptureState {
        self.capture.state()
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    pub fn is_signaling_up(&self) -> bool {
        self.signaling_up
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    /// Drive the session until it ends.
    pub async fn run(
        mut self,
        mut signaling_rx: mpsc::Receiver<SignalingEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) {
        let Some(mut peer_events) = self.peer_events.take() else {
            warn!("Session orchestrator started twice");
            return;
        };
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = signaling_rx.recv() => match event {
                    Some(event) => self.handle_signaling_event(event).await,
                    None => {
                        info!("Signaling transport stopped");
                        self.leave().await;
                    }
                },
                Some(event) = peer_events.recv() => self.handle_peer_event(event).await,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("Every session handle dropped");
                        self.leave().await;
                    }
                },
                _ = sweep.tick() => self.tick(Instant::now()).await,
            }
            if self.phase == SessionPhase::Ended {
                break;
            }
        }

        self.signaling.close().await;
        debug!("Session orchestrator stopped");
    }

    /// Feed queued backend events without the run loop.
    #[cfg(test)]
    pub(crate) async fn pump_peer_events(&mut self) -> usize {
        let mut events = Vec::new();
        if let Some(rx) = self.peer_events.as_mut() {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        let count = events.len();
        for event in events {
            self.handle_peer_event(event).await;
        }
        count
    }

    // -----------------------------------------------------------------------
    // Signaling
    // -----------------------------------------------------------------------

    pub async fn handle_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected => self.on_signaling_connected().await,
            SignalingEvent::Disconnected { reason } => self.on_signaling_lost(reason),
            SignalingEvent::Message(message) => self.handle_server_message(message).await,
        }
    }

    /// Send join-session. A teacher without a code gets a fresh one; a
    /// student must supply one.
    pub async fn join(&mut self) -> Result<(), MeshError> {
        let session_id = match (&self.request.session_id, self.request.role) {
            (Some(id), _) => id.clone(),
            (None, Role::Teacher) => {
                let id = SessionId::generate();
                self.request.session_id = Some(id.clone());
                id
            }
            (None, Role::Student) => {
                let err = MeshError::InvalidSessionId("a student must enter a session code".into());
                warn!(error = %err, "Cannot join");
                self.phase = SessionPhase::Ended;
                self.emit(SessionEvent::JoinFailed {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        self.signaling
            .send(ClientMessage::JoinSession {
                session_id: session_id.clone(),
                role: self.request.role,
                display_name: self.request.display_name.clone(),
                credentials: self.request.credentials.clone(),
            })
            .await?;
        self.phase = SessionPhase::Joining;
        info!(session_id = %session_id, role = %self.request.role, "Joining session");
        Ok(())
    }

    async fn on_signaling_connected(&mut self) {
        if self.signaling_up {
            return;
        }
        self.signaling_up = true;
        match self.phase {
            SessionPhase::Idle => {
                if let Err(e) = self.join().await {
                    warn!(error = %e, "Join not sent");
                }
            }
            SessionPhase::Joining | SessionPhase::Joined => {
                info!("Signaling restored, rejoining session");
                self.emit(SessionEvent::SignalingRestored);
                self.rejoin().await;
            }
            SessionPhase::Ended => {}
        }
    }

    fn on_signaling_lost(&mut self, reason: String) {
        if !self.signaling_up {
            debug!(reason = %reason, "Signaling still unavailable");
            return;
        }
        self.signaling_up = false;
        self.peers.suspend();
        warn!(reason = %reason, "Signaling lost");
        if matches!(self.phase, SessionPhase::Joining | SessionPhase::Joined) {
            self.emit(SessionEvent::SignalingLost);
        }
    }

    /// The relay assigned us a new identity when the socket dropped, so
    /// every link and all membership is stale. Start over in the same
    /// session.
    async fn rejoin(&mut self) {
        self.peers.close_all().await;
        self.peers.set_session(None);
        self.peers.set_identity(None, None);
        self.peers.resume().await;
        self.membership.clear();
        self.clear_retries();
        self.self_id = None;
        if let Err(e) = self.join().await {
            warn!(error = %e, "Rejoin not sent");
        }
    }

    pub async fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::SessionCreated { session_id } => {
                info!(session_id = %session_id, "Session created");
                self.emit(SessionEvent::SessionCreated { session_id });
            }
            ServerMessage::JoinSuccess {
                session_id,
                self_id,
                participants,
            } => {
                self.on_join_success(session_id, self_id, participants)
                    .await
            }
            ServerMessage::JoinFailed { reason } => {
                warn!(reason = %reason, "Join rejected");
                self.phase = SessionPhase::Ended;
                self.emit(SessionEvent::JoinFailed { reason });
            }
            ServerMessage::ParticipantJoined {
                participant_id,
                display_name,
                role,
            } => {
                self.on_participant_joined(Participant::new(participant_id, display_name, role))
                    .await
            }
            ServerMessage::ParticipantLeft { participant_id } => {
                self.on_participant_left(&participant_id).await
            }
            ServerMessage::Offer {
                sender_id,
                session_id,
                description,
            } => {
                self.on_remote_description(sender_id, session_id, SdpKind::Offer, description)
                    .await
            }
            ServerMessage::Answer {
                sender_id,
                session_id,
                description,
            } => {
                self.on_remote_description(sender_id, session_id, SdpKind::Answer, description)
                    .await
            }
            ServerMessage::Candidate {
                sender_id,
                session_id,
                candidate,
            } => self.on_remote_candidate(sender_id, session_id, candidate).await,
            ServerMessage::Message {
                sender_id,
                session_id,
                payload,
            } => self.on_message(sender_id, session_id, payload),
            ServerMessage::SessionEnded { session_id } => self.on_session_ended(session_id).await,
            ServerMessage::Error { message } => {
                warn!(message = %message, "Relay reported an error");
            }
        }
        self.process_intents(Instant::now()).await;
    }

    async fn on_join_success(
        &mut self,
        session_id: SessionId,
        self_id: ParticipantId,
        participants: Vec<ParticipantInfo>,
    ) {
        if self.phase != SessionPhase::Joining {
            debug!(session_id = %session_id, "Unexpected join-success ignored");
            return;
        }
        self.membership.clear();
        for info in &participants {
            self.membership.apply_join(Participant::from(info));
        }
        self.membership.apply_join(Participant::new(
            self_id.clone(),
            self.request.display_name.clone(),
            self.request.role,
        ));
        self.peers.set_session(Some(session_id.clone()));
        self.peers.set_identity(
            Some(self_id.clone()),
            self.membership.teacher().map(|p| p.id.clone()),
        );
        self.session_id = Some(session_id.clone());
        self.self_id = Some(self_id.clone());
        self.phase = SessionPhase::Joined;
        info!(
            session_id = %session_id,
            self_id = %self_id,
            participants = self.membership.len(),
            "Joined session"
        );
        // Members already present offer to us; a capture started before the
        // join rides out in our answers.
        self.emit(SessionEvent::Joined {
            session_id,
            self_id,
            participants: self.membership.snapshot(),
        });
    }

    async fn on_participant_joined(&mut self, participant: Participant) {
        if self.phase != SessionPhase::Joined {
            debug!(participant_id = %participant.id, "Participant announcement before join ignored");
            return;
        }
        if self.self_id.as_ref() == Some(&participant.id) {
            return;
        }
        let id = participant.id.clone();
        if self.membership.apply_join(participant.clone()) == JoinOutcome::Added {
            info!(
                participant_id = %id,
                display_name = %participant.display_name,
                role = %participant.role,
                "Participant joined"
            );
            self.emit(SessionEvent::ParticipantJoined(participant.clone()));
        }
        if self.initiates_toward(&participant) {
            self.open_initiator_link(&id, Instant::now()).await;
        }
    }

    async fn on_participant_left(&mut self, participant_id: &ParticipantId) {
        self.peers.close_link(participant_id).await;
        self.retry_attempts.remove(participant_id);
        self.retry_due.remove(participant_id);
        if let Some(participant) = self.membership.apply_leave(participant_id) {
            info!(participant_id = %participant_id, "Participant left");
            self.emit(SessionEvent::ParticipantLeft(participant));
        }
    }

    async fn on_remote_description(
        &mut self,
        sender_id: ParticipantId,
        session_id: SessionId,
        expected: SdpKind,
        description: SessionDescription,
    ) {
        if !self.accepts(&sender_id, &session_id) {
            return;
        }
        if description.kind != expected {
            warn!(
                sender_id = %sender_id,
                expected = ?expected,
                got = ?description.kind,
                "Description type does not match its message"
            );
            return;
        }
        if let Err(e) = self
            .peers
            .handle_remote_description(&sender_id, description)
            .await
        {
            log_negotiation_error(&sender_id, &e);
        }
    }

    async fn on_remote_candidate(
        &mut self,
        sender_id: ParticipantId,
        session_id: SessionId,
        candidate: IceCandidate,
    ) {
        if !self.accepts(&sender_id, &session_id) {
            return;
        }
        if let Err(e) = self
            .peers
            .handle_remote_candidate(&sender_id, candidate)
            .await
        {
            log_negotiation_error(&sender_id, &e);
        }
    }

    fn on_message(&mut self, sender_id: ParticipantId, session_id: SessionId, payload: MessagePayload) {
        if !self.is_current_session(&session_id) {
            return;
        }
        let sender_name = self
            .membership
            .get(&sender_id)
            .map(|p| p.display_name.clone());
        let entry = self.messages.record(sender_id, sender_name, payload).clone();
        debug!(sender_id = %entry.sender_id, kind = ?entry.kind, "Message received");
        self.emit(SessionEvent::Message(entry));
    }

    async fn on_session_ended(&mut self, session_id: SessionId) {
        let ours = self.request.session_id.as_ref() == Some(&session_id)
            || self.session_id.as_ref() == Some(&session_id);
        if !ours || self.phase == SessionPhase::Ended {
            debug!(session_id = %session_id, "Session end for another session ignored");
            return;
        }
        info!(session_id = %session_id, "Session ended by the relay");
        self.leave_locally().await;
        self.phase = SessionPhase::Ended;
        self.emit(SessionEvent::SessionEnded { session_id });
    }

    // -----------------------------------------------------------------------
    // Peer events and timers
    // -----------------------------------------------------------------------

    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        self.peers.handle_peer_event(event).await;
        self.process_intents(Instant::now()).await;
    }

    /// Sweep stalled negotiations and fire due link retries.
    pub async fn tick(&mut self, now: Instant) {
        self.peers.sweep(now).await;
        self.process_intents(now).await;

        let due: Vec<ParticipantId> = self
            .retry_due
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            self.retry_due.remove(&id);
            if self.phase != SessionPhase::Joined
                || !self.membership.contains(&id)
                || self.peers.link(&id).is_some()
            {
                continue;
            }
            info!(
                remote_id = %id,
                attempt = self.retry_attempts.get(&id).copied().unwrap_or(0),
                "Rebuilding peer link"
            );
            self.open_initiator_link(&id, now).await;
        }
        self.process_intents(now).await;
    }

    async fn process_intents(&mut self, now: Instant) {
        for intent in self.peers.take_intents() {
            match intent {
                LinkIntent::Established { remote_id } => {
                    if self.retry_attempts.remove(&remote_id).is_some() {
                        info!(remote_id = %remote_id, "Peer link recovered");
                    }
                }
                LinkIntent::RemoteStream { remote_id, stream } => {
                    if self
                        .membership
                        .apply_stream_attached(&remote_id, stream.clone())
                    {
                        self.emit(SessionEvent::RemoteStream {
                            participant_id: remote_id,
                            stream,
                        });
                    }
                }
                LinkIntent::Reconnect {
                    remote_id,
                    role,
                    failure,
                } => match role {
                    PeerRole::Responder => {
                        info!(
                            remote_id = %remote_id,
                            failure = %failure,
                            "Responder link lost, waiting for the remote to reconnect"
                        );
                    }
                    PeerRole::Initiator => self.schedule_retry(&remote_id, now),
                },
            }
        }
    }

    fn schedule_retry(&mut self, remote_id: &ParticipantId, now: Instant) {
        if self.phase != SessionPhase::Joined || !self.membership.contains(remote_id) {
            return;
        }
        let attempt = {
            let attempts = self.retry_attempts.entry(remote_id.clone()).or_insert(0);
            *attempts += 1;
            *attempts
        };
        if attempt > self.config.max_link_retries {
            self.retry_attempts.remove(remote_id);
            warn!(
                remote_id = %remote_id,
                retries = self.config.max_link_retries,
                "Giving up on peer link"
            );
            let err = MeshError::NegotiationTimeout(remote_id.clone());
            self.emit(SessionEvent::Notification(Notification::from_error(&err)));
            return;
        }
        self.retry_due
            .insert(remote_id.clone(), now + self.config.retry_delay);
        debug!(
            remote_id = %remote_id,
            attempt,
            delay_ms = self.config.retry_delay.as_millis() as u64,
            "Peer link retry scheduled"
        );
    }

    async fn open_initiator_link(&mut self, remote_id: &ParticipantId, now: Instant) {
        match self.peers.ensure_link(remote_id, PeerRole::Initiator).await {
            Ok(PeerRole::Responder) => {
                debug!(remote_id = %remote_id, "Existing responder link kept");
            }
            Ok(PeerRole::Initiator) => {}
            Err(e) => {
                warn!(remote_id = %remote_id, error = %e, "Could not create peer link");
                self.schedule_retry(remote_id, now);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    pub async fn handle_command(&mut self, command: SessionCommand) {
        let result = match command {
            SessionCommand::StartCapture => self.start_capture().await,
            SessionCommand::StopCapture => {
                self.stop_capture().await;
                Ok(())
            }
            SessionCommand::SendMessage { kind, text } => self.send_message(kind, &text).await,
            SessionCommand::Leave => {
                self.leave().await;
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!(error = %e, "Command failed");
        }
        self.process_intents(Instant::now()).await;
    }

    /// Acquire the screen and send it on every link. Idempotent.
    pub async fn start_capture(&mut self) -> Result<(), MeshError> {
        if self.capture.is_active() {
            return Ok(());
        }
        let stream = match self.capture.start().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Screen capture failed");
                if e.is_user_visible() {
                    self.emit(SessionEvent::Notification(Notification::from_error(&e)));
                }
                return Err(e);
            }
        };
        for track in &stream.tracks {
            self.peers.attach_local_track(track.clone()).await;
        }

        // Capturing makes us responsible for offering to every peer we may
        // initiate towards.
        if self.phase == SessionPhase::Joined {
            let targets: Vec<ParticipantId> = self
                .membership
                .snapshot()
                .iter()
                .filter(|p| Some(&p.id) != self.self_id.as_ref())
                .filter(|p| self.initiates_toward(p) && self.peers.link(&p.id).is_none())
                .map(|p| p.id.clone())
                .collect();
            for id in targets {
                self.open_initiator_link(&id, Instant::now()).await;
            }
        }
        self.emit(SessionEvent::CaptureStarted(stream));
        Ok(())
    }

    /// Remove the capture tracks from every link, then release the device.
    pub async fn stop_capture(&mut self) {
        if self.release_capture().await {
            self.emit(SessionEvent::CaptureStopped);
        }
    }

    async fn release_capture(&mut self) -> bool {
        let Some(stream) = self.capture.state().stream().cloned() else {
            return false;
        };
        for track in &stream.tracks {
            self.peers.detach_local_track(&track.id).await;
        }
        self.capture.stop().await;
        true
    }

    pub async fn send_message(&mut self, kind: MessageKind, text: &str) -> Result<(), MeshError> {
        let session_id = match (&self.session_id, self.phase) {
            (Some(id), SessionPhase::Joined) => id.clone(),
            _ => return Err(MeshError::NotInSession),
        };
        let text = self.messages.validate_outgoing(text)?;
        self.signaling
            .send(ClientMessage::Message {
                session_id,
                payload: MessagePayload { kind, text },
            })
            .await
    }

    /// Tell the relay and tear everything down.
    pub async fn leave(&mut self) {
        if self.phase == SessionPhase::Ended {
            return;
        }
        let session_id = self
            .session_id
            .clone()
            .or_else(|| self.request.session_id.clone());
        if let (Some(session_id), SessionPhase::Joining | SessionPhase::Joined) =
            (session_id, self.phase)
        {
            if let Err(e) = self
                .signaling
                .send(ClientMessage::LeaveSession { session_id })
                .await
            {
                debug!(error = %e, "Leave not delivered");
            }
        }
        self.leave_locally().await;
        self.phase = SessionPhase::Ended;
        info!("Left session");
        self.emit(SessionEvent::Left);
    }

    async fn leave_locally(&mut self) {
        self.peers.close_all().await;
        if self.release_capture().await {
            self.emit(SessionEvent::CaptureStopped);
        }
        self.peers.set_session(None);
        self.peers.set_identity(None, None);
        self.membership.clear();
        self.clear_retries();
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Teachers offer to everyone. A sharing student offers to other
    /// students, never to the teacher, who always initiates.
    fn initiates_toward(&self, remote: &Participant) -> bool {
        match (self.request.role, remote.role) {
            (Role::Teacher, _) => true,
            (Role::Student, Role::Teacher) => false,
            (Role::Student, Role::Student) => self.capture.is_active(),
        }
    }

    fn is_current_session(&self, session_id: &SessionId) -> bool {
        if self.phase == SessionPhase::Joined && self.session_id.as_ref() == Some(session_id) {
            return true;
        }
        debug!(session_id = %session_id, "Message for another session dropped");
        false
    }

    /// Negotiation input is only accepted from current members.
    fn accepts(&self, sender_id: &ParticipantId, session_id: &SessionId) -> bool {
        if !self.is_current_session(session_id) {
            return false;
        }
        if !self.membership.contains(sender_id) {
            let err = MeshError::UnknownRemoteParticipant(sender_id.clone());
            warn!(error = %err, "Negotiation message discarded");
            return false;
        }
        true
    }

    fn clear_retries(&mut self) {
        self.retry_attempts.clear();
        self.retry_due.clear();
    }

    fn emit(&self, event: SessionEvent) {
        if self.event_tx.send(event).is_err() {
            trace!("No listener for session events");
        }
    }
}

fn log_negotiation_error(sender_id: &ParticipantId, err: &MeshError) {
    match err {
        MeshError::UnknownRemoteParticipant(_) => {
            debug!(sender_id = %sender_id, error = %err, "Negotiation input for missing link dropped");
        }
        _ => warn!(sender_id = %sender_id, error = %err, "Negotiation input rejected"),
    }
}

/// Connect to the relay configured in `config` and run a session on a
/// background task.
pub fn spawn_session(
    config: &ClasscastConfig,
    request: JoinRequest,
    factory: Arc<dyn PeerConnectionFactory>,
    capture: Arc<dyn MediaCaptureSource>,
) -> (
    SessionHandle,
    mpsc::UnboundedReceiver<SessionEvent>,
    JoinHandle<()>,
) {
    let (client, signaling_rx) = SignalingClient::connect(config.signaling.clone());
    let signaling: Arc<dyn SignalingChannel> = Arc::new(client);
    let (orchestrator, events) = SessionOrchestrator::new(
        request,
        MeshConfig::from_config(config),
        signaling,
        factory,
        capture,
    );
    let (handle, commands) = SessionHandle::new();
    let task = tokio::spawn(orchestrator.run(signaling_rx, commands));
    (handle, events, task)
}
