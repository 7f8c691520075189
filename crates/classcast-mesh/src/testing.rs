//! In-memory stand-ins for the backend, the relay transport and the capture
//! device.
//!
//! `FakePeer` encodes its sending tracks into the SDP text
//! (`offer tracks:video/t1,audio/t2`) so a remote fake can report exactly
//! which media kinds arrived.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use classcast_common::{MeshError, ParticipantId, SessionId};
use classcast_config::schema::{IceServerConfig, ShareQuality};

use crate::capture::MediaCaptureSource;
use crate::config::MeshConfig;
use crate::media::{LocalStream, LocalTrack, MediaStreamHandle, TrackKind};
use crate::peer::{LinkId, LinkState, PeerConnection, PeerConnectionFactory, PeerEventSink};
use crate::protocol::{ClientMessage, IceCandidate, SdpKind, SessionDescription};
use crate::signaling::SignalingChannel;

pub(crate) fn pid(id: &str) -> ParticipantId {
    ParticipantId::new(id)
}

pub(crate) fn sid() -> SessionId {
    SessionId::parse("CLASS1").unwrap()
}

pub(crate) fn test_config() -> MeshConfig {
    MeshConfig {
        max_link_retries: 2,
        ..MeshConfig::default()
    }
}

pub(crate) fn video_track(id: &str) -> LocalTrack {
    LocalTrack {
        id: id.into(),
        kind: TrackKind::Video,
        stream_id: "screen".into(),
    }
}

pub(crate) fn audio_track(id: &str) -> LocalTrack {
    LocalTrack {
        id: id.into(),
        kind: TrackKind::Audio,
        stream_id: "screen".into(),
    }
}

fn kind_name(kind: TrackKind) -> &'static str {
    match kind {
        TrackKind::Audio => "audio",
        TrackKind::Video => "video",
    }
}

fn encode_sdp(kind: SdpKind, tracks: &[LocalTrack], ice_restart: bool) -> String {
    let prefix = match kind {
        SdpKind::Offer => "offer",
        SdpKind::Answer => "answer",
    };
    let tracks: Vec<String> = tracks
        .iter()
        .map(|t| format!("{}/{}", kind_name(t.kind), t.id))
        .collect();
    let restart = if ice_restart { " ice-restart" } else { "" };
    format!("{prefix} tracks:{}{restart}", tracks.join(","))
}

/// Media kinds named in an SDP produced by `encode_sdp`.
pub(crate) fn decode_track_kinds(sdp: &str) -> Vec<TrackKind> {
    let Some(list) = sdp
        .split_whitespace()
        .find_map(|part| part.strip_prefix("tracks:"))
    else {
        return Vec::new();
    };
    list.split(',')
        .filter_map(|entry| match entry.split('/').next() {
            Some("video") => Some(TrackKind::Video),
            Some("audio") => Some(TrackKind::Audio),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Peer backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakePeerState {
    tracks: Vec<LocalTrack>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    candidates: Vec<IceCandidate>,
    early_candidates: usize,
    offers: Vec<bool>,
    rollbacks: usize,
    connected: bool,
    closed: bool,
}

pub(crate) struct FakePeer {
    remote_id: ParticipantId,
    sink: PeerEventSink,
    fail_offers: AtomicBool,
    state: Mutex<FakePeerState>,
}

impl FakePeer {
    fn state(&self) -> std::sync::MutexGuard<'_, FakePeerState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn remote_id(&self) -> &ParticipantId {
        &self.remote_id
    }

    pub(crate) fn link_id(&self) -> LinkId {
        self.sink.link_id()
    }

    pub(crate) fn track_ids(&self) -> Vec<String> {
        self.state().tracks.iter().map(|t| t.id.clone()).collect()
    }

    /// Remote candidates applied, in order.
    pub(crate) fn candidates(&self) -> Vec<String> {
        self.state()
            .candidates
            .iter()
            .map(|c| c.candidate.clone())
            .collect()
    }

    /// Candidates the manager tried to apply before a remote description.
    pub(crate) fn early_candidates(&self) -> usize {
        self.state().early_candidates
    }

    pub(crate) fn offers_created(&self) -> usize {
        self.state().offers.len()
    }

    pub(crate) fn ice_restarts(&self) -> usize {
        self.state().offers.iter().filter(|r| **r).count()
    }

    pub(crate) fn rollbacks(&self) -> usize {
        self.state().rollbacks
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub(crate) fn set_fail_offers(&self, fail: bool) {
        self.fail_offers.store(fail, Ordering::Relaxed);
    }

    /// Simulate a backend state transition.
    pub(crate) fn emit_state(&self, state: LinkState) {
        self.sink.state_changed(state);
    }

    /// Simulate a gathered local candidate.
    pub(crate) fn emit_candidate(&self, candidate: &str) {
        self.sink.local_candidate(IceCandidate::new(candidate));
    }

    fn maybe_connected(&self) {
        let newly = {
            let mut state = self.state();
            let ready = state.local.is_some() && state.remote.is_some() && !state.connected;
            if ready {
                state.connected = true;
            }
            ready
        };
        if newly {
            self.sink.state_changed(LinkState::Connected);
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, MeshError> {
        if self.fail_offers.load(Ordering::Relaxed) {
            return Err(MeshError::PeerConnection("offer creation failed".into()));
        }
        let mut state = self.state();
        state.offers.push(ice_restart);
        Ok(SessionDescription::offer(encode_sdp(
            SdpKind::Offer,
            &state.tracks,
            ice_restart,
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MeshError> {
        let state = self.state();
        if state.remote.is_none() {
            return Err(MeshError::PeerConnection("answer without remote offer".into()));
        }
        Ok(SessionDescription::answer(encode_sdp(
            SdpKind::Answer,
            &state.tracks,
            false,
        )))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), MeshError> {
        self.state().local = Some(description);
        self.maybe_connected();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MeshError> {
        let kinds = decode_track_kinds(&description.sdp);
        self.state().remote = Some(description);
        if !kinds.is_empty() {
            self.sink.remote_stream(MediaStreamHandle {
                id: format!("stream-{}", self.remote_id),
                tracks: kinds,
            });
        }
        self.maybe_connected();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MeshError> {
        let mut state = self.state();
        if state.remote.is_none() {
            state.early_candidates += 1;
            return Err(MeshError::PeerConnection(
                "candidate before remote description".into(),
            ));
        }
        state.candidates.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), MeshError> {
        let mut state = self.state();
        if !state.tracks.iter().any(|t| t.id == track.id) {
            state.tracks.push(track.clone());
        }
        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<(), MeshError> {
        self.state().tracks.retain(|t| t.id != track_id);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), MeshError> {
        let mut state = self.state();
        state.local = None;
        state.rollbacks += 1;
        Ok(())
    }

    async fn close(&self) {
        self.state().closed = true;
    }
}

#[derive(Default)]
pub(crate) struct FakePeerFactory {
    peers: Mutex<Vec<Arc<FakePeer>>>,
    fail_create: AtomicBool,
}

impl FakePeerFactory {
    pub(crate) fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().unwrap().clone()
    }

    /// The most recent connection built for `remote_id`.
    pub(crate) fn latest(&self, remote_id: &ParticipantId) -> Option<Arc<FakePeer>> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|p| &p.remote_id == remote_id)
            .cloned()
    }

    pub(crate) fn created_for(&self, remote_id: &ParticipantId) -> usize {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .filter(|p| &p.remote_id == remote_id)
            .count()
    }

    pub(crate) fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(
        &self,
        remote_id: &ParticipantId,
        _ice_servers: &[IceServerConfig],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>, MeshError> {
        if self.fail_create.load(Ordering::Relaxed) {
            return Err(MeshError::PeerConnection("factory unavailable".into()));
        }
        let peer = Arc::new(FakePeer {
            remote_id: remote_id.clone(),
            sink: events,
            fail_offers: AtomicBool::new(false),
            state: Mutex::new(FakePeerState::default()),
        });
        self.peers.lock().unwrap().push(Arc::clone(&peer));
        Ok(peer as Arc<dyn PeerConnection>)
    }
}

// ---------------------------------------------------------------------------
// Signaling
// ---------------------------------------------------------------------------

pub(crate) struct FakeSignaling {
    sent: Mutex<Vec<ClientMessage>>,
    available: AtomicBool,
}

impl Default for FakeSignaling {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl FakeSignaling {
    /// Drain everything sent so far.
    pub(crate) fn take_sent(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }
}

#[async_trait]
impl SignalingChannel for FakeSignaling {
    async fn send(&self, message: ClientMessage) -> Result<(), MeshError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(MeshError::SignalingUnavailable("relay unreachable".into()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct FakeCapture {
    deny: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeCapture {
    pub(crate) fn set_deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::Relaxed);
    }

    pub(crate) fn starts(&self) -> usize {
        self.starts.load(Ordering::Relaxed)
    }

    pub(crate) fn stops(&self) -> usize {
        self.stops.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MediaCaptureSource for FakeCapture {
    async fn start(&self, _quality: ShareQuality, audio: bool) -> Result<LocalStream, MeshError> {
        if self.deny.load(Ordering::Relaxed) {
            return Err(MeshError::CaptureDeviceDenied("permission dismissed".into()));
        }
        let n = self.starts.fetch_add(1, Ordering::Relaxed) + 1;
        let stream_id = format!("screen-{n}");
        let mut tracks = vec![LocalTrack {
            id: format!("{stream_id}-video"),
            kind: TrackKind::Video,
            stream_id: stream_id.clone(),
        }];
        if audio {
            tracks.push(LocalTrack {
                id: format!("{stream_id}-audio"),
                kind: TrackKind::Audio,
                stream_id: stream_id.clone(),
            });
        }
        Ok(LocalStream {
            id: stream_id,
            tracks,
        })
    }

    async fn stop(&self, _stream: &LocalStream) {
        self.stops.fetch_add(1, Ordering::Relaxed);
    }
}
