//! The seam between the mesh and a WebRTC stack.
//!
//! A backend implements `PeerConnectionFactory` and `PeerConnection`, and
//! reports asynchronous happenings (local candidates, connection state,
//! remote streams) through the `PeerEventSink` it was created with.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use classcast_common::{MeshError, ParticipantId};
use classcast_config::schema::IceServerConfig;
use tokio::sync::mpsc;
use tracing::trace;

use crate::media::{LocalTrack, MediaStreamHandle};
use crate::protocol::{IceCandidate, SessionDescription};

/// Identity of one connection. A link that is torn down and rebuilt gets a
/// new id, so events from the old connection can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Connection state as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    /// Transient loss of the network path; may recover with an ICE restart.
    Disconnected,
    /// Terminal ICE failure.
    Failed,
    Closed,
}

#[derive(Debug, Clone)]
pub enum PeerEventKind {
    LocalCandidate(IceCandidate),
    StateChanged(LinkState),
    RemoteStream(MediaStreamHandle),
}

#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub link_id: LinkId,
    pub remote_id: ParticipantId,
    pub kind: PeerEventKind,
}

/// Where a connection reports its events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    link_id: LinkId,
    remote_id: ParticipantId,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSink {
    pub fn new(
        link_id: LinkId,
        remote_id: ParticipantId,
        tx: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            link_id,
            remote_id,
            tx,
        }
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    pub fn remote_id(&self) -> &ParticipantId {
        &self.remote_id
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(PeerEventKind::LocalCandidate(candidate));
    }

    pub fn state_changed(&self, state: LinkState) {
        self.emit(PeerEventKind::StateChanged(state));
    }

    pub fn remote_stream(&self, stream: MediaStreamHandle) {
        self.emit(PeerEventKind::RemoteStream(stream));
    }

    fn emit(&self, kind: PeerEventKind) {
        let event = PeerEvent {
            link_id: self.link_id,
            remote_id: self.remote_id.clone(),
            kind,
        };
        // The session is gone once the receiver is dropped.
        if self.tx.send(event).is_err() {
            trace!(link_id = %self.link_id, "Peer event dropped, session closed");
        }
    }
}

/// One point-to-point media connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, MeshError>;

    async fn create_answer(&self) -> Result<SessionDescription, MeshError>;

    async fn set_local_description(&self, description: SessionDescription)
        -> Result<(), MeshError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MeshError>;

    /// Only called once a remote description is set.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MeshError>;

    async fn add_track(&self, track: &LocalTrack) -> Result<(), MeshError>;

    async fn remove_track(&self, track_id: &str) -> Result<(), MeshError>;

    /// Discard an applied local offer.
    async fn rollback(&self) -> Result<(), MeshError>;

    async fn close(&self);
}

/// Creates connections for the manager.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        remote_id: &ParticipantId,
        ice_servers: &[IceServerConfig],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>, MeshError>;
}
