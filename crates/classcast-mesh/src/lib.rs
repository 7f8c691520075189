//! Peer mesh for classroom screen sharing.
//!
//! A `SessionOrchestrator` joins a session through the signaling relay,
//! keeps membership, and maintains one negotiated `PeerLink` to every
//! participant it must reach. The WebRTC stack and the capture device are
//! supplied by the embedder through `PeerConnectionFactory` and
//! `MediaCaptureSource`.

pub mod capture;
pub mod config;
pub mod media;
pub mod membership;
pub mod messages;
pub mod orchestrator;
pub mod peer;
pub mod protocol;
pub mod signaling;

#[cfg(test)]
mod testing;

pub use capture::{LocalCaptureState, MediaCaptureSource, ScreenCapture};
pub use config::MeshConfig;
pub use media::{LocalStream, LocalTrack, MediaStreamHandle, TrackKind};
pub use membership::{JoinOutcome, Participant, SessionMembershipTracker};
pub use messages::{MessageLog, ReceivedMessage};
pub use orchestrator::{
    spawn_session, JoinRequest, SessionCommand, SessionEvent, SessionHandle,
    SessionOrchestrator, SessionPhase,
};
pub use peer::{
    LinkFailure, LinkId, LinkIntent, LinkState, NegotiationState, PeerConnection,
    PeerConnectionFactory, PeerConnectionManager, PeerEvent, PeerEventKind, PeerEventSink,
    PeerLink, PeerRole,
};
pub use protocol::{
    ClientMessage, Credentials, IceCandidate, MessageKind, MessagePayload, ParticipantInfo, Role,
    SdpKind, ServerMessage, SessionDescription,
};
pub use signaling::{SignalingChannel, SignalingClient, SignalingEvent};
