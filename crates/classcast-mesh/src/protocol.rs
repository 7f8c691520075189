//! Wire protocol between classroom clients and the signaling relay.
//!
//! Every frame is a JSON text message tagged by `"type"` in kebab-case.
//! Session descriptions and ICE candidates are carried opaquely; neither the
//! relay nor this crate inspects their contents.

use std::fmt;

use classcast_common::{MeshError, ParticipantId, SessionId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Shared types
// ---------------------------------------------------------------------------

/// Role of a participant in the classroom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Teacher => write!(f, "teacher"),
            Self::Student => write!(f, "student"),
        }
    }
}

/// Which half of an offer/answer exchange a description is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description produced by one peer connection for the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u32>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// Opaque credential string handed over by the identity provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(String);

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials([REDACTED])")
    }
}

/// One entry of a session roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub role: Role,
}

/// Kind of a relayed text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Student to teacher.
    Question,
    /// Everyone else in the session.
    Chat,
}

/// A question or chat line. Relayed, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub kind: MessageKind,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Client -> relay
// ---------------------------------------------------------------------------

/// Messages a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinSession {
        session_id: SessionId,
        role: Role,
        display_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<Credentials>,
    },
    Offer {
        target_id: ParticipantId,
        session_id: SessionId,
        description: SessionDescription,
    },
    Answer {
        target_id: ParticipantId,
        session_id: SessionId,
        description: SessionDescription,
    },
    Candidate {
        target_id: ParticipantId,
        session_id: SessionId,
        candidate: IceCandidate,
    },
    Message {
        session_id: SessionId,
        payload: MessagePayload,
    },
    LeaveSession {
        session_id: SessionId,
    },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, MeshError> {
        serde_json::to_string(self).map_err(|e| MeshError::Protocol(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, MeshError> {
        serde_json::from_str(text).map_err(|e| MeshError::Protocol(e.to_string()))
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinSession { .. } => "join-session",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::Message { .. } => "message",
            Self::LeaveSession { .. } => "leave-session",
        }
    }
}

// ---------------------------------------------------------------------------
// Relay -> client
// ---------------------------------------------------------------------------

/// Messages the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    SessionCreated {
        session_id: SessionId,
    },
    /// Sent to the joiner only. `participants` includes the joiner itself.
    JoinSuccess {
        session_id: SessionId,
        self_id: ParticipantId,
        participants: Vec<ParticipantInfo>,
    },
    JoinFailed {
        reason: String,
    },
    ParticipantJoined {
        participant_id: ParticipantId,
        display_name: String,
        role: Role,
    },
    ParticipantLeft {
        participant_id: ParticipantId,
    },
    Offer {
        sender_id: ParticipantId,
        session_id: SessionId,
        description: SessionDescription,
    },
    Answer {
        sender_id: ParticipantId,
        session_id: SessionId,
        description: SessionDescription,
    },
    Candidate {
        sender_id: ParticipantId,
        session_id: SessionId,
        candidate: IceCandidate,
    },
    Message {
        sender_id: ParticipantId,
        session_id: SessionId,
        payload: MessagePayload,
    },
    SessionEnded {
        session_id: SessionId,
    },
    /// The relay rejected a frame after the join.
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, MeshError> {
        serde_json::to_string(self).map_err(|e| MeshError::Protocol(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, MeshError> {
        serde_json::from_str(text).map_err(|e| MeshError::Protocol(e.to_string()))
    }
}
