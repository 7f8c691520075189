//! Inputs and outputs of a session.

use classcast_common::{Notification, ParticipantId, SessionId};

use crate::media::{LocalStream, MediaStreamHandle};
use crate::membership::Participant;
use crate::messages::ReceivedMessage;
use crate::protocol::{Credentials, MessageKind, Role};

/// What the local user asked to join as.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    /// `None` lets a teacher open a fresh session.
    pub session_id: Option<SessionId>,
    pub role: Role,
    pub display_name: String,
    pub credentials: Option<Credentials>,
}

impl JoinRequest {
    pub fn teacher(display_name: impl Into<String>) -> Self {
        Self {
            session_id: None,
            role: Role::Teacher,
            display_name: display_name.into(),
            credentials: None,
        }
    }

    pub fn student(session_id: SessionId, display_name: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id),
            role: Role::Student,
            display_name: display_name.into(),
            credentials: None,
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Requests from the UI to a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    StartCapture,
    StopCapture,
    SendMessage { kind: MessageKind, text: String },
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting for the relay connection.
    Idle,
    Joining,
    Joined,
    Ended,
}

/// Everything a UI needs to render a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SessionCreated {
        session_id: SessionId,
    },
    Joined {
        session_id: SessionId,
        self_id: ParticipantId,
        participants: Vec<Participant>,
    },
    JoinFailed {
        reason: String,
    },
    ParticipantJoined(Participant),
    ParticipantLeft(Participant),
    RemoteStream {
        participant_id: ParticipantId,
        stream: MediaStreamHandle,
    },
    CaptureStarted(LocalStream),
    CaptureStopped,
    Message(ReceivedMessage),
    Notification(Notification),
    SignalingLost,
    SignalingRestored,
    SessionEnded {
        session_id: SessionId,
    },
    Left,
}
