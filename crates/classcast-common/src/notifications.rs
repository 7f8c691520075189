use std::time::{Duration, Instant};

use crate::errors::MeshError;
use crate::id::ParticipantId;

/// Severity level for user-visible notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// A notification the embedding UI should show to the user.
#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub body: String,
    /// The remote participant this is about, if any.
    pub participant: Option<ParticipantId>,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl Notification {
    fn new(level: NotificationLevel, title: String, body: String, ttl: Duration) -> Self {
        Self {
            level,
            title,
            body,
            participant: None,
            created_at: Instant::now(),
            ttl,
        }
    }

    /// Creates an info notification with a 5-second TTL.
    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(
            NotificationLevel::Info,
            title.into(),
            body.into(),
            Duration::from_secs(5),
        )
    }

    /// Creates a warning notification with an 8-second TTL.
    pub fn warning(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(
            NotificationLevel::Warning,
            title.into(),
            body.into(),
            Duration::from_secs(8),
        )
    }

    /// Creates an error notification with a 10-second TTL.
    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(
            NotificationLevel::Error,
            title.into(),
            body.into(),
            Duration::from_secs(10),
        )
    }

    pub fn about(mut self, participant: ParticipantId) -> Self {
        self.participant = Some(participant);
        self
    }

    /// Build the notification shown for a mesh failure.
    pub fn from_error(err: &MeshError) -> Self {
        match err {
            MeshError::CaptureDeviceDenied(reason) => Self::error(
                "Screen sharing blocked",
                format!("Access to the capture device was denied: {reason}"),
            ),
            MeshError::NegotiationTimeout(id) => Self::error(
                "Connection failed",
                format!("Could not establish a connection with {id}"),
            )
            .about(id.clone()),
            MeshError::SignalingUnavailable(reason) => {
                Self::warning("Connection to server lost", reason.clone())
            }
            other => Self::warning("Session problem", other.to_string()),
        }
    }

    /// Returns `true` if this notification has exceeded its TTL.
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }
}
