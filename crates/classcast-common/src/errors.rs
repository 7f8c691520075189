use std::path::PathBuf;

use crate::id::ParticipantId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Failures of the peer mesh and its signaling.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// The signaling transport is down. Links are suspended; reconnecting is
    /// the transport's job.
    #[error("signaling unavailable: {0}")]
    SignalingUnavailable(String),

    #[error("negotiation with {0} timed out")]
    NegotiationTimeout(ParticipantId),

    /// The user (or the OS) refused access to the capture device.
    #[error("capture device denied: {0}")]
    CaptureDeviceDenied(String),

    /// A negotiation message named a participant we have no record of.
    #[error("unknown remote participant: {0}")]
    UnknownRemoteParticipant(ParticipantId),

    #[error("peer connection error: {0}")]
    PeerConnection(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not in a session")]
    NotInSession,

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
}

impl MeshError {
    /// Whether this failure must be shown to the user rather than handled
    /// silently inside the mesh.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::CaptureDeviceDenied(_) | Self::NegotiationTimeout(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClasscastError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::FileNotFound(PathBuf::from("/tmp/missing.toml"));
        assert_eq!(err.to_string(), "config file not found: /tmp/missing.toml");

        let err = ConfigError::ParseError("unexpected token".into());
        assert_eq!(err.to_string(), "config parse error: unexpected token");

        let err = ConfigError::ValidationError("negotiation.timeout_secs".into());
        assert_eq!(
            err.to_string(),
            "config validation error: negotiation.timeout_secs"
        );
    }

    #[test]
    fn mesh_error_display() {
        let err = MeshError::NegotiationTimeout(ParticipantId::new("p-1"));
        assert_eq!(err.to_string(), "negotiation with p-1 timed out");

        let err = MeshError::UnknownRemoteParticipant(ParticipantId::new("ghost"));
        assert_eq!(err.to_string(), "unknown remote participant: ghost");

        let err = MeshError::CaptureDeviceDenied("permission dismissed".into());
        assert_eq!(err.to_string(), "capture device denied: permission dismissed");

        let err = MeshError::SignalingUnavailable("socket closed".into());
        assert_eq!(err.to_string(), "signaling unavailable: socket closed");

        assert_eq!(MeshError::NotInSession.to_string(), "not in a session");
    }

    #[test]
    fn only_persistent_failures_are_user_visible() {
        assert!(MeshError::CaptureDeviceDenied("x".into()).is_user_visible());
        assert!(MeshError::NegotiationTimeout(ParticipantId::new("p")).is_user_visible());
        assert!(!MeshError::UnknownRemoteParticipant(ParticipantId::new("p")).is_user_visible());
        assert!(!MeshError::SignalingUnavailable("x".into()).is_user_visible());
        assert!(!MeshError::PeerConnection("x".into()).is_user_visible());
    }

    #[test]
    fn classcast_error_from_config() {
        let config_err = ConfigError::ParseError("bad toml".into());
        let err: ClasscastError = config_err.into();
        assert!(matches!(err, ClasscastError::Config(_)));
        assert!(err.to_string().contains("bad toml"));
    }

    #[test]
    fn classcast_error_from_mesh() {
        let err: ClasscastError = MeshError::Protocol("unexpected frame".into()).into();
        assert!(matches!(err, ClasscastError::Mesh(_)));
        assert_eq!(err.to_string(), "protocol error: unexpected frame");
    }

    #[test]
    fn classcast_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: ClasscastError = io_err.into();
        assert!(matches!(err, ClasscastError::Io(_)));
        assert!(err.to_string().contains("file missing"));
    }
}
