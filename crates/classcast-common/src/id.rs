use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::MeshError;

/// Length of a generated session code.
pub const SESSION_CODE_LEN: usize = 6;

/// Longest session code accepted from user input.
const MAX_SESSION_CODE_LEN: usize = 32;

const BASE36: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Short token naming a classroom session, e.g. `AB12CD`.
///
/// Codes are case-insensitive on input and always stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh six character base-36 code.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..SESSION_CODE_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        Self(code)
    }

    /// Parse a user-supplied code.
    pub fn parse(raw: &str) -> Result<Self, MeshError> {
        let code = raw.trim();
        if code.is_empty() {
            return Err(MeshError::InvalidSessionId("session code is empty".into()));
        }
        if code.len() > MAX_SESSION_CODE_LEN {
            return Err(MeshError::InvalidSessionId(format!(
                "session code longer than {MAX_SESSION_CODE_LEN} characters"
            )));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(MeshError::InvalidSessionId(format!(
                "'{code}' contains characters other than letters and digits"
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = MeshError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one connected client, assigned by the signaling relay.
///
/// Valid for the lifetime of a single transport connection only; a client
/// that reconnects is a different participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a random id. Only the relay does this.
    pub fn random() -> Self {
        Self(new_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
