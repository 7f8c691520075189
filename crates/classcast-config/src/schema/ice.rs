//! ICE server list handed to the peer-connection backend.

use serde::{Deserialize, Serialize};

/// Kind of ICE server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceServerKind {
    #[default]
    Stun,
    Turn,
}

impl IceServerKind {
    fn scheme(&self) -> &'static str {
        match self {
            Self::Stun => "stun:",
            Self::Turn => "turn:",
        }
    }
}

/// One STUN or TURN server.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServerConfig {
    #[serde(rename = "type", default)]
    pub kind: IceServerKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl std::fmt::Debug for IceServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IceServerConfig")
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("credential", &self.credential.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            kind: IceServerKind::Stun,
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    /// The URL with its `stun:`/`turn:` scheme, adding the one implied by
    /// `kind` when the configured URL is a bare `host:port`.
    pub fn url_with_scheme(&self) -> String {
        let url = self.url.trim();
        if url.starts_with("stun:") || url.starts_with("turn:") || url.starts_with("turns:") {
            url.to_string()
        } else {
            format!("{}{}", self.kind.scheme(), url)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub servers: Vec<IceServerConfig>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec![IceServerConfig::stun("stun:stun.l.google.com:19302")],
        }
    }
}
