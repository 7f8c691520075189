use serde::{Deserialize, Serialize};

/// Limits for questions and chat relayed through a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    /// Messages retained per kind on the client.
    pub max_history: u32,
    /// Longest message body accepted, in characters.
    pub max_length: u32,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            max_history: 500,
            max_length: 1000,
        }
    }
}
