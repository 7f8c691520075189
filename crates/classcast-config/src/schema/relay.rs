use serde::{Deserialize, Serialize};

/// Configuration for the signaling relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to bind the listener to.
    pub bind_address: String,
    pub port: u16,
    /// Seconds a new connection has to send its `join-session` message.
    pub hello_timeout_secs: u32,
    /// Sessions whose participants are all gone are reaped after this long.
    pub session_ttl_secs: u32,
    /// Seconds between reaper passes.
    pub reap_interval_secs: u32,
    /// Maximum participants (teacher included) per session.
    pub max_participants: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: 5000,
            hello_timeout_secs: 10,
            session_ttl_secs: 300,
            reap_interval_secs: 60,
            max_participants: 64,
        }
    }
}
