//! Client-side signaling connection settings.

use serde::{Deserialize, Serialize};

/// How the client reaches the signaling relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// WebSocket URL of the relay.
    pub url: String,
    /// Seconds to wait for the WebSocket handshake.
    pub connect_timeout_secs: u32,
    /// Seconds between keep-alive pings.
    pub heartbeat_interval_secs: u32,
    /// Base reconnect delay in seconds; doubles on every failure.
    pub reconnect_delay_secs: u32,
    /// Upper bound for the reconnect delay.
    pub max_reconnect_delay_secs: u32,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:5000/ws".into(),
            connect_timeout_secs: 15,
            heartbeat_interval_secs: 25,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        }
    }
}
