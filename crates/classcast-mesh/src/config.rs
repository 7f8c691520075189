//! Runtime settings for a session, resolved from `ClasscastConfig`.

use std::time::Duration;

use classcast_config::schema::{IceServerConfig, ShareQuality};
use classcast_config::ClasscastConfig;

#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub ice_servers: Vec<IceServerConfig>,
    /// How long a link may wait in `OfferSent`/`OfferReceived`.
    pub negotiation_timeout: Duration,
    /// Rebuilds of a failed initiator link before giving up.
    pub max_link_retries: u32,
    pub retry_delay: Duration,
    pub sweep_interval: Duration,
    pub share_quality: ShareQuality,
    pub capture_audio: bool,
    pub max_history: usize,
    pub max_message_length: usize,
}

impl MeshConfig {
    pub fn from_config(config: &ClasscastConfig) -> Self {
        Self {
            ice_servers: config.ice.servers.clone(),
            negotiation_timeout: Duration::from_secs(u64::from(config.negotiation.timeout_secs)),
            max_link_retries: config.negotiation.max_link_retries,
            retry_delay: Duration::from_millis(u64::from(config.negotiation.retry_delay_ms)),
            sweep_interval: Duration::from_millis(u64::from(config.negotiation.sweep_interval_ms)),
            share_quality: config.capture.quality,
            capture_audio: config.capture.audio,
            max_history: config.messages.max_history as usize,
            max_message_length: config.messages.max_length as usize,
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self::from_config(&ClasscastConfig::default())
    }
}
