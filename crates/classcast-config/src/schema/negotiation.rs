//! Offer/answer timing and link retry policy.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Seconds a link may sit in `OfferSent`/`OfferReceived` before it is
    /// considered stalled and closed.
    pub timeout_secs: u32,
    /// Re-establishment attempts after a link fails. 0 disables retrying.
    pub max_link_retries: u32,
    /// Delay before each re-establishment attempt, in milliseconds.
    pub retry_delay_ms: u32,
    /// How often stalled negotiations and due retries are checked.
    pub sweep_interval_ms: u32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_link_retries: 3,
            retry_delay_ms: 1000,
            sweep_interval_ms: 500,
        }
    }
}
