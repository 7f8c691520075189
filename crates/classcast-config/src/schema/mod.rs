//! Configuration schema types for classcast.
//!
//! All structs use `serde(default)` so partial configs work correctly.
//! Missing fields are filled with defaults that match a single-machine
//! classroom: relay on localhost:5000, one public STUN server.

mod capture;
mod ice;
mod logging;
mod messages;
mod negotiation;
mod relay;
mod signaling;

pub use capture::*;
pub use ice::*;
pub use logging::*;
pub use messages::*;
pub use negotiation::*;
pub use relay::*;
pub use signaling::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
///
/// Shared by the client library and the relay binary; each reads the
/// sections it needs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClasscastConfig {
    pub signaling: SignalingConfig,
    pub ice: IceConfig,
    pub negotiation: NegotiationConfig,
    pub capture: CaptureConfig,
    pub messages: MessagesConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}
