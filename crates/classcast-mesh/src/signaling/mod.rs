//! Transport to the signaling relay.
//!
//! The orchestrator only needs `SignalingChannel::send` plus a stream of
//! `SignalingEvent`s. `SignalingClient` provides both over a WebSocket.

mod client;
mod connection;

use async_trait::async_trait;
use classcast_common::MeshError;

use crate::protocol::{ClientMessage, ServerMessage};

pub use client::SignalingClient;

/// Outbound half of the signaling transport.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Fails with `MeshError::SignalingUnavailable` while the transport is down.
    async fn send(&self, message: ClientMessage) -> Result<(), MeshError>;

    /// Shut the transport down for good.
    async fn close(&self) {}
}

/// Inbound half: what the transport reports to the orchestrator.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    Connected,
    Disconnected { reason: String },
    Message(ServerMessage),
}
