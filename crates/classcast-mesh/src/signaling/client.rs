//! Public handle for the relay connection.

use std::sync::Arc;

use async_trait::async_trait;
use classcast_common::MeshError;
use classcast_config::schema::SignalingConfig;
use tokio::sync::{mpsc, RwLock};

use super::connection::{connection_loop, SignalingCommand};
use super::{SignalingChannel, SignalingEvent};
use crate::protocol::ClientMessage;

/// Handle for the WebSocket connection to the relay.
///
/// Sending never blocks on the socket; frames go through the background
/// connection task.
pub struct SignalingClient {
    command_tx: mpsc::Sender<SignalingCommand>,
    connected: Arc<RwLock<bool>>,
}

impl SignalingClient {
    /// Create a client and start the background connection.
    /// Returns `(client, event_receiver)`.
    pub fn connect(config: SignalingConfig) -> (Self, mpsc::Receiver<SignalingEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        let connected = Arc::new(RwLock::new(false));

        let client = Self {
            command_tx,
            connected: Arc::clone(&connected),
        };

        tokio::spawn(connection_loop(config, connected, event_tx, command_rx));

        (client, event_rx)
    }

    /// A second handle on the same connection.
    pub fn clone_sender(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            connected: Arc::clone(&self.connected),
        }
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Close the socket and stop reconnecting.
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(SignalingCommand::Disconnect).await;
    }
}

#[async_trait]
impl SignalingChannel for SignalingClient {
    async fn send(&self, message: ClientMessage) -> Result<(), MeshError> {
        if !self.is_connected().await {
            return Err(MeshError::SignalingUnavailable(
                "not connected to relay".into(),
            ));
        }
        self.command_tx
            .send(SignalingCommand::Send(message))
            .await
            .map_err(|_| MeshError::SignalingUnavailable("signaling task stopped".into()))
    }

    async fn close(&self) {
        self.disconnect().await;
    }
}
