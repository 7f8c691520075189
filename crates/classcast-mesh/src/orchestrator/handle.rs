use tokio::sync::mpsc;

use super::types::SessionCommand;
use crate::protocol::MessageKind;

/// Cloneable handle a UI uses to drive a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub(crate) fn new() -> (Self, mpsc::Receiver<SessionCommand>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        (Self { command_tx }, command_rx)
    }

    pub async fn start_capture(&self) {
        self.send(SessionCommand::StartCapture).await;
    }

    pub async fn stop_capture(&self) {
        self.send(SessionCommand::StopCapture).await;
    }

    pub async fn ask_question(&self, text: impl Into<String>) {
        self.send(SessionCommand::SendMessage {
            kind: MessageKind::Question,
            text: text.into(),
        })
        .await;
    }

    pub async fn send_chat(&self, text: impl Into<String>) {
        self.send(SessionCommand::SendMessage {
            kind: MessageKind::Chat,
            text: text.into(),
        })
        .await;
    }

    pub async fn leave(&self) {
        self.send(SessionCommand::Leave).await;
    }

    /// The session task has stopped.
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    async fn send(&self, command: SessionCommand) {
        let _ = self.command_tx.send(command).await;
    }
}
