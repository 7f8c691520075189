//! Questions and chat lines received during a session.
//!
//! Stored in a bounded ring buffer so memory stays predictable in long
//! lessons. Entries are timestamped on receipt.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use classcast_common::{MeshError, ParticipantId};

use crate::protocol::{MessageKind, MessagePayload};

#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub sender_id: ParticipantId,
    /// Display name at the time of receipt, if the sender was known.
    pub sender_name: Option<String>,
    pub kind: MessageKind,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

pub struct MessageLog {
    max_history: usize,
    max_length: usize,
    entries: VecDeque<ReceivedMessage>,
}

impl MessageLog {
    pub fn new(max_history: usize, max_length: usize) -> Self {
        Self {
            max_history: max_history.max(1),
            max_length,
            entries: VecDeque::new(),
        }
    }

    /// Store an incoming message, truncating overlong text. The oldest entry
    /// is evicted when the log is full.
    pub fn record(
        &mut self,
        sender_id: ParticipantId,
        sender_name: Option<String>,
        payload: MessagePayload,
    ) -> &ReceivedMessage {
        if self.entries.len() >= self.max_history {
            self.entries.pop_front();
        }
        let text = if payload.text.chars().count() > self.max_length {
            payload.text.chars().take(self.max_length).collect()
        } else {
            payload.text
        };
        self.entries.push_back(ReceivedMessage {
            sender_id,
            sender_name,
            kind: payload.kind,
            text,
            received_at: Utc::now(),
        });
        &self.entries[self.entries.len() - 1]
    }

    /// Trim and check text before it is sent.
    pub fn validate_outgoing(&self, text: &str) -> Result<String, MeshError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MeshError::Protocol("message is empty".into()));
        }
        let len = text.chars().count();
        if len > self.max_length {
            return Err(MeshError::Protocol(format!(
                "message is {len} characters, limit is {}",
                self.max_length
            )));
        }
        Ok(text.to_string())
    }

    /// The most recent `limit` messages, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<&ReceivedMessage> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).collect()
    }

    pub fn questions(&self) -> Vec<&ReceivedMessage> {
        self.entries
            .iter()
            .filter(|m| m.kind == MessageKind::Question)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
