//! Local view of who is in the session.
//!
//! Pure state: no I/O, no timers. The orchestrator applies relay events here
//! and reads the result to decide which peer links must exist.

use std::collections::BTreeMap;

use classcast_common::ParticipantId;
use tracing::debug;

use crate::media::MediaStreamHandle;
use crate::protocol::{ParticipantInfo, Role};

/// A member of the session as seen locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub role: Role,
    /// Stream received from this participant, once one has attached.
    pub remote_stream: Option<MediaStreamHandle>,
}

impl Participant {
    pub fn new(id: ParticipantId, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            role,
            remote_stream: None,
        }
    }
}

impl From<&ParticipantInfo> for Participant {
    fn from(info: &ParticipantInfo) -> Self {
        Self::new(info.participant_id.clone(), info.display_name.clone(), info.role)
    }
}

/// What a join did to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Added,
    /// The id was already known; its metadata was refreshed.
    Updated,
}

/// Authoritative local membership, keyed by participant id.
#[derive(Debug, Default)]
pub struct SessionMembershipTracker {
    participants: BTreeMap<ParticipantId, Participant>,
}

impl SessionMembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. An already-known id keeps its attached stream.
    pub fn apply_join(&mut self, participant: Participant) -> JoinOutcome {
        match self.participants.get_mut(&participant.id) {
            Some(existing) => {
                debug!(participant_id = %participant.id, "Join for known participant, updating");
                existing.display_name = participant.display_name;
                existing.role = participant.role;
                JoinOutcome::Updated
            }
            None => {
                self.participants.insert(participant.id.clone(), participant);
                JoinOutcome::Added
            }
        }
    }

    /// Remove a participant. Unknown ids are a no-op.
    pub fn apply_leave(&mut self, id: &ParticipantId) -> Option<Participant> {
        let removed = self.participants.remove(id);
        if removed.is_none() {
            debug!(participant_id = %id, "Leave for unknown participant ignored");
        }
        removed
    }

    /// Record a stream received from `id`. Returns `false` for unknown ids.
    pub fn apply_stream_attached(&mut self, id: &ParticipantId, stream: MediaStreamHandle) -> bool {
        match self.participants.get_mut(id) {
            Some(p) => {
                p.remote_stream = Some(stream);
                true
            }
            None => false,
        }
    }

    /// All participants, ordered by id.
    pub fn snapshot(&self) -> Vec<Participant> {
        self.participants.values().cloned().collect()
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// Every participant other than `self_id`.
    pub fn remote_ids(&self, self_id: &ParticipantId) -> Vec<ParticipantId> {
        self.participants
            .keys()
            .filter(|id| *id != self_id)
            .cloned()
            .collect()
    }

    pub fn teacher(&self) -> Option<&Participant> {
        self.participants.values().find(|p| p.role == Role::Teacher)
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
