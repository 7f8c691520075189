//! Session store: maps session ids to the participants connected to them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use classcast_common::{ParticipantId, SessionId};
use classcast_mesh::protocol::{ParticipantInfo, Role};
use tokio::sync::{mpsc, RwLock};

/// Queue of JSON frames for one connected client.
pub type Outbox = mpsc::Sender<String>;

struct Member {
    info: ParticipantInfo,
    tx: Outbox,
}

/// One classroom: at most one teacher plus students, in join order.
pub struct Session {
    teacher: Option<ParticipantId>,
    members: Vec<Member>,
    created_at: Instant,
}

impl Session {
    fn others(&self, except: &ParticipantId) -> Vec<Outbox> {
        self.members
            .iter()
            .filter(|m| &m.info.participant_id != except)
            .map(|m| m.tx.clone())
            .collect()
    }
}

/// Result of a successful join.
pub struct JoinTicket {
    /// The join opened a new session.
    pub created: bool,
    /// Everyone in the session, the joiner included.
    pub participants: Vec<ParticipantInfo>,
    /// Everyone except the joiner.
    pub others: Vec<Outbox>,
}

/// What a departure did to its session.
pub enum Departure {
    NotFound,
    Left { others: Vec<Outbox> },
    /// The teacher left; the session is gone.
    SessionEnded { others: Vec<Outbox> },
}

/// Thread-safe session store.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
    max_participants: usize,
}

impl SessionStore {
    pub fn new(max_participants: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_participants,
        }
    }

    /// Add a participant. A teacher opens the session; a student needs one
    /// to exist already.
    pub async fn join(
        &self,
        session_id: &SessionId,
        info: ParticipantInfo,
        tx: Outbox,
    ) -> Result<JoinTicket, &'static str> {
        let mut map = self.sessions.write().await;
        let mut created = false;
        let session = match (info.role, map.contains_key(session_id)) {
            (Role::Student, false) => return Err("session not found"),
            (Role::Teacher, false) => {
                created = true;
                map.entry(session_id.clone()).or_insert_with(|| Session {
                    teacher: None,
                    members: Vec::new(),
                    created_at: Instant::now(),
                })
            }
            (_, true) => map.get_mut(session_id).ok_or("session not found")?,
        };

        if info.role == Role::Teacher && session.teacher.is_some() {
            return Err("session already has a teacher");
        }
        if session.members.len() >= self.max_participants {
            return Err("session is full");
        }
        if info.role == Role::Teacher {
            session.teacher = Some(info.participant_id.clone());
        }

        let others = session.others(&info.participant_id);
        session.members.push(Member { info, tx });
        Ok(JoinTicket {
            created,
            participants: session.members.iter().map(|m| m.info.clone()).collect(),
            others,
        })
    }

    /// Sender of one participant, if it is in the session.
    pub async fn sender(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> Option<Outbox> {
        let map = self.sessions.read().await;
        map.get(session_id)?
            .members
            .iter()
            .find(|m| &m.info.participant_id == participant_id)
            .map(|m| m.tx.clone())
    }

    pub async fn teacher_sender(&self, session_id: &SessionId) -> Option<Outbox> {
        let map = self.sessions.read().await;
        let session = map.get(session_id)?;
        let teacher = session.teacher.as_ref()?;
        session
            .members
            .iter()
            .find(|m| &m.info.participant_id == teacher)
            .map(|m| m.tx.clone())
    }

    pub async fn others(&self, session_id: &SessionId, except: &ParticipantId) -> Vec<Outbox> {
        let map = self.sessions.read().await;
        map.get(session_id)
            .map(|s| s.others(except))
            .unwrap_or_default()
    }

    /// Remove a participant. The teacher leaving ends the session.
    pub async fn leave(&self, session_id: &SessionId, participant_id: &ParticipantId) -> Departure {
        let mut map = self.sessions.write().await;
        let Some(session) = map.get_mut(session_id) else {
            return Departure::NotFound;
        };
        let Some(pos) = session
            .members
            .iter()
            .position(|m| &m.info.participant_id == participant_id)
        else {
            return Departure::NotFound;
        };
        session.members.remove(pos);
        let others = session.others(participant_id);

        if session.teacher.as_ref() == Some(participant_id) {
            map.remove(session_id);
            return Departure::SessionEnded { others };
        }
        Departure::Left { others }
    }

    /// Remove sessions older than `max_age` whose clients are all gone.
    pub async fn reap_stale(&self, max_age: Duration) -> usize {
        let mut map = self.sessions.write().await;
        let now = Instant::now();
        let before = map.len();
        map.retain(|id, session| {
            let abandoned = session.members.iter().all(|m| m.tx.is_closed());
            let stale = abandoned && now.duration_since(session.created_at) > max_age;
            if stale {
                tracing::info!(session_id = %id, "Reaping stale session");
            }
            !stale
        });
        before - map.len()
    }

    pub async fn exists(&self, session_id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Number of active sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn participant_count(&self, session_id: &SessionId) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map_or(0, |s| s.members.len())
    }
}
