// Bounded in-memory session store.
//
// Sessions live for the process lifetime unless evicted. At capacity the
// oldest session with no phase in flight makes room. In-flight work is
// counted here, apart from `Session::status`, so a session is never dropped
// while a phase is running against it.

use std::collections::{HashMap, VecDeque};

use crate::error::SessionError;

use super::Session;

pub const DEFAULT_MAX_SESSIONS: usize = 1024;

pub struct SessionStore {
    sessions: HashMap<String, Session>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
    /// Phases (or whole runs) currently executing, per session.
    in_flight: HashMap<String, usize>,
    capacity: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sessions: HashMap::new(),
            order: VecDeque::with_capacity(capacity.min(DEFAULT_MAX_SESSIONS)),
            in_flight: HashMap::new(),
            capacity,
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(session_id)
    }

    /// Insert a fresh session, evicting the oldest idle one when full.
    pub fn insert(&mut self, session: Session) -> Result<(), SessionError> {
        if self.sessions.contains_key(&session.session_id) {
            return Err(SessionError::AlreadyExists(session.session_id));
        }
        if self.sessions.len() >= self.capacity {
            self.evict_one()?;
        }
        self.order.push_back(session.session_id.clone());
        self.sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    /// Mark work in flight on `session_id` and hand out the entry. Every
    /// `acquire` must be paired with a `release`.
    pub fn acquire(&mut self, session_id: &str) -> Result<&mut Session, SessionError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        *self.in_flight.entry(session_id.to_string()).or_insert(0) += 1;
        Ok(session)
    }

    /// Drop one in-flight mark. Returns `true` while other work is still
    /// running against the session.
    pub fn release(&mut self, session_id: &str) -> bool {
        match self.in_flight.get_mut(session_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.in_flight.remove(session_id);
                false
            }
            None => false,
        }
    }

    /// Newest first.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &Session> {
        self.order.iter().rev().filter_map(|id| self.sessions.get(id))
    }

    fn evict_one(&mut self) -> Result<(), SessionError> {
        let position = self
            .order
            .iter()
            .position(|id| !self.in_flight.contains_key(id))
            .ok_or(SessionError::CapacityExhausted(self.sessions.len()))?;

        if let Some(id) = self.order.remove(position) {
            self.sessions.remove(&id);
            tracing::info!(session_id = %id, "workflow: evicted session to stay within capacity");
        }
        Ok(())
    }
}
