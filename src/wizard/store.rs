//! In-memory session store.
//!
//! Sessions live behind one async `RwLock`. Every mutation goes through
//! [`SessionStore::update`], which applies the change to a copy and only
//! commits it if the closure succeeds, so a failed operation never leaves a
//! half-modified session behind. Step changes are published on a broadcast
//! channel.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::{BettingSession, BettingStep};
use crate::types::AdvisorError;

/// Events buffered per subscriber before old ones are dropped.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Created { id: Uuid },
    StepChanged { id: Uuid, from: BettingStep, to: BettingStep },
    Removed { id: Uuid },
}

pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, BettingSession>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sessions: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Open a new session, optionally already on a race.
    pub async fn create(&self, race_id: Option<String>) -> BettingSession {
        let session = BettingSession::new(race_id);
        self.sessions.write().await.insert(session.id, session.clone());
        info!(session_id = %session.id, race_id = ?session.race_id, "Session created");
        self.publish(SessionEvent::Created { id: session.id });
        session
    }

    pub async fn get(&self, id: Uuid) -> Result<BettingSession, AdvisorError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(AdvisorError::SessionNotFound(id))
    }

    /// Run `f` against the session and commit the result only on success.
    ///
    /// Returns the closure's value and the committed session.
    pub async fn update<T, F>(&self, id: Uuid, f: F) -> Result<(T, BettingSession), AdvisorError>
    where
        F: FnOnce(&mut BettingSession) -> Result<T, AdvisorError>,
    {
        let mut sessions = self.sessions.write().await;
        let current = sessions.get(&id).ok_or(AdvisorError::SessionNotFound(id))?;

        let mut draft = current.clone();
        let before = draft.step;
        let value = f(&mut draft)?;
        let after = draft.step;
        sessions.insert(id, draft.clone());
        drop(sessions);

        if before != after {
            debug!(session_id = %id, from = %before, to = %after, "Session step changed");
            self.publish(SessionEvent::StepChanged {
                id,
                from: before,
                to: after,
            });
        }
        Ok((value, draft))
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), AdvisorError> {
        self.sessions
            .write()
            .await
            .remove(&id)
            .ok_or(AdvisorError::SessionNotFound(id))?;
        info!(session_id = %id, "Session removed");
        self.publish(SessionEvent::Removed { id });
        Ok(())
    }

    /// Drop sessions untouched for longer than `max_idle`. Returns how many
    /// were removed.
    pub async fn purge_idle(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let mut sessions = self.sessions.write().await;
        let stale: Vec<Uuid> = sessions
            .values()
            .filter(|s| s.updated_at < cutoff)
            .map(|s| s.id)
            .collect();
        for id in &stale {
            sessions.remove(id);
        }
        drop(sessions);

        for id in &stale {
            self.publish(SessionEvent::Removed { id: *id });
        }
        if !stale.is_empty() {
            info!(removed = stale.len(), "Idle sessions purged");
        }
        stale.len()
    }

    /// All sessions, oldest first.
    pub async fn snapshot(&self) -> Vec<BettingSession> {
        let mut all: Vec<BettingSession> = self.sessions.read().await.values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        all
    }

    /// Load sessions from a snapshot, replacing any with the same id.
    pub async fn restore(&self, sessions: Vec<BettingSession>) -> usize {
        let mut map = self.sessions.write().await;
        let count = sessions.len();
        for session in sessions {
            map.insert(session.id, session);
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
