//! Live session registry keyed by session id

use super::{NegotiationState, SessionId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Diagnostic record of one live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub id: SessionId,
    /// Remote address (gateway) or URL (dial mode)
    pub remote: String,
    pub state: NegotiationState,
    pub connected_at: DateTime<Utc>,
}

/// All sessions currently being served
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: SessionId, remote: impl Into<String>) {
        let entry = SessionEntry {
            id: id.clone(),
            remote: remote.into(),
            state: NegotiationState::Idle,
            connected_at: Utc::now(),
        };
        debug!("Registering session {} ({})", id, entry.remote);
        self.sessions.write().insert(id, entry);
    }

    pub fn update_state(&self, id: &SessionId, state: NegotiationState) {
        if let Some(entry) = self.sessions.write().get_mut(id) {
            entry.state = state;
        }
    }

    pub fn remove(&self, id: &SessionId) -> Option<SessionEntry> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            debug!("Removed session {}", id);
        }
        removed
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionEntry> {
        self.sessions.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Entries ordered by connection time
    pub fn snapshot(&self) -> Vec<SessionEntry> {
        let mut entries: Vec<_> = self.sessions.read().values().cloned().collect();
        entries.sort_by_key(|e| e.connected_at);
        entries
    }
}
