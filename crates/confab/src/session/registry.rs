//! In-memory session registry.
//!
//! Sole source of truth for "does an active session exist". The registry only
//! stores and reports; creation and destruction logic lives in the lifecycle
//! service, which receives the registry as an explicit instance (no ambient
//! global).

use chrono::Utc;
use dashmap::DashMap;

use super::models::{ChatSession, SessionStats};

/// Registry of live sessions, keyed by conversation id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, ChatSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Look up a session. Never creates.
    pub fn get(&self, conversation_id: &str) -> Option<ChatSession> {
        self.sessions
            .get(conversation_id)
            .map(|entry| entry.value().clone())
    }

    /// Register or replace the session for a conversation.
    pub fn put(&self, session: ChatSession) {
        self.sessions
            .insert(session.conversation_id.clone(), session);
    }

    /// Evict a session. Idempotent.
    pub fn remove(&self, conversation_id: &str) -> Option<ChatSession> {
        self.sessions.remove(conversation_id).map(|(_, s)| s)
    }

    /// Refresh a session's activity stamp. The stamp never moves backward.
    pub fn touch(&self, conversation_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(conversation_id) {
            let now = Utc::now();
            if now > session.last_active_at {
                session.last_active_at = now;
            }
        }
    }

    /// Bump a session's message counter.
    pub fn add_messages(&self, conversation_id: &str, count: u64) {
        if let Some(mut session) = self.sessions.get_mut(conversation_id) {
            session.message_count += count;
        }
    }

    /// Report on a conversation's session. Absent ids report `exists: false`
    /// rather than failing.
    pub fn stats(&self, conversation_id: &str) -> SessionStats {
        match self.get(conversation_id) {
            Some(session) => SessionStats {
                exists: true,
                model: Some(session.model.clone()),
                message_count: session.message_count,
                idle_seconds: Some(session.idle_duration().num_seconds().max(0)),
            },
            None => SessionStats::absent(),
        }
    }

    /// Snapshot of every live session, for sweeps and shutdown.
    pub fn snapshot(&self) -> Vec<ChatSession> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
