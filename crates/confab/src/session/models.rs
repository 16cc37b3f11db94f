//! Session data models.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Live session bound to one conversation.
///
/// Exactly one of these exists per conversation id at any instant; a model
/// switch replaces the record rather than mutating it in place.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub conversation_id: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub message_count: u64,
}

impl ChatSession {
    pub fn new(conversation_id: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            model: model.into(),
            created_at: now,
            last_active_at: now,
            message_count: 0,
        }
    }

    /// Time since the last recorded activity.
    pub fn idle_duration(&self) -> chrono::Duration {
        Utc::now() - self.last_active_at
    }
}

/// Registry view of a session, reported whether or not one exists.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub message_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_seconds: Option<i64>,
}

impl SessionStats {
    /// Stats for a conversation with no live session.
    pub fn absent() -> Self {
        Self {
            exists: false,
            model: None,
            message_count: 0,
            idle_seconds: None,
        }
    }
}

/// Configuration for the session lifecycle service.
#[derive(Debug, Clone)]
pub struct SessionServiceConfig {
    /// Inactivity duration after which a session becomes reclaimable.
    pub idle_timeout_secs: u64,
    /// How often the idle reaper sweeps.
    pub sweep_interval_secs: u64,
    /// Most-recent history entries replayed into a fresh session.
    pub max_history_messages: usize,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 60,
            max_history_messages: 50,
        }
    }
}
