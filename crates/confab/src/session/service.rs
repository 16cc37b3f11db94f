//! Session lifecycle management.
//!
//! All session creation and destruction flows through here: idempotent
//! creates, resume-with-fallback, model switches with context
//! transplantation, and the idle sweep. Lifecycle operations on one
//! conversation are serialized behind a per-key lock so concurrent switches
//! or resumes cannot interleave their destroy/create steps.

use anyhow::Result;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::gateway::GatewayClient;
use crate::storage::HistoryMessage;

use super::models::{ChatSession, SessionServiceConfig};
use super::registry::SessionRegistry;

/// Options for resuming a conversation's session.
#[derive(Debug, Clone)]
pub struct ResumeOptions {
    /// Model to use when a fresh session has to be created.
    pub model: String,
    /// Whether to replay prior turns into a freshly created session.
    pub inject_history: bool,
    /// Cap on replayed entries; older context is dropped whole.
    pub max_history_messages: usize,
}

impl ResumeOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            inject_history: true,
            max_history_messages: SessionServiceConfig::default().max_history_messages,
        }
    }
}

/// Service managing session lifecycles against the upstream gateway.
pub struct SessionService {
    gateway: Arc<GatewayClient>,
    registry: Arc<SessionRegistry>,
    config: SessionServiceConfig,
    /// Per-conversation locks serializing lifecycle operations.
    op_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionService {
    pub fn new(
        gateway: Arc<GatewayClient>,
        registry: Arc<SessionRegistry>,
        config: SessionServiceConfig,
    ) -> Self {
        Self {
            gateway,
            registry,
            config,
            op_locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SessionServiceConfig {
        &self.config
    }

    fn conversation_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        self.op_locks
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    fn past_idle_timeout(&self, session: &ChatSession) -> bool {
        session.idle_duration().num_seconds() >= self.config.idle_timeout_secs as i64
    }

    /// Create a session for a conversation. Idempotent: an existing session
    /// is returned unchanged.
    pub async fn create_session(&self, conversation_id: &str, model: &str) -> Result<ChatSession> {
        let lock = self.conversation_lock(conversation_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.registry.get(conversation_id) {
            return Ok(existing);
        }

        self.open_session(conversation_id, model).await
    }

    /// Ensure a live session for a conversation, preferring whatever already
    /// exists: a fresh live session is touched and returned; a stale one is
    /// destroyed first; an upstream-persisted one is reconnected; and only
    /// then is a new session created, with at most the most recent
    /// `max_history_messages` prior turns replayed into it.
    pub async fn resume_session(
        &self,
        conversation_id: &str,
        history: &[HistoryMessage],
        opts: ResumeOptions,
    ) -> Result<ChatSession> {
        let lock = self.conversation_lock(conversation_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.registry.get(conversation_id) {
            if !self.past_idle_timeout(&existing) {
                self.registry.touch(conversation_id);
                return Ok(self.registry.get(conversation_id).unwrap_or(existing));
            }

            info!(
                "Session for {} idle past timeout, destroying before resume",
                conversation_id
            );
            self.teardown(conversation_id).await;
        }

        match self.gateway.resume_session(conversation_id).await {
            Ok(()) => {
                debug!("Reconnected upstream session for {}", conversation_id);
                let mut session = ChatSession::new(conversation_id, &opts.model);
                session.message_count = history.len() as u64;
                self.registry.put(session.clone());
                Ok(session)
            }
            Err(e) => {
                debug!(
                    "Upstream resume failed for {} ({:#}), creating fresh session",
                    conversation_id, e
                );
                let session = self.open_session(conversation_id, &opts.model).await?;

                if opts.inject_history && !history.is_empty() {
                    let start = history.len().saturating_sub(opts.max_history_messages);
                    self.inject_locked(conversation_id, &history[start..]).await;
                }

                Ok(self.registry.get(conversation_id).unwrap_or(session))
            }
        }
    }

    /// Replay prior turns into a conversation's session. Best-effort: losing
    /// context is recoverable, failing to respond is not.
    pub async fn inject_conversation_history(
        &self,
        conversation_id: &str,
        messages: &[HistoryMessage],
    ) {
        let lock = self.conversation_lock(conversation_id);
        let _guard = lock.lock().await;
        self.inject_locked(conversation_id, messages).await;
    }

    /// Injection body; the per-conversation lock must already be held.
    async fn inject_locked(&self, conversation_id: &str, messages: &[HistoryMessage]) {
        if messages.is_empty() {
            return;
        }

        if self.gateway.capabilities().history_injection {
            if let Err(e) = self.gateway.inject_messages(conversation_id, messages).await {
                warn!(
                    "Context injection failed for {} ({} messages): {:#}",
                    conversation_id,
                    messages.len(),
                    e
                );
            }
        } else {
            debug!(
                "Provider does not support history injection, skipping replay for {}",
                conversation_id
            );
        }

        // Bookkeeping advances either way: the turns exist in storage even
        // when the upstream window is missing them.
        self.registry
            .add_messages(conversation_id, messages.len() as u64);
    }

    /// Switch a conversation's session to a different model, carrying
    /// `preserve_history` across. Same model is a no-op success. A failed
    /// switch attempts a compensating restore with the original model; the
    /// error distinguishes whether the restore held.
    pub async fn update_session_model(
        &self,
        conversation_id: &str,
        new_model: &str,
        preserve_history: &[HistoryMessage],
    ) -> Result<ChatSession> {
        let lock = self.conversation_lock(conversation_id);
        let _guard = lock.lock().await;

        let Some(current) = self.registry.get(conversation_id) else {
            anyhow::bail!("session not found for conversation {}", conversation_id);
        };

        if current.model == new_model {
            debug!(
                "Model switch for {} is a no-op, already on {}",
                conversation_id, new_model
            );
            return Ok(current);
        }

        info!(
            "Switching {} from {} to {}",
            conversation_id, current.model, new_model
        );
        self.teardown(conversation_id).await;

        match self.open_session(conversation_id, new_model).await {
            Ok(_) => {
                self.inject_locked(conversation_id, preserve_history).await;
                Ok(self
                    .registry
                    .get(conversation_id)
                    .unwrap_or_else(|| ChatSession::new(conversation_id, new_model)))
            }
            Err(switch_err) => {
                warn!(
                    "Creating {} session for {} failed, restoring {}: {:#}",
                    new_model, conversation_id, current.model, switch_err
                );

                match self.open_session(conversation_id, &current.model).await {
                    Ok(_) => {
                        self.inject_locked(conversation_id, preserve_history).await;
                        Err(switch_err.context(format!(
                            "model switch to {} failed; session restored on {}",
                            new_model, current.model
                        )))
                    }
                    Err(restore_err) => {
                        self.registry.remove(conversation_id);
                        Err(restore_err.context(format!(
                            "model switch to {} failed and restoring {} also failed",
                            new_model, current.model
                        )))
                    }
                }
            }
        }
    }

    /// Destroy a conversation's session. Upstream teardown errors are logged;
    /// the registry entry is evicted regardless so the conversation is never
    /// stuck.
    pub async fn destroy_session(&self, conversation_id: &str) -> Result<()> {
        let lock = self.conversation_lock(conversation_id);
        let _guard = lock.lock().await;

        self.teardown(conversation_id).await;
        Ok(())
    }

    /// Sweep the registry, destroying every session idle past the timeout.
    /// Returns the number of sessions cleaned. A failure on one session still
    /// evicts it and the sweep proceeds.
    pub async fn cleanup_idle_sessions(&self) -> usize {
        let stale: Vec<String> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|session| self.past_idle_timeout(session))
            .map(|session| session.conversation_id)
            .collect();

        let mut cleaned = 0;
        for conversation_id in stale {
            let lock = self.conversation_lock(&conversation_id);
            let _guard = lock.lock().await;

            // The session may have been refreshed while we waited on the lock
            let Some(session) = self.registry.get(&conversation_id) else {
                continue;
            };
            if !self.past_idle_timeout(&session) {
                continue;
            }

            info!(
                "Reclaiming idle session for {} (idle {}s)",
                conversation_id,
                session.idle_duration().num_seconds()
            );
            self.teardown(&conversation_id).await;
            cleaned += 1;
        }

        cleaned
    }

    /// Open and register a session; the per-conversation lock must be held.
    async fn open_session(&self, conversation_id: &str, model: &str) -> Result<ChatSession> {
        self.gateway.create_session(conversation_id, model).await?;

        let session = ChatSession::new(conversation_id, model);
        self.registry.put(session.clone());
        info!("Created session for {} on {}", conversation_id, model);
        Ok(session)
    }

    /// Upstream teardown plus registry eviction; the lock must be held.
    async fn teardown(&self, conversation_id: &str) {
        if let Err(e) = self.gateway.destroy_session(conversation_id).await {
            warn!(
                "Upstream teardown failed for {} (evicting anyway): {:#}",
                conversation_id, e
            );
        }
        self.registry.remove(conversation_id);
    }
}
