//! Application state shared across handlers.

use std::sync::Arc;

use crate::gateway::GatewayClient;
use crate::relay::StreamingRelay;
use crate::session::{SessionRegistry, SessionService};
use crate::storage::ConversationStore;
use crate::ws::BroadcastHub;

/// Application state shared across all handlers.
///
/// Every component is an explicit instance wired at startup; nothing here is
/// reachable through a global.
#[derive(Clone)]
pub struct AppState {
    /// Client for the upstream provider process.
    pub gateway: Arc<GatewayClient>,
    /// Session registry: existence checks and metadata.
    pub registry: Arc<SessionRegistry>,
    /// Session lifecycle service.
    pub sessions: Arc<SessionService>,
    /// Streaming relay for exchanges.
    pub relay: Arc<StreamingRelay>,
    /// Broadcast hub for viewer connections.
    pub hub: Arc<BroadcastHub>,
    /// Conversation storage collaborator.
    pub store: Arc<dyn ConversationStore>,
    /// Model used when a conversation has no recorded preference.
    pub default_model: String,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        gateway: Arc<GatewayClient>,
        registry: Arc<SessionRegistry>,
        sessions: Arc<SessionService>,
        relay: Arc<StreamingRelay>,
        hub: Arc<BroadcastHub>,
        store: Arc<dyn ConversationStore>,
        default_model: String,
    ) -> Self {
        Self {
            gateway,
            registry,
            sessions,
            relay,
            hub,
            store,
            default_model,
        }
    }
}
