//! Broadcast hub mapping conversations to live viewer connections.

use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::types::ViewerEvent;

/// Size of the per-viewer send buffer.
const VIEWER_BUFFER_SIZE: usize = 64;

/// A sender delivering events to one viewer connection.
pub type ViewerSender = mpsc::Sender<ViewerEvent>;

struct Viewer {
    id: u64,
    tx: ViewerSender,
}

/// Hub re-emitting exchange and lifecycle events to every viewer of a
/// conversation.
///
/// A conversation's entry exists only while it has subscribers: the first
/// subscribe creates it and removing the last viewer drops it entirely.
#[derive(Default)]
pub struct BroadcastHub {
    /// Conversation id -> live viewers.
    subscribers: DashMap<String, Vec<Viewer>>,
    next_viewer_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_viewer_id: AtomicU64::new(0),
        }
    }

    /// Register a viewer for a conversation.
    ///
    /// Returns the viewer id (needed to unsubscribe) and the event receiver.
    /// The new viewer alone is immediately told the session is ready.
    pub fn subscribe(&self, conversation_id: &str) -> (u64, mpsc::Receiver<ViewerEvent>) {
        let (tx, rx) = mpsc::channel(VIEWER_BUFFER_SIZE);
        let id = self.next_viewer_id.fetch_add(1, Ordering::Relaxed);

        // A fresh channel always has room for the ready notice
        let _ = tx.try_send(ViewerEvent::SessionIdle {});

        self.subscribers
            .entry(conversation_id.to_string())
            .or_default()
            .push(Viewer { id, tx });

        info!("Viewer {} subscribed to {}", id, conversation_id);
        (id, rx)
    }

    /// Remove a viewer. The conversation's entry is dropped entirely once no
    /// viewers remain.
    pub fn unsubscribe(&self, conversation_id: &str, viewer_id: u64) {
        if let Some(mut viewers) = self.subscribers.get_mut(conversation_id) {
            viewers.retain(|viewer| viewer.id != viewer_id);
            debug!("Viewer {} unsubscribed from {}", viewer_id, conversation_id);
        }

        self.subscribers
            .remove_if(conversation_id, |_, viewers| viewers.is_empty());
    }

    /// Deliver an event to every viewer of a conversation.
    ///
    /// A conversation with no subscribers is a silent no-op. Closed or stale
    /// viewers are skipped without aborting delivery to the rest.
    pub async fn broadcast(&self, conversation_id: &str, event: &ViewerEvent) {
        let targets: Vec<(u64, ViewerSender)> = match self.subscribers.get(conversation_id) {
            Some(viewers) => viewers
                .iter()
                .filter(|viewer| !viewer.tx.is_closed())
                .map(|viewer| (viewer.id, viewer.tx.clone()))
                .collect(),
            None => return,
        };

        for (viewer_id, tx) in targets {
            if tx.send(event.clone()).await.is_err() {
                warn!(
                    "Failed to deliver event to viewer {} of {}",
                    viewer_id, conversation_id
                );
            }
        }

        // Drop viewers whose connection went away without unsubscribing
        if let Some(mut viewers) = self.subscribers.get_mut(conversation_id) {
            viewers.retain(|viewer| !viewer.tx.is_closed());
        }
        self.subscribers
            .remove_if(conversation_id, |_, viewers| viewers.is_empty());
    }

    /// Number of live viewers for a conversation.
    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        self.subscribers
            .get(conversation_id)
            .map(|viewers| viewers.len())
            .unwrap_or(0)
    }

    /// Whether any conversation entry exists for the id.
    pub fn has_entry(&self, conversation_id: &str) -> bool {
        self.subscribers.contains_key(conversation_id)
    }
}
