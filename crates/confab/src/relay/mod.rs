//! Streaming relay.
//!
//! Drives one exchange against a live session, normalizing the provider's
//! raw event stream into the four-event exchange protocol. An exchange is
//! exposed as a channel of tagged [`ExchangeEvent`]s rather than a callback
//! trio, so "exactly one terminal event" is enforced by the pump loop rather
//! than by convention.

use dashmap::DashMap;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::gateway::{DeltaKind, GatewayClient, GatewayEvent};
use crate::session::SessionRegistry;

/// Buffer size for a single exchange's event channel.
const EXCHANGE_BUFFER_SIZE: usize = 64;

/// Events of one exchange, in protocol order: `Start`, zero or more `Delta`s,
/// then exactly one of `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeEvent {
    Start {
        message_id: String,
    },
    /// Carries only the new fragment, never the accumulated value.
    Delta {
        message_id: String,
        content: String,
    },
    Complete {
        message_id: String,
        full_content: String,
    },
    Error {
        message_id: String,
        message: String,
    },
}

impl ExchangeEvent {
    /// Whether this event ends the exchange.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// Relay driving exchanges and normalizing provider events.
pub struct StreamingRelay {
    gateway: Arc<GatewayClient>,
    registry: Arc<SessionRegistry>,
    /// Conversation id -> message id of the in-flight exchange.
    in_flight: Arc<DashMap<String, String>>,
}

impl StreamingRelay {
    pub fn new(gateway: Arc<GatewayClient>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            gateway,
            registry,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Start one exchange on a conversation's session.
    ///
    /// Returns the message id assigned to the exchange and the event stream.
    /// A send with no registered session, or while another exchange is in
    /// flight on the same conversation, is a caller-contract violation: the
    /// stream yields exactly one `Error` and nothing else.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        prompt: &str,
    ) -> (String, mpsc::Receiver<ExchangeEvent>) {
        let (tx, rx) = mpsc::channel(EXCHANGE_BUFFER_SIZE);
        let message_id = Uuid::new_v4().to_string();

        if self.registry.get(conversation_id).is_none() {
            let _ = tx
                .send(ExchangeEvent::Error {
                    message_id: message_id.clone(),
                    message: format!("No active session for conversation {}", conversation_id),
                })
                .await;
            return (message_id, rx);
        }

        if self.in_flight.contains_key(conversation_id) {
            let _ = tx
                .send(ExchangeEvent::Error {
                    message_id: message_id.clone(),
                    message: format!(
                        "An exchange is already in flight for conversation {}",
                        conversation_id
                    ),
                })
                .await;
            return (message_id, rx);
        }

        self.in_flight
            .insert(conversation_id.to_string(), message_id.clone());

        // Activity is counted at exchange start, not completion
        self.registry.add_messages(conversation_id, 1);
        self.registry.touch(conversation_id);

        // Subscribe before prompting so no event can slip past
        let events = self.gateway.subscribe();

        if let Err(e) = self.gateway.prompt(conversation_id, prompt).await {
            self.in_flight.remove(conversation_id);
            let _ = tx
                .send(ExchangeEvent::Error {
                    message_id: message_id.clone(),
                    message: format!("Failed to send prompt: {}", e),
                })
                .await;
            return (message_id, rx);
        }

        let _ = tx
            .send(ExchangeEvent::Start {
                message_id: message_id.clone(),
            })
            .await;

        let in_flight = Arc::clone(&self.in_flight);
        let conversation = conversation_id.to_string();
        let exchange_id = message_id.clone();
        tokio::spawn(async move {
            pump_exchange(conversation.clone(), exchange_id, events, tx).await;
            in_flight.remove(&conversation);
        });

        (message_id, rx)
    }

    /// Request upstream cancellation of the in-flight exchange. No-op if the
    /// conversation has no session. Deltas already scheduled may still
    /// arrive; the terminal event fires once the provider settles.
    pub async fn abort_message(&self, conversation_id: &str) {
        if self.registry.get(conversation_id).is_none() {
            debug!("Abort for {} ignored, no session", conversation_id);
            return;
        }

        if let Err(e) = self.gateway.abort(conversation_id).await {
            warn!("Abort request for {} failed: {:#}", conversation_id, e);
        }
    }

    /// Whether a conversation currently has an exchange in flight.
    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.in_flight.contains_key(conversation_id)
    }
}

/// Consume provider events for one exchange until a terminal event fires.
///
/// Deltas append to a running buffer and forward only the fragment; a
/// final-message or idle event completes the exchange with the accumulated
/// buffer; an upstream error terminates it. Reasoning deltas are observed
/// for stream position but never forwarded.
async fn pump_exchange(
    conversation_id: String,
    message_id: String,
    mut events: broadcast::Receiver<GatewayEvent>,
    tx: mpsc::Sender<ExchangeEvent>,
) {
    let mut buffer = String::new();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    "Exchange {} lagged behind the provider stream by {} events",
                    message_id, skipped
                );
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                let _ = tx
                    .send(ExchangeEvent::Error {
                        message_id,
                        message: "Provider stream closed mid-exchange".to_string(),
                    })
                    .await;
                return;
            }
        };

        if event.session_id() != conversation_id {
            continue;
        }

        match event {
            GatewayEvent::Delta { kind, content, .. } => {
                if kind != DeltaKind::Text {
                    continue;
                }
                buffer.push_str(&content);
                if tx
                    .send(ExchangeEvent::Delta {
                        message_id: message_id.clone(),
                        content,
                    })
                    .await
                    .is_err()
                {
                    debug!("Exchange {} receiver dropped, stopping pump", message_id);
                    return;
                }
            }
            GatewayEvent::FinalMessage { .. } | GatewayEvent::Idle { .. } => {
                let _ = tx
                    .send(ExchangeEvent::Complete {
                        message_id,
                        full_content: buffer,
                    })
                    .await;
                return;
            }
            GatewayEvent::Error { message, .. } => {
                let _ = tx
                    .send(ExchangeEvent::Error {
                        message_id,
                        message,
                    })
                    .await;
                return;
            }
        }
    }
}
