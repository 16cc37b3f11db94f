//! Viewer wire protocol.
//!
//! Every frame sent to a viewer is an `{event, data}` envelope. Event names
//! and payload field names are a published contract; payload fields are
//! camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::relay::ExchangeEvent;

/// Events sent to viewers, serialized as `{event, data}` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ViewerEvent {
    /// Sent once to a viewer immediately on subscription.
    #[serde(rename = "session:idle")]
    SessionIdle {},

    /// An exchange began.
    #[serde(rename = "message:start", rename_all = "camelCase")]
    MessageStart { message_id: String },

    /// Incremental fragment, never the accumulated value.
    #[serde(rename = "message:delta", rename_all = "camelCase")]
    MessageDelta { message_id: String, content: String },

    /// The entire accumulated message.
    #[serde(rename = "message:complete", rename_all = "camelCase")]
    MessageComplete {
        message_id: String,
        full_content: String,
    },

    /// The exchange failed; `error` is a short human-readable string.
    #[serde(rename = "message:error", rename_all = "camelCase")]
    MessageError { message_id: String, error: String },

    /// Reply to an application-level ping.
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
}

impl From<&ExchangeEvent> for ViewerEvent {
    fn from(event: &ExchangeEvent) -> Self {
        match event {
            ExchangeEvent::Start { message_id } => Self::MessageStart {
                message_id: message_id.clone(),
            },
            ExchangeEvent::Delta {
                message_id,
                content,
            } => Self::MessageDelta {
                message_id: message_id.clone(),
                content: content.clone(),
            },
            ExchangeEvent::Complete {
                message_id,
                full_content,
            } => Self::MessageComplete {
                message_id: message_id.clone(),
                full_content: full_content.clone(),
            },
            ExchangeEvent::Error {
                message_id,
                message,
            } => Self::MessageError {
                message_id: message_id.clone(),
                error: message.clone(),
            },
        }
    }
}

/// Messages viewers may send to the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerMessage {
    /// Application-level liveness probe, answered with `pong`. Distinct from
    /// transport pings so clients behind proxies that strip those still get
    /// a signal.
    Ping,
}
