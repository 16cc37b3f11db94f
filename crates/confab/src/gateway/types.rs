//! Gateway RPC protocol types.
//!
//! The upstream provider process speaks newline-delimited JSON over
//! stdin/stdout: commands go down, request-correlated responses and
//! session-scoped events come back interleaved on stdout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::HistoryMessage;

// ============================================================================
// Commands (sent to the provider via stdin)
// ============================================================================

/// Commands sent to the provider.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Open a new upstream session.
    CreateSession {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        session_id: String,
        model: String,
        streaming: bool,
        context: ContextPolicy,
    },
    /// Reconnect to a persisted upstream session.
    ResumeSession {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        session_id: String,
    },
    /// Send a user prompt into a session.
    Prompt {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        session_id: String,
        message: String,
    },
    /// Abort the in-flight exchange of a session.
    Abort {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        session_id: String,
    },
    /// Replay prior turns into a session for continuity.
    InjectMessages {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        session_id: String,
        messages: Vec<HistoryMessage>,
    },
    /// Tear down an upstream session.
    DestroySession {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        session_id: String,
    },
    /// List the models the provider can serve.
    ListModels {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Report provider authentication state and capabilities.
    AuthStatus {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

/// Context window policy for a new session.
///
/// `AutoExtend` asks the provider to grow the window instead of truncating,
/// so long conversations keep their early turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextPolicy {
    AutoExtend,
    Fixed,
}

// ============================================================================
// Responses (received from the provider via stdout)
// ============================================================================

/// Response to a command.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayResponse {
    #[serde(rename = "type")]
    pub response_type: String, // Always "response"
    pub command: String,
    pub success: bool,
    pub id: Option<String>,
    pub data: Option<Value>,
    pub error: Option<String>,
}

/// One entry of a `list_models` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayModel {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Payload of an `auth_status` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatusData {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Optional transport features, resolved once when the client connects.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayCapabilities {
    /// Whether the provider accepts `inject_messages`.
    pub history_injection: bool,
}

impl GatewayCapabilities {
    pub fn from_list(capabilities: &[String]) -> Self {
        Self {
            history_injection: capabilities.iter().any(|c| c == "history-injection"),
        }
    }
}

// ============================================================================
// Events (streamed from the provider via stdout)
// ============================================================================

/// Events streamed from the provider while a session is working.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Incremental content produced by the model.
    Delta {
        session_id: String,
        #[serde(default)]
        kind: DeltaKind,
        content: String,
    },
    /// The provider assembled the full assistant message.
    FinalMessage { session_id: String, content: String },
    /// The session returned to idle.
    Idle { session_id: String },
    /// The exchange failed upstream.
    Error { session_id: String, message: String },
}

impl GatewayEvent {
    /// Session the event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            Self::Delta { session_id, .. }
            | Self::FinalMessage { session_id, .. }
            | Self::Idle { session_id }
            | Self::Error { session_id, .. } => session_id,
        }
    }
}

/// Kind of content a delta carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    #[default]
    Text,
    /// Chain-of-thought content some models emit. Not forwarded to viewers.
    Reasoning,
}

// ============================================================================
// Message parsing
// ============================================================================

/// A parsed line of provider stdout.
#[derive(Debug, Clone)]
pub enum GatewayMessage {
    Response(GatewayResponse),
    Event(GatewayEvent),
}

impl GatewayMessage {
    /// Parse a JSON line from provider stdout.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(line)?;

        if let Some(msg_type) = value.get("type").and_then(|v| v.as_str()) {
            if msg_type == "response" {
                let response: GatewayResponse = serde_json::from_value(value)?;
                return Ok(GatewayMessage::Response(response));
            }
        }

        let event: GatewayEvent = serde_json::from_value(value)?;
        Ok(GatewayMessage::Event(event))
    }
}
