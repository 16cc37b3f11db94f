//! HTTP handlers driving the broker core.
//!
//! This is the thin "caller" layer: it fetches context from storage, leans on
//! the lifecycle service and relay, and persists settled exchanges. The
//! broader conversation CRUD surface lives outside this process.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::gateway::{AuthStatusData, GatewayModel};
use crate::relay::ExchangeEvent;
use crate::session::{ResumeOptions, SessionStats};
use crate::storage::{ConversationStore, MessagePatch, MessageRole, MessageStatus};
use crate::ws::{BroadcastHub, ViewerEvent};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /api/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Request body for sending a message.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    /// Overrides the conversation's recorded model for session creation.
    #[serde(default)]
    pub model: Option<String>,
}

/// Accepted-exchange response. Streaming continues over the viewer socket.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message_id: String,
    pub status: String,
}

/// POST /api/conversations/{id}/messages
///
/// Acknowledges with 202 as soon as the exchange starts; delta, complete and
/// error events reach viewers through the broadcast hub.
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<SendMessageResponse>)> {
    if request.content.trim().is_empty() {
        return Err(ApiError::bad_request("message content is required"));
    }

    let snapshot = state
        .store
        .get_conversation(&conversation_id)
        .await?
        .unwrap_or_default();

    let model = request
        .model
        .or_else(|| snapshot.model.clone())
        .unwrap_or_else(|| state.default_model.clone());

    let mut opts = ResumeOptions::new(model);
    opts.max_history_messages = state.sessions.config().max_history_messages;
    state
        .sessions
        .resume_session(&conversation_id, &snapshot.history, opts)
        .await?;

    state
        .store
        .append_message(
            &conversation_id,
            MessageRole::User,
            &request.content,
            MessageStatus::Complete,
        )
        .await?;

    let (message_id, events) = state
        .relay
        .send_message(&conversation_id, &request.content)
        .await;

    info!(conversation_id = %conversation_id, message_id = %message_id, "exchange started");

    tokio::spawn(drain_exchange(
        conversation_id,
        state.hub.clone(),
        state.store.clone(),
        events,
    ));

    Ok((
        StatusCode::ACCEPTED,
        Json(SendMessageResponse {
            message_id,
            status: "accepted".to_string(),
        }),
    ))
}

/// Forward every exchange event to the conversation's viewers and persist the
/// assistant message once the exchange settles.
async fn drain_exchange(
    conversation_id: String,
    hub: Arc<BroadcastHub>,
    store: Arc<dyn ConversationStore>,
    mut events: tokio::sync::mpsc::Receiver<ExchangeEvent>,
) {
    let mut assistant_row: Option<String> = None;

    while let Some(event) = events.recv().await {
        hub.broadcast(&conversation_id, &ViewerEvent::from(&event))
            .await;

        match &event {
            ExchangeEvent::Start { .. } => {
                match store
                    .append_message(
                        &conversation_id,
                        MessageRole::Assistant,
                        "",
                        MessageStatus::Pending,
                    )
                    .await
                {
                    Ok(row) => assistant_row = Some(row.id),
                    Err(e) => warn!(
                        "Failed to persist pending assistant message for {}: {:#}",
                        conversation_id, e
                    ),
                }
            }
            ExchangeEvent::Delta { .. } => {}
            ExchangeEvent::Complete { full_content, .. } => {
                persist_settled(
                    &conversation_id,
                    store.as_ref(),
                    assistant_row.take(),
                    full_content,
                    MessageStatus::Complete,
                )
                .await;
            }
            ExchangeEvent::Error { message, .. } => {
                persist_settled(
                    &conversation_id,
                    store.as_ref(),
                    assistant_row.take(),
                    message,
                    MessageStatus::Error,
                )
                .await;
            }
        }

        if event.is_terminal() {
            break;
        }
    }
}

/// Write the terminal content of an exchange, updating the pending row when
/// one was created and appending otherwise.
async fn persist_settled(
    conversation_id: &str,
    store: &dyn ConversationStore,
    assistant_row: Option<String>,
    content: &str,
    status: MessageStatus,
) {
    let result = match assistant_row {
        Some(row_id) => store
            .update_message(
                &row_id,
                MessagePatch {
                    content: Some(content.to_string()),
                    status: Some(status),
                },
            )
            .await,
        None => store
            .append_message(conversation_id, MessageRole::Assistant, content, status)
            .await
            .map(|_| ()),
    };

    if let Err(e) = result {
        warn!(
            "Failed to persist settled exchange for {}: {:#}",
            conversation_id, e
        );
    }
}

/// POST /api/conversations/{id}/abort
pub async fn abort_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.relay.abort_message(&conversation_id).await;
    Ok(Json(serde_json::json!({ "status": "abort requested" })))
}

/// Request body for switching a conversation's model.
#[derive(Debug, Deserialize)]
pub struct UpdateModelRequest {
    pub model: String,
}

/// PUT /api/conversations/{id}/model
///
/// Destroy-then-create under the hood; prior turns are transplanted into the
/// replacement session.
pub async fn update_model(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(request): Json<UpdateModelRequest>,
) -> ApiResult<Json<SessionStats>> {
    if request.model.trim().is_empty() {
        return Err(ApiError::bad_request("model is required"));
    }

    let snapshot = state
        .store
        .get_conversation(&conversation_id)
        .await?
        .unwrap_or_default();

    state
        .sessions
        .update_session_model(&conversation_id, &request.model, &snapshot.history)
        .await?;

    state
        .store
        .set_conversation_model(&conversation_id, &request.model)
        .await?;

    Ok(Json(state.registry.stats(&conversation_id)))
}

/// GET /api/conversations/{id}/session
pub async fn session_stats(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Json<SessionStats> {
    Json(state.registry.stats(&conversation_id))
}

/// DELETE /api/conversations/{id}/session
pub async fn destroy_session(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.sessions.destroy_session(&conversation_id).await?;
    Ok(Json(serde_json::json!({ "status": "destroyed" })))
}

/// GET /api/models
pub async fn list_models(State(state): State<AppState>) -> ApiResult<Json<Vec<GatewayModel>>> {
    let models = state.gateway.list_models().await?;
    Ok(Json(models))
}

/// GET /api/auth/status
pub async fn auth_status(State(state): State<AppState>) -> ApiResult<Json<AuthStatusData>> {
    let status = state.gateway.auth_status().await?;
    Ok(Json(status))
}
