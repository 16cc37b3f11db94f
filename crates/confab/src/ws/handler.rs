//! WebSocket handler for viewer connections.

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::{ApiError, AppState};

use super::hub::BroadcastHub;
use super::types::{ViewerEvent, ViewerMessage};

/// Handshake query parameters.
#[derive(Debug, Deserialize)]
pub struct ViewerParams {
    pub conversation_id: Option<String>,
}

/// Validate the handshake. Subscription is keyed by the conversation id
/// supplied at connection time; a connection without one is rejected before
/// the upgrade.
fn require_conversation_id(params: &ViewerParams) -> Result<String, ApiError> {
    match params.conversation_id.as_deref() {
        Some(id) if !id.trim().is_empty() => Ok(id.to_string()),
        _ => Err(ApiError::bad_request(
            "conversation_id query parameter is required",
        )),
    }
}

/// WebSocket upgrade handler.
///
/// GET /api/ws?conversation_id={id}
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ViewerParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let conversation_id = require_conversation_id(&params)?;
    info!("WebSocket upgrade for conversation {}", conversation_id);

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| handle_viewer(socket, hub, conversation_id)))
}

/// Pump one viewer connection until either side goes away.
async fn handle_viewer(socket: WebSocket, hub: Arc<BroadcastHub>, conversation_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (viewer_id, mut event_rx) = hub.subscribe(&conversation_id);

    loop {
        tokio::select! {
            // Events fanned out by the hub (the ready notice arrives first)
            maybe_event = event_rx.recv() => {
                let Some(event) = maybe_event else { break };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize viewer event: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            // Frames from the viewer
            maybe_frame = receiver.next() => {
                match maybe_frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ViewerMessage>(&text) {
                            Ok(ViewerMessage::Ping) => {
                                let pong = ViewerEvent::Pong {
                                    timestamp: Utc::now().timestamp_millis(),
                                };
                                let json = serde_json::to_string(&pong)
                                    .unwrap_or_else(|_| String::new());
                                if sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(
                                    "Unrecognized message from viewer {}: {} - {}",
                                    viewer_id, e, text
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // Transport keepalive is answered by axum
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary frame from viewer {}", viewer_id);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("WebSocket error for viewer {}: {}", viewer_id, e);
                        break;
                    }
                }
            }
        }
    }

    hub.unsubscribe(&conversation_id, viewer_id);
    info!(
        "Viewer {} disconnected from conversation {}",
        viewer_id, conversation_id
    );
}
