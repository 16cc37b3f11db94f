//! Test utilities: a scripted fake provider and a fully wired broker.

use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

use confab::gateway::{GatewayClient, GatewayClientConfig};
use confab::relay::{ExchangeEvent, StreamingRelay};
use confab::session::{ChatSession, SessionRegistry, SessionService, SessionServiceConfig};
use confab::storage::SqliteConversationStore;
use confab::ws::BroadcastHub;

/// Maps an incoming prompt to the raw event lines the provider emits.
pub type ReplyFn = Arc<dyn Fn(&str, &str) -> Vec<String> + Send + Sync>;

/// Scripted behavior of the fake provider.
#[derive(Clone)]
pub struct UpstreamBehavior {
    /// Capabilities advertised in the auth_status response.
    pub capabilities: Vec<String>,
    /// Models for which create_session fails.
    pub fail_create_for: Vec<String>,
    /// Whether resume_session finds a persisted session.
    pub resume_succeeds: bool,
    /// Whether destroy_session reports an upstream error.
    pub fail_destroy: bool,
    /// Event lines emitted after a prompt is accepted.
    pub reply: ReplyFn,
}

impl Default for UpstreamBehavior {
    fn default() -> Self {
        Self {
            capabilities: vec!["history-injection".to_string()],
            fail_create_for: Vec::new(),
            resume_succeeds: false,
            fail_destroy: false,
            reply: Arc::new(default_reply),
        }
    }
}

/// Standard two-fragment reply.
pub fn default_reply(session_id: &str, _message: &str) -> Vec<String> {
    vec![
        delta_line(session_id, "text", "Hi"),
        delta_line(session_id, "text", " there"),
        idle_line(session_id),
    ]
}

pub fn delta_line(session_id: &str, kind: &str, content: &str) -> String {
    json!({
        "type": "delta",
        "session_id": session_id,
        "kind": kind,
        "content": content,
    })
    .to_string()
}

pub fn final_line(session_id: &str, content: &str) -> String {
    json!({
        "type": "final_message",
        "session_id": session_id,
        "content": content,
    })
    .to_string()
}

pub fn idle_line(session_id: &str) -> String {
    json!({ "type": "idle", "session_id": session_id }).to_string()
}

pub fn error_line(session_id: &str, message: &str) -> String {
    json!({
        "type": "error",
        "session_id": session_id,
        "message": message,
    })
    .to_string()
}

fn response_line(command: &str, id: &str, success: bool, data: Value, error: Option<&str>) -> String {
    json!({
        "type": "response",
        "command": command,
        "id": id,
        "success": success,
        "data": data,
        "error": error,
    })
    .to_string()
}

/// Run the provider side of the transport, recording every received command.
fn spawn_fake_provider(
    side: DuplexStream,
    behavior: UpstreamBehavior,
) -> Arc<Mutex<Vec<Value>>> {
    let commands: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&commands);

    tokio::spawn(async move {
        let (read_half, write_half) = tokio::io::split(side);
        let mut lines = BufReader::new(read_half).lines();
        let mut writer = write_half;

        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(value) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            recorded.lock().unwrap().push(value.clone());

            let command = value["type"].as_str().unwrap_or_default().to_string();
            let id = value["id"].as_str().unwrap_or_default().to_string();
            let session_id = value["session_id"].as_str().unwrap_or_default().to_string();

            let mut out: Vec<String> = Vec::new();
            match command.as_str() {
                "auth_status" => {
                    out.push(response_line(
                        &command,
                        &id,
                        true,
                        json!({
                            "authenticated": true,
                            "method": "oauth",
                            "capabilities": behavior.capabilities,
                        }),
                        None,
                    ));
                }
                "create_session" => {
                    let model = value["model"].as_str().unwrap_or_default();
                    if behavior.fail_create_for.iter().any(|m| m == model) {
                        out.push(response_line(
                            &command,
                            &id,
                            false,
                            Value::Null,
                            Some(&format!("model unavailable: {}", model)),
                        ));
                    } else {
                        out.push(response_line(&command, &id, true, Value::Null, None));
                    }
                }
                "resume_session" => {
                    if behavior.resume_succeeds {
                        out.push(response_line(&command, &id, true, Value::Null, None));
                    } else {
                        out.push(response_line(
                            &command,
                            &id,
                            false,
                            Value::Null,
                            Some("resume-not-found"),
                        ));
                    }
                }
                "destroy_session" => {
                    if behavior.fail_destroy {
                        out.push(response_line(
                            &command,
                            &id,
                            false,
                            Value::Null,
                            Some("session teardown failed"),
                        ));
                    } else {
                        out.push(response_line(&command, &id, true, Value::Null, None));
                    }
                }
                "inject_messages" => {
                    out.push(response_line(&command, &id, true, Value::Null, None));
                }
                "prompt" => {
                    let message = value["message"].as_str().unwrap_or_default();
                    out.push(response_line(&command, &id, true, Value::Null, None));
                    out.extend((behavior.reply)(&session_id, message));
                }
                "abort" => {
                    out.push(response_line(&command, &id, true, Value::Null, None));
                    // Aborting settles the session back to idle
                    out.push(idle_line(&session_id));
                }
                "list_models" => {
                    out.push(response_line(
                        &command,
                        &id,
                        true,
                        json!({ "models": [
                            { "id": "m1", "provider": "local" },
                            { "id": "m2", "provider": "local" },
                        ]}),
                        None,
                    ));
                }
                _ => {
                    out.push(response_line(
                        &command,
                        &id,
                        false,
                        Value::Null,
                        Some("unknown command"),
                    ));
                }
            }

            for line in out {
                if writer.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                    return;
                }
                let _ = writer.flush().await;
            }
        }
    });

    commands
}

/// A fully wired broker talking to the scripted provider.
pub struct TestHarness {
    pub gateway: Arc<GatewayClient>,
    pub registry: Arc<SessionRegistry>,
    pub sessions: Arc<SessionService>,
    pub relay: Arc<StreamingRelay>,
    pub hub: Arc<BroadcastHub>,
    pub store: Arc<SqliteConversationStore>,
    /// Every command the fake provider received, in order.
    pub commands: Arc<Mutex<Vec<Value>>>,
}

impl TestHarness {
    /// Commands of one type received by the provider.
    pub fn commands_of_type(&self, command: &str) -> Vec<Value> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|value| value["type"] == command)
            .cloned()
            .collect()
    }
}

/// Build a harness with default behavior and lifecycle config.
pub async fn harness() -> TestHarness {
    harness_with(UpstreamBehavior::default(), SessionServiceConfig::default()).await
}

/// Build a harness with scripted behavior.
pub async fn harness_with(
    behavior: UpstreamBehavior,
    session_config: SessionServiceConfig,
) -> TestHarness {
    let (client_side, provider_side) = tokio::io::duplex(64 * 1024);
    let commands = spawn_fake_provider(provider_side, behavior);

    let (reader, writer) = tokio::io::split(client_side);
    let gateway = Arc::new(
        GatewayClient::from_transport(reader, writer, GatewayClientConfig::default())
            .await
            .expect("connecting to fake provider"),
    );

    let registry = Arc::new(SessionRegistry::new());
    let sessions = Arc::new(SessionService::new(
        gateway.clone(),
        registry.clone(),
        session_config,
    ));
    let relay = Arc::new(StreamingRelay::new(gateway.clone(), registry.clone()));
    let hub = Arc::new(BroadcastHub::new());
    let store = Arc::new(
        SqliteConversationStore::in_memory()
            .await
            .expect("opening in-memory store"),
    );

    TestHarness {
        gateway,
        registry,
        sessions,
        relay,
        hub,
        store,
        commands,
    }
}

/// A session whose last activity lies `idle_secs` in the past.
pub fn aged_session(conversation_id: &str, model: &str, idle_secs: i64) -> ChatSession {
    let mut session = ChatSession::new(conversation_id, model);
    session.last_active_at = chrono::Utc::now() - chrono::Duration::seconds(idle_secs);
    session
}

/// Drain an exchange stream until its terminal event (or a timeout).
pub async fn collect_exchange(mut rx: mpsc::Receiver<ExchangeEvent>) -> Vec<ExchangeEvent> {
    let mut events = Vec::new();
    loop {
        let next = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await;
        match next {
            Ok(Some(event)) => {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
    events
}
