//! Gateway RPC client.
//!
//! Manages communication with the upstream provider process via stdin/stdout.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::types::*;

/// Configuration for the gateway client.
#[derive(Debug, Clone)]
pub struct GatewayClientConfig {
    /// Buffer size for the event broadcast channel.
    pub event_buffer_size: usize,
    /// Buffer size for the command channel.
    pub command_buffer_size: usize,
    /// How long to wait for a command response.
    pub request_timeout: Duration,
}

impl Default for GatewayClientConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 256,
            command_buffer_size: 64,
            request_timeout: Duration::from_secs(30),
        }
    }
}

type PendingResponses = Arc<RwLock<HashMap<String, oneshot::Sender<GatewayResponse>>>>;

/// Client for communicating with the upstream provider process.
///
/// Writer and reader tasks own the two halves of the transport; commands are
/// correlated with responses through generated request ids, and everything
/// else on stdout is fanned out as session-scoped [`GatewayEvent`]s.
pub struct GatewayClient {
    /// Channel to send serialized commands to the provider.
    command_tx: mpsc::Sender<String>,
    /// Broadcast channel for events from the provider.
    event_tx: broadcast::Sender<GatewayEvent>,
    /// Pending response senders, keyed by request id.
    pending_responses: PendingResponses,
    /// Counter for generating unique request ids.
    request_counter: Arc<Mutex<u64>>,
    /// Transport features advertised by the provider at connect time.
    capabilities: GatewayCapabilities,
    /// How long to wait for a command response.
    request_timeout: Duration,
    /// Handles to the background tasks.
    _handles: Vec<JoinHandle<()>>,
}

impl GatewayClient {
    /// Connect over a child process, taking ownership of its stdio.
    pub async fn spawn(mut child: Child, config: GatewayClientConfig) -> Result<Self> {
        let stdin = child.stdin.take().context("provider process has no stdin")?;
        let stdout = child
            .stdout
            .take()
            .context("provider process has no stdout")?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(Self::stderr_reader_task(stderr));
        }

        Self::from_transport(stdout, stdin, config).await
    }

    /// Connect over an arbitrary transport. Tests drive a scripted provider
    /// through `tokio::io::duplex`.
    pub async fn from_transport<R, W>(reader: R, writer: W, config: GatewayClientConfig) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel::<String>(config.command_buffer_size);
        let (event_tx, _) = broadcast::channel::<GatewayEvent>(config.event_buffer_size);
        let pending_responses: PendingResponses = Arc::new(RwLock::new(HashMap::new()));

        let writer_handle = tokio::spawn(Self::writer_task(writer, command_rx));
        let reader_handle = tokio::spawn(Self::reader_task(
            reader,
            event_tx.clone(),
            Arc::clone(&pending_responses),
        ));

        let mut client = Self {
            command_tx,
            event_tx,
            pending_responses,
            request_counter: Arc::new(Mutex::new(0)),
            capabilities: GatewayCapabilities::default(),
            request_timeout: config.request_timeout,
            _handles: vec![writer_handle, reader_handle],
        };

        // Capabilities are resolved exactly once, here. Everything downstream
        // asks the accessor instead of probing the transport per call.
        let status = client
            .auth_status()
            .await
            .context("querying provider auth status")?;
        if !status.authenticated {
            anyhow::bail!("provider is not authenticated; run its login flow first");
        }
        client.capabilities = GatewayCapabilities::from_list(&status.capabilities);
        info!(
            "Gateway connected: method={:?}, history_injection={}",
            status.method, client.capabilities.history_injection
        );

        Ok(client)
    }

    /// Transport features advertised at connect time.
    pub fn capabilities(&self) -> GatewayCapabilities {
        self.capabilities
    }

    /// Subscribe to the raw provider event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.event_tx.subscribe()
    }

    /// Generate a unique request id.
    async fn next_request_id(&self) -> String {
        let mut counter = self.request_counter.lock().await;
        *counter += 1;
        format!("req-{}", *counter)
    }

    /// Send a command to the provider and wait for its response.
    pub async fn send_command(&self, command: GatewayCommand) -> Result<GatewayResponse> {
        let request_id = self.next_request_id().await;
        let json = self.serialize_command_with_id(&command, &request_id)?;

        let (response_tx, response_rx) = oneshot::channel();
        {
            let mut pending = self.pending_responses.write().await;
            pending.insert(request_id.clone(), response_tx);
        }

        if let Err(e) = self.command_tx.send(json).await {
            self.pending_responses.write().await.remove(&request_id);
            return Err(e).context("failed to send command to provider");
        }

        let response = match tokio::time::timeout(self.request_timeout, response_rx).await {
            Ok(received) => received.context("response channel closed")?,
            Err(_) => {
                self.pending_responses.write().await.remove(&request_id);
                anyhow::bail!("timeout waiting for provider response to {}", request_id);
            }
        };

        Ok(response)
    }

    // ========================================================================
    // Session primitives
    // ========================================================================

    /// Open an upstream session configured for streaming with an
    /// auto-extending context window.
    pub async fn create_session(&self, session_id: &str, model: &str) -> Result<()> {
        let response = self
            .send_command(GatewayCommand::CreateSession {
                id: None,
                session_id: session_id.to_string(),
                model: model.to_string(),
                streaming: true,
                context: ContextPolicy::AutoExtend,
            })
            .await?;
        if !response.success {
            anyhow::bail!("create_session failed: {:?}", response.error);
        }
        Ok(())
    }

    /// Reconnect to a persisted upstream session.
    pub async fn resume_session(&self, session_id: &str) -> Result<()> {
        let response = self
            .send_command(GatewayCommand::ResumeSession {
                id: None,
                session_id: session_id.to_string(),
            })
            .await?;
        if !response.success {
            anyhow::bail!("resume_session failed: {:?}", response.error);
        }
        Ok(())
    }

    /// Send a prompt into a session. Streamed output arrives on the event
    /// stream, not in the response.
    pub async fn prompt(&self, session_id: &str, message: &str) -> Result<()> {
        let response = self
            .send_command(GatewayCommand::Prompt {
                id: None,
                session_id: session_id.to_string(),
                message: message.to_string(),
            })
            .await?;
        if !response.success {
            anyhow::bail!("prompt failed: {:?}", response.error);
        }
        Ok(())
    }

    /// Ask the provider to stop generating in a session.
    pub async fn abort(&self, session_id: &str) -> Result<()> {
        let response = self
            .send_command(GatewayCommand::Abort {
                id: None,
                session_id: session_id.to_string(),
            })
            .await?;
        if !response.success {
            anyhow::bail!("abort failed: {:?}", response.error);
        }
        Ok(())
    }

    /// Replay prior turns into a session.
    pub async fn inject_messages(
        &self,
        session_id: &str,
        messages: &[crate::storage::HistoryMessage],
    ) -> Result<()> {
        let response = self
            .send_command(GatewayCommand::InjectMessages {
                id: None,
                session_id: session_id.to_string(),
                messages: messages.to_vec(),
            })
            .await?;
        if !response.success {
            anyhow::bail!("inject_messages failed: {:?}", response.error);
        }
        Ok(())
    }

    /// Tear down an upstream session.
    pub async fn destroy_session(&self, session_id: &str) -> Result<()> {
        let response = self
            .send_command(GatewayCommand::DestroySession {
                id: None,
                session_id: session_id.to_string(),
            })
            .await?;
        if !response.success {
            anyhow::bail!("destroy_session failed: {:?}", response.error);
        }
        Ok(())
    }

    /// List the models the provider can serve.
    pub async fn list_models(&self) -> Result<Vec<GatewayModel>> {
        let response = self
            .send_command(GatewayCommand::ListModels { id: None })
            .await?;
        if !response.success {
            anyhow::bail!("list_models failed: {:?}", response.error);
        }
        let data = response.data.context("list_models returned no data")?;
        let models = data.get("models").context("no models field in response")?;
        serde_json::from_value(models.clone()).context("failed to parse models")
    }

    /// Query provider authentication state.
    pub async fn auth_status(&self) -> Result<AuthStatusData> {
        let response = self
            .send_command(GatewayCommand::AuthStatus { id: None })
            .await?;
        if !response.success {
            anyhow::bail!("auth_status failed: {:?}", response.error);
        }
        let data = response.data.context("auth_status returned no data")?;
        serde_json::from_value(data).context("failed to parse auth status")
    }

    // ========================================================================
    // Internal helper methods
    // ========================================================================

    fn serialize_command_with_id(&self, command: &GatewayCommand, id: &str) -> Result<String> {
        // Serialize to Value first, then inject the request id
        let mut value = serde_json::to_value(command).context("failed to serialize command")?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("id".to_string(), serde_json::Value::String(id.to_string()));
        }
        serde_json::to_string(&value).context("failed to stringify command")
    }

    async fn writer_task<W>(mut writer: W, mut command_rx: mpsc::Receiver<String>)
    where
        W: AsyncWrite + Unpin,
    {
        debug!("Gateway writer task started");
        while let Some(command) = command_rx.recv().await {
            let line = format!("{}\n", command);
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                error!("Failed to write to provider stdin: {:?}", e);
                break;
            }
            if let Err(e) = writer.flush().await {
                error!("Failed to flush provider stdin: {:?}", e);
                break;
            }
        }
        debug!("Gateway writer task ended");
    }

    async fn reader_task<R>(
        reader: R,
        event_tx: broadcast::Sender<GatewayEvent>,
        pending_responses: PendingResponses,
    ) where
        R: AsyncRead + Unpin,
    {
        let reader = BufReader::new(reader);
        let mut lines = reader.lines();

        debug!("Gateway reader task started");

        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }

            match GatewayMessage::parse(&line) {
                Ok(GatewayMessage::Response(response)) => {
                    if let Some(ref id) = response.id {
                        let mut pending = pending_responses.write().await;
                        if let Some(tx) = pending.remove(id) {
                            let _ = tx.send(response);
                        } else {
                            warn!("Received response for unknown request id: {}", id);
                        }
                    } else {
                        warn!("Response has no request id: {:?}", response);
                    }
                }
                Ok(GatewayMessage::Event(event)) => {
                    // Nobody subscribed is fine; the send result is irrelevant
                    let _ = event_tx.send(event);
                }
                Err(e) => {
                    // Safely truncate for logging, respecting char boundaries
                    let display_line: String = line.chars().take(200).collect();
                    warn!("Failed to parse provider message: {:?}, line: {}", e, display_line);
                }
            }
        }
        debug!("Gateway reader task ended");
    }

    async fn stderr_reader_task(stderr: tokio::process::ChildStderr) {
        let reader = BufReader::new(stderr);
        let mut lines = reader.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                warn!("Provider stderr: {}", line);
            }
        }
        debug!("Provider stderr reader task ended");
    }
}
