//! Connector: one long-lived client per upstream MCP server. Lazily
//! initialised, caches listings, forwards calls, disposes idempotently.
//! Connects exactly once and surfaces failure immediately — no retry,
//! backoff, process sandboxing, or stateful pooling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rmcp::RoleClient;
use rmcp::model::{CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult, Prompt, Tool};
use rmcp::service::{RunningService, ServiceExt};
use tokio::process::Command;
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::config::ServerDescriptor;

const SHUTDOWN_GRACE_SECS: u64 = 3;
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Handle to a single upstream connector's serializing actor.
///
/// Routing every operation through one actor task gives "ensure-ready is
/// serialized per connector, concurrent callers observe the same in-flight
/// attempt" for free, with a single connect-or-fail attempt rather than
/// retry-with-backoff.
#[derive(Clone)]
pub struct Connector {
    id: String,
    sender: mpsc::Sender<Command_>,
}

enum Command_ {
    EnsureReady(oneshot::Sender<Result<()>>),
    ListTools(oneshot::Sender<Result<Vec<Tool>>>),
    ListPrompts(oneshot::Sender<Result<Vec<Prompt>>>),
    CallTool(
        CallToolRequestParam,
        oneshot::Sender<Result<CallToolResult>>,
    ),
    GetPrompt(
        GetPromptRequestParam,
        oneshot::Sender<Result<GetPromptResult>>,
    ),
    Dispose(oneshot::Sender<Result<()>>),
}

impl Connector {
    pub fn spawn(id: String, descriptor: ServerDescriptor) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Command_>(REQUEST_QUEUE_CAPACITY);
        let actor_id = id.clone();

        tokio::spawn(async move {
            let mut state = ConnectorState::new(actor_id.clone(), descriptor);

            while let Some(command) = receiver.recv().await {
                match command {
                    Command_::EnsureReady(reply) => {
                        let _ = reply.send(state.ensure_ready().await);
                    }
                    Command_::ListTools(reply) => {
                        let _ = reply.send(state.list_tools().await);
                    }
                    Command_::ListPrompts(reply) => {
                        let _ = reply.send(state.list_prompts().await);
                    }
                    Command_::CallTool(params, reply) => {
                        let _ = reply.send(state.call_tool(params).await);
                    }
                    Command_::GetPrompt(params, reply) => {
                        let _ = reply.send(state.get_prompt(params).await);
                    }
                    Command_::Dispose(reply) => {
                        let result = state.dispose().await;
                        let _ = reply.send(result);
                        break;
                    }
                }
            }

            // Drain and fail any requests that arrived after we started shutting down.
            while let Some(command) = receiver.recv().await {
                let disposed = Err(anyhow!("connector '{actor_id}' is disposed"));
                match command {
                    Command_::EnsureReady(reply) => {
                        let _ = reply.send(disposed);
                    }
                    Command_::ListTools(reply) => {
                        let _ = reply.send(disposed);
                    }
                    Command_::ListPrompts(reply) => {
                        let _ = reply.send(disposed);
                    }
                    Command_::CallTool(_, reply) => {
                        let _ = reply.send(disposed);
                    }
                    Command_::GetPrompt(_, reply) => {
                        let _ = reply.send(disposed);
                    }
                    Command_::Dispose(reply) => {
                        let _ = reply.send(Ok(()));
                    }
                }
            }
        });

        Self { id, sender }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn ensure_ready(&self) -> Result<()> {
        self.request(Command_::EnsureReady).await
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.request(Command_::ListTools).await
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.request(Command_::ListPrompts).await
    }

    pub async fn call_tool(&self, params: CallToolRequestParam) -> Result<CallToolResult> {
        self.request(|reply| Command_::CallTool(params, reply)).await
    }

    pub async fn get_prompt(&self, params: GetPromptRequestParam) -> Result<GetPromptResult> {
        self.request(|reply| Command_::GetPrompt(params, reply)).await
    }

    pub async fn dispose(&self) -> Result<()> {
        self.request(Command_::Dispose).await
    }

    async fn request<T, F>(&self, build: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<Result<T>>) -> Command_,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(build(reply_tx))
            .await
            .with_context(|| format!("connector '{}' actor has stopped", self.id))?;
        reply_rx
            .await
            .context("connector actor dropped response channel")?
    }
}

struct ConnectorState {
    id: String,
    descriptor: ServerDescriptor,
    transport: Option<BackendTransport>,
    tools_cache: Option<Vec<Tool>>,
    prompts_cache: Option<Vec<Prompt>>,
    disposed: bool,
}

impl ConnectorState {
    fn new(id: String, descriptor: ServerDescriptor) -> Self {
        Self {
            id,
            descriptor,
            transport: None,
            tools_cache: None,
            prompts_cache: None,
            disposed: false,
        }
    }

    /// Idempotent. Concurrent callers all funnel through the single actor
    /// task, so they naturally await the same in-flight attempt.
    async fn ensure_ready(&mut self) -> Result<()> {
        if self.disposed {
            return Err(anyhow!("connector '{}' is disposed", self.id));
        }
        if self.transport.is_some() {
            return Ok(());
        }

        match BackendTransport::connect(&self.id, &self.descriptor).await {
            Ok(transport) => {
                self.transport = Some(transport);
                Ok(())
            }
            Err(error) => {
                // Transport stays None, so the next caller retries from scratch.
                Err(error)
            }
        }
    }

    async fn list_tools(&mut self) -> Result<Vec<Tool>> {
        self.ensure_ready().await?;
        if let Some(cached) = &self.tools_cache {
            return Ok(cached.clone());
        }

        let transport = self.transport.as_ref().expect("ensure_ready populated transport");
        let response = transport
            .service()
            .list_tools(None)
            .await
            .map_err(|error| anyhow!(error))?;
        self.tools_cache = Some(response.tools.clone());
        Ok(response.tools)
    }

    async fn list_prompts(&mut self) -> Result<Vec<Prompt>> {
        self.ensure_ready().await?;
        if let Some(cached) = &self.prompts_cache {
            return Ok(cached.clone());
        }

        let transport = self.transport.as_ref().expect("ensure_ready populated transport");
        let response = transport
            .service()
            .list_prompts(None)
            .await
            .map_err(|error| anyhow!(error))?;
        self.prompts_cache = Some(response.prompts.clone());
        Ok(response.prompts)
    }

    async fn call_tool(&mut self, params: CallToolRequestParam) -> Result<CallToolResult> {
        self.ensure_ready().await?;
        let transport = self.transport.as_ref().expect("ensure_ready populated transport");
        transport
            .service()
            .call_tool(params)
            .await
            .map_err(|error| anyhow!(error))
    }

    async fn get_prompt(&mut self, params: GetPromptRequestParam) -> Result<GetPromptResult> {
        self.ensure_ready().await?;
        let transport = self.transport.as_ref().expect("ensure_ready populated transport");
        transport
            .service()
            .get_prompt(params)
            .await
            .map_err(|error| anyhow!(error))
    }

    async fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.tools_cache = None;
        self.prompts_cache = None;
        if let Some(transport) = self.transport.take() {
            transport.shutdown().await;
        }
        Ok(())
    }
}

/// Unified backend connection to an upstream MCP server.
enum BackendTransport {
    Stdio {
        service: RunningService<RoleClient, ()>,
        child: Box<tokio::process::Child>,
        /// Serializes stderr-forwarding writes per connector.
        stderr_lock: Arc<Mutex<()>>,
    },
    Http {
        service: RunningService<RoleClient, ()>,
    },
}

impl BackendTransport {
    async fn connect(id: &str, descriptor: &ServerDescriptor) -> Result<Self> {
        match descriptor {
            ServerDescriptor::Stdio { command, args, env } => {
                Self::spawn_stdio(id, command, args, env).await
            }
            ServerDescriptor::Http { url, headers } => Self::connect_http(id, url, headers).await,
        }
    }

    fn service(&self) -> &RunningService<RoleClient, ()> {
        match self {
            Self::Stdio { service, .. } => service,
            Self::Http { service, .. } => service,
        }
    }

    async fn shutdown(self) {
        match self {
            Self::Stdio {
                service, mut child, ..
            } => {
                let _ = service.cancel().await;
                match tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), child.wait())
                    .await
                {
                    Ok(Ok(_)) => {}
                    Ok(Err(error)) => {
                        tracing::debug!(error = %error, "failed to wait on connector child process");
                    }
                    Err(_) => {
                        let _ = child.kill().await;
                    }
                }
            }
            Self::Http { service } => {
                let _ = service.cancel().await;
            }
        }
    }

    async fn spawn_stdio(
        id: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        // Union parent environment with per-server overrides; overrides win.
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stdin(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn connector '{id}'"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture stdout for connector '{id}'"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture stdin for connector '{id}'"))?;

        let stderr_lock = Arc::new(Mutex::new(()));
        if let Some(stderr) = child.stderr.take() {
            let server_id = id.to_string();
            let lock = stderr_lock.clone();
            tokio::spawn(forward_stderr(server_id, stderr, lock));
        }

        let service = ()
            .serve((stdout, stdin))
            .await
            .with_context(|| format!("failed to complete MCP handshake for connector '{id}'"))?;

        Ok(Self::Stdio {
            service,
            child: Box::new(child),
            stderr_lock,
        })
    }

    async fn connect_http(id: &str, url: &str, headers: &HashMap<String, String>) -> Result<Self> {
        use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
        use rmcp::transport::StreamableHttpClientTransport;
        use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;

        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let header_name = HeaderName::try_from(key.as_str())
                .with_context(|| format!("server '{id}': invalid header name '{key}'"))?;
            let header_value = HeaderValue::try_from(value.as_str())
                .with_context(|| format!("server '{id}': invalid header value for '{key}'"))?;
            header_map.insert(header_name, header_value);
        }
        let http_client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .with_context(|| format!("server '{id}': failed to build HTTP client"))?;

        tracing::info!(server = %id, url = %url, "connecting to HTTP upstream");
        let transport_config = StreamableHttpClientTransportConfig::with_uri(url.to_string());
        let transport = StreamableHttpClientTransport::with_client(http_client, transport_config);
        let service: RunningService<RoleClient, ()> = ()
            .serve(transport)
            .await
            .with_context(|| format!("failed to connect to HTTP upstream '{id}' at {url}"))?;

        Ok(Self::Http { service })
    }
}

/// Forwards a stdio connector's stderr lines to the gateway's log stream,
/// serialized per connector via `stderr_lock` so concurrent writes don't
/// interleave.
async fn forward_stderr(
    server_id: String,
    mut stderr: tokio::process::ChildStderr,
    lock: Arc<Mutex<()>>,
) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut reader = BufReader::new(&mut stderr).lines();
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                let _guard = lock.lock().await;
                tracing::info!(server = %server_id, stderr = %line, "upstream stderr");
            }
            Ok(None) => break,
            Err(error) => {
                tracing::debug!(server = %server_id, error = %error, "failed reading upstream stderr");
                break;
            }
        }
    }
}
