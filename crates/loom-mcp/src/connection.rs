//! One managed tool server.
//!
//! A [`ServerConnection`] owns the client for a single server and moves
//! through this lifecycle:
//!
//! ```text
//!   Disconnected ──► Connecting ──► Connected ◄──► Degraded
//!         ▲              │  ▲                         │
//!         │              ▼  │                         │
//!         └──────────── Failed ◄──────────────────────┘ (process exit)
//! ```
//!
//! Calls are guarded by the connection's own breaker and retry policy.
//! Lifecycle changes (connect, refresh, shutdown, probing) are serialized so
//! there is one writer at a time.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use loom_resilience::{
    BreakerConfig, BreakerState, CircuitBreaker, Classify, ResilienceError, RetryPolicy,
    with_retry,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, PromptDescriptor, ResourceDescriptor, ToolDescriptor};
use crate::client::McpClient;
use crate::error::{McpError, Result};
use crate::protocol::{CallToolResult, GetPromptResult, ReadResourceResult};
use crate::transport::{Framing, LaunchSpec};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Launch description for one tool server. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSpec {
    /// Unique name for this server.
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Disabled servers are skipped at startup.
    pub disabled: bool,
    /// Tools that do not need operator confirmation.
    pub auto_approve: HashSet<String>,
    pub framing: Framing,
}

impl ServerSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            disabled: false,
            auto_approve: HashSet::new(),
            framing: Framing::default(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_auto_approve(mut self, tool: impl Into<String>) -> Self {
        self.auto_approve.insert(tool.into());
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    fn launch(&self) -> LaunchSpec {
        LaunchSpec {
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            framing: self.framing,
        }
    }
}

/// Timeouts and resilience settings shared by all connections.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Budget for the initialize handshake.
    pub init_timeout: Duration,
    /// Budget for every other request.
    pub read_timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub health_interval: Duration,
    /// Minimum spacing between reconnect attempts from the health task.
    pub reconnect_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            health_interval: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Health probe failing or breaker open; calls are still attempted.
    Degraded,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }

    /// Whether calls may be attempted in this state.
    pub fn is_servable(&self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct Status {
    last_error: Option<String>,
    consecutive_failures: u32,
    last_attempt: Option<Instant>,
}

/// Health summary for status reporting.
#[derive(Debug, Clone)]
pub struct ServerHealth {
    pub name: String,
    pub state: ConnectionState,
    pub tool_count: usize,
    pub resource_count: usize,
    pub prompt_count: usize,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub breaker: BreakerState,
}

/// Last-known catalog with staleness annotation.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub state: ConnectionState,
    pub catalog: Arc<Catalog>,
    /// The server is not Connected, so the catalog may be out of date.
    pub stale: bool,
    /// Time since the catalog was last refreshed.
    pub age: Option<Duration>,
}

/// Classification of one attempt for the retry engine.
///
/// Non-idempotent calls are only resent when the request never reached the
/// server.
#[derive(Debug)]
struct Attempt {
    error: McpError,
    idempotent: bool,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl Classify for Attempt {
    fn is_retryable(&self) -> bool {
        self.error.is_retryable() && (self.idempotent || self.error.is_undelivered())
    }

    fn counts_as_failure(&self) -> bool {
        self.error.counts_as_failure()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ServerConnection
// ─────────────────────────────────────────────────────────────────────────────

pub struct ServerConnection {
    spec: ServerSpec,
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    client: Mutex<Option<Arc<McpClient>>>,
    catalog: RwLock<Arc<Catalog>>,
    generation: AtomicU64,
    breaker: CircuitBreaker,
    status: Mutex<Status>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl ServerConnection {
    pub fn new(spec: ServerSpec, config: ConnectionConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(spec.name.clone(), config.breaker),
            spec,
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            client: Mutex::new(None),
            catalog: RwLock::new(Arc::new(Catalog::default())),
            generation: AtomicU64::new(0),
            status: Mutex::new(Status::default()),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Incremented every time the catalog is replaced.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.lock().last_error.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.status.lock().consecutive_failures
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev != next {
            tracing::info!(server = %self.spec.name, from = %prev, to = %next, "server state changed");
        }
    }

    fn degrade(&self, reason: &str) {
        let mut state = self.state.write();
        if *state == ConnectionState::Connected {
            *state = ConnectionState::Degraded;
            tracing::warn!(server = %self.spec.name, reason, "server degraded");
        }
    }

    fn record_error(&self, error: &McpError) {
        self.status.lock().last_error = Some(error.to_string());
    }

    fn install_catalog(&self, catalog: Catalog) {
        *self.catalog.write() = Arc::new(catalog);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn current_client(&self) -> Option<Arc<McpClient>> {
        self.client.lock().clone()
    }

    fn servable_client(&self) -> Result<Arc<McpClient>> {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Degraded => self
                .current_client()
                .ok_or_else(|| McpError::NotConnected(self.spec.name.clone())),
            ConnectionState::Failed => Err(McpError::ServerUnavailable(self.spec.name.clone())),
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                Err(McpError::NotConnected(self.spec.name.clone()))
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Spawn, handshake and discover capabilities.
    ///
    /// Retries per the connection's policy; ends in Connected or Failed.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.set_state(ConnectionState::Connecting);
        self.status.lock().last_attempt = Some(Instant::now());

        let previous = self.client.lock().take();
        if let Some(previous) = previous {
            previous.shutdown().await;
        }

        let launch = self.spec.launch();
        let result = with_retry(&self.config.retry, &self.spec.name, |_| {
            let launch = &launch;
            async move {
                self.establish(launch).await.map_err(|error| Attempt {
                    error,
                    idempotent: true,
                })
            }
        })
        .await;

        match result {
            Ok((client, catalog)) => {
                let tool_count = catalog.tools.len();
                *self.client.lock() = Some(Arc::new(client));
                self.install_catalog(catalog);
                self.breaker.reset();
                {
                    let mut status = self.status.lock();
                    status.consecutive_failures = 0;
                    status.last_error = None;
                }
                self.set_state(ConnectionState::Connected);
                tracing::info!(server = %self.spec.name, tool_count, "MCP server connected");
                Ok(())
            }
            Err(attempt) => {
                {
                    let mut status = self.status.lock();
                    status.consecutive_failures += 1;
                    status.last_error = Some(attempt.error.to_string());
                }
                self.set_state(ConnectionState::Failed);
                tracing::error!(server = %self.spec.name, error = %attempt.error, "failed to connect to MCP server");
                Err(attempt.error)
            }
        }
    }

    async fn establish(&self, launch: &LaunchSpec) -> Result<(McpClient, Catalog)> {
        let mut client = McpClient::spawn(&self.spec.name, launch, self.config.read_timeout)?;
        let outcome: Result<Catalog> = async {
            client.initialize(self.config.init_timeout).await?;
            self.discover(&client).await
        }
        .await;

        match outcome {
            Ok(catalog) => Ok((client, catalog)),
            Err(e) => {
                client.shutdown().await;
                Err(e)
            }
        }
    }

    /// List tools, plus resources and prompts when advertised.
    async fn discover(&self, client: &McpClient) -> Result<Catalog> {
        let name = &self.spec.name;
        let tools = client
            .list_tools()
            .await?
            .into_iter()
            .map(|info| {
                let auto = self.spec.auto_approve.contains(&info.name);
                ToolDescriptor::from_info(info, name, auto)
            })
            .collect();

        let caps = client.capabilities().cloned().unwrap_or_default();

        let resources = if caps.has_resources() {
            match client.list_resources().await {
                Ok(list) => list
                    .into_iter()
                    .map(|r| ResourceDescriptor::from_info(r, name))
                    .collect(),
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to list resources");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let prompts = if caps.has_prompts() {
            match client.list_prompts().await {
                Ok(list) => list
                    .into_iter()
                    .map(|p| PromptDescriptor::from_info(p, name))
                    .collect(),
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to list prompts");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(Catalog {
            tools,
            resources,
            prompts,
            refreshed_at: Some(Instant::now()),
        })
    }

    /// Re-run capability discovery without restarting the process.
    pub async fn refresh(&self) -> Result<usize> {
        let _lifecycle = self.lifecycle.lock().await;
        let catalog = self
            .guarded(true, |client| async move { self.discover(&client).await })
            .await?;
        let count = catalog.tools.len();
        self.install_catalog(catalog);
        tracing::debug!(server = %self.spec.name, tool_count = count, "refreshed catalog");
        Ok(count)
    }

    /// Tear down the process and clear the catalog.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let client = self.client.lock().take();
        if let Some(client) = client {
            client.shutdown().await;
        }
        self.install_catalog(Catalog::default());
        self.set_state(ConnectionState::Disconnected);
    }

    // ── Calls ───────────────────────────────────────────────────────────────

    /// Run `f` against the live client through the breaker and retry policy.
    async fn guarded<T, F, Fut>(&self, idempotent: bool, f: F) -> Result<T>
    where
        F: Fn(Arc<McpClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let client = self.servable_client()?;

        let result = loom_resilience::execute(&self.breaker, &self.config.retry, |_| {
            let call = f(client.clone());
            async move { call.await.map_err(|error| Attempt { error, idempotent }) }
        })
        .await;

        match result {
            Ok(value) => Ok(value),
            Err(ResilienceError::CircuitOpen { name, retry_in }) => {
                self.degrade("circuit open");
                Err(McpError::CircuitOpen {
                    server: name,
                    retry_in,
                })
            }
            Err(ResilienceError::Inner(attempt)) => {
                if attempt.error.counts_as_failure() {
                    self.record_error(&attempt.error);
                    if self.breaker.state() == BreakerState::Open {
                        self.degrade("circuit opened");
                    }
                }
                Err(attempt.error)
            }
        }
    }

    /// Call a tool owned by this server.
    ///
    /// A request that may have reached the server is never resent.
    pub async fn invoke(&self, tool: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        self.guarded(false, |client| {
            let arguments = arguments.clone();
            async move { client.call_tool(tool, arguments).await }
        })
        .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.guarded(true, |client| async move { client.read_resource(uri).await })
            .await
    }

    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<GetPromptResult> {
        self.guarded(true, |client| {
            let arguments = arguments.clone();
            async move { client.get_prompt(name, arguments).await }
        })
        .await
    }

    // ── Health ──────────────────────────────────────────────────────────────

    /// Probe the server and update state.
    ///
    /// Sends `ping`, falling back to `tools/list` for servers without ping.
    /// Skipped while another lifecycle operation is running.
    pub async fn health_check(&self) -> ConnectionState {
        let Ok(_lifecycle) = self.lifecycle.try_lock() else {
            return self.state();
        };

        let state = self.state();
        if !state.is_servable() {
            return state;
        }
        let Some(client) = self.current_client() else {
            return state;
        };

        if !client.is_alive() {
            self.record_error(&McpError::ConnectionClosed);
            self.status.lock().consecutive_failures += 1;
            self.set_state(ConnectionState::Failed);
            return ConnectionState::Failed;
        }

        let probe = match client.ping().await {
            Err(e) if e.is_method_not_found() => client.list_tools().await.map(|_| ()),
            other => other,
        };

        match probe {
            Ok(()) => {
                if state == ConnectionState::Degraded
                    && self.breaker.state() == BreakerState::Closed
                {
                    self.set_state(ConnectionState::Connected);
                }
            }
            Err(e) => {
                tracing::warn!(server = %self.spec.name, error = %e, "health probe failed");
                self.record_error(&e);
                self.degrade("health probe failed");
            }
        }
        self.state()
    }

    /// Start the per-connection health and reconnect loop.
    pub fn spawn_health_task(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let conn = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let wait = match conn.state() {
                    ConnectionState::Failed => conn.config.reconnect_delay,
                    _ => conn.config.health_interval,
                };
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                match conn.state() {
                    ConnectionState::Connected | ConnectionState::Degraded => {
                        conn.health_check().await;
                    }
                    ConnectionState::Failed if conn.reconnect_due() => {
                        tracing::info!(server = %conn.spec.name, "attempting reconnect");
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = conn.connect() => {}
                        }
                    }
                    _ => {}
                }
            }
            tracing::debug!(server = %conn.spec.name, "health task stopped");
        })
    }

    fn reconnect_due(&self) -> bool {
        self.status
            .lock()
            .last_attempt
            .is_none_or(|t| t.elapsed() >= self.config.reconnect_delay)
    }

    // ── Snapshots ───────────────────────────────────────────────────────────

    /// Last-known catalog, even when Degraded or Failed.
    pub fn list_capabilities(&self) -> CatalogSnapshot {
        let catalog = self.catalog.read().clone();
        let state = self.state();
        CatalogSnapshot {
            state,
            stale: state != ConnectionState::Connected,
            age: catalog.refreshed_at.map(|t| t.elapsed()),
            catalog,
        }
    }

    pub fn health(&self) -> ServerHealth {
        let catalog = self.catalog.read().clone();
        let status = self.status.lock();
        ServerHealth {
            name: self.spec.name.clone(),
            state: self.state(),
            tool_count: catalog.tools.len(),
            resource_count: catalog.resources.len(),
            prompt_count: catalog.prompts.len(),
            consecutive_failures: status.consecutive_failures,
            last_error: status.last_error.clone(),
            breaker: self.breaker.state(),
        }
    }
}

impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection")
            .field("name", &self.spec.name)
            .field("state", &self.state())
            .finish()
    }
}
