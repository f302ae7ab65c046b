//! Stdio transport for tool servers.
//!
//! One child process per transport. A reader task owns the child's stdout,
//! decodes JSON-RPC messages and resolves the waiting request by id. Writes
//! are serialized through a mutex on stdin.
//!
//! Two framings are supported on output: newline-delimited JSON (the MCP
//! stdio default) and `Content-Length` headers. The reader accepts either.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{McpError, Result};
use crate::protocol::{
    IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};

/// Wire framing for outgoing messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    /// One JSON document per line.
    #[default]
    NewlineDelimited,
    /// `Content-Length: N\r\n\r\n` followed by N bytes of JSON.
    ContentLength,
}

impl Framing {
    pub fn encode(&self, json: &str) -> Vec<u8> {
        match self {
            Self::NewlineDelimited => format!("{json}\n").into_bytes(),
            Self::ContentLength => format!("Content-Length: {}\r\n\r\n{json}", json.len()).into_bytes(),
        }
    }
}

/// How to launch a tool-server process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub framing: Framing,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;
type Writer = Arc<tokio::sync::Mutex<ChildStdin>>;

/// Transport over a spawned child's stdin/stdout.
pub struct StdioTransport {
    name: String,
    framing: Framing,
    writer: Writer,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    child: Mutex<Option<Child>>,
    tasks: Vec<JoinHandle<()>>,
}

impl StdioTransport {
    /// Spawn the server process and start the reader task.
    pub fn start(name: &str, spec: &LaunchSpec) -> Result<Self> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            McpError::spawn_failed(format!("failed to spawn '{}': {}", spec.command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdout"))?;
        let stderr = child.stderr.take();

        let writer: Writer = Arc::new(tokio::sync::Mutex::new(stdin));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let mut tasks = vec![tokio::spawn(read_loop(
            name.to_string(),
            BufReader::new(stdout),
            pending.clone(),
            writer.clone(),
            spec.framing,
            closed.clone(),
        ))];

        if let Some(stderr) = stderr {
            let server = name.to_string();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "stderr: {}", line);
                }
            }));
        }

        tracing::info!(
            server = %name,
            command = %spec.command,
            pid = child.id(),
            "spawned MCP server"
        );

        Ok(Self {
            name: name.to_string(),
            framing: spec.framing,
            writer,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            child: Mutex::new(Some(child)),
            tasks,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the child is still running and its output is open.
    pub fn is_alive(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        match self.child.lock().as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send a request and wait up to `timeout` for its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::NotConnected(self.name.clone()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        self.write(&json)
            .await
            .map_err(|e| McpError::SendFailed(e.to_string()))?;

        tracing::trace!(server = %self.name, id, method, "sent MCP request");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response
                .into_result()
                .map_err(|e| McpError::server_error(e.code, e.message, e.data)),
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => Err(McpError::timeout(method, timeout)),
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::NotConnected(self.name.clone()));
        }
        let json = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.write(&json)
            .await
            .map_err(|e| McpError::SendFailed(e.to_string()))
    }

    async fn write(&self, json: &str) -> std::io::Result<()> {
        let frame = self.framing.encode(json);
        let mut stdin = self.writer.lock().await;
        stdin.write_all(&frame).await?;
        stdin.flush().await
    }

    /// Stop the child and fail all outstanding requests.
    ///
    /// Calling `close` more than once, or after the child has exited, is a
    /// no-op.
    pub async fn close(&self) {
        let already = self.closed.swap(true, Ordering::SeqCst);
        let child = self.child.lock().take();

        if let Some(mut child) = child {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = child.start_kill();
                let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
            }
            tracing::info!(server = %self.name, "closed MCP transport");
        } else if already {
            return;
        }

        for task in &self.tasks {
            task.abort();
        }
        self.pending.lock().clear();
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Removes a pending entry when the waiting request finishes or is cancelled.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

async fn read_loop<R>(
    name: String,
    mut reader: BufReader<R>,
    pending: Pending,
    writer: Writer,
    framing: Framing,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let value = match read_message(&mut reader).await {
            Ok(Some(value)) => value,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "skipping undecodable MCP message");
                continue;
            }
        };

        match IncomingMessage::classify(value) {
            Ok(IncomingMessage::Response(response)) => {
                let sender = response
                    .numeric_id()
                    .and_then(|id| pending.lock().remove(&id));
                match sender {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        tracing::warn!(server = %name, id = %response.id, "discarding response with no outstanding request");
                    }
                }
            }
            Ok(IncomingMessage::Request { id, method, .. }) => {
                let reply = if method == "ping" {
                    JsonRpcResponse::success(id, Value::Object(Default::default()))
                } else {
                    JsonRpcResponse::failure(id, JsonRpcError::method_not_found(&method))
                };
                tracing::debug!(server = %name, method = %method, "answered server request");
                if let Ok(json) = serde_json::to_string(&reply) {
                    let mut stdin = writer.lock().await;
                    let _ = stdin.write_all(&framing.encode(&json)).await;
                    let _ = stdin.flush().await;
                }
            }
            Ok(IncomingMessage::Notification { method }) => {
                tracing::debug!(server = %name, method = %method, "server notification");
            }
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "discarding malformed MCP message");
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with ConnectionClosed.
    pending.lock().clear();
    tracing::info!(server = %name, "MCP server output closed");
}

/// Read one message in either framing. `Ok(None)` on end of stream.
pub(crate) async fn read_message<R>(reader: &mut BufReader<R>) -> Result<Option<Value>>
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(len) = trimmed.strip_prefix("Content-Length:") {
            let len: usize = len
                .trim()
                .parse()
                .map_err(|e| McpError::protocol(format!("invalid Content-Length: {}", e)))?;

            // Skip any remaining headers up to the blank separator line.
            loop {
                line.clear();
                if reader.read_line(&mut line).await? == 0 {
                    return Ok(None);
                }
                if line.trim().is_empty() {
                    break;
                }
            }

            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await?;
            return Ok(Some(serde_json::from_slice(&body)?));
        }

        return Ok(Some(serde_json::from_str(trimmed)?));
    }
}
