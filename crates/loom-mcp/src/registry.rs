//! Registry of tool-server connections.
//!
//! The [`ServerRegistry`] owns every [`ServerConnection`] and a lookup table
//! from tool, prompt and resource names to the owning server. The table is
//! rebuilt whenever a connection's catalog changes; a call is routed by exact
//! name match and fails closed when nothing owns the name.
//!
//! Two servers exposing the same tool or prompt name is a configuration
//! error at startup. If a collision only appears later (after a reconnect or
//! refresh), the server that sorts first keeps the name and the collision is
//! logged.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::{PromptDescriptor, ResourceDescriptor, ToolDescriptor};
use crate::connection::{ConnectionConfig, ServerConnection, ServerHealth, ServerSpec};
use crate::error::{McpError, Result};
use crate::protocol::{CallToolResult, GetPromptResult, ReadResourceResult};

#[derive(Debug, Default)]
struct Index {
    /// Sum of connection generations the index was built from.
    generation: u64,
    tools: HashMap<String, String>,
    prompts: HashMap<String, String>,
    resources: HashMap<String, String>,
}

/// Owner of all tool-server connections.
pub struct ServerRegistry {
    connections: BTreeMap<String, Arc<ServerConnection>>,
    index: RwLock<Index>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ServerRegistry {
    /// Create connections for every enabled spec. Nothing is spawned yet.
    pub fn new(specs: impl IntoIterator<Item = ServerSpec>, config: ConnectionConfig) -> Self {
        let mut connections = BTreeMap::new();
        for spec in specs {
            if spec.disabled {
                tracing::info!(server = %spec.name, "skipping disabled MCP server");
                continue;
            }
            let name = spec.name.clone();
            connections.insert(name, Arc::new(ServerConnection::new(spec, config.clone())));
        }

        Self {
            connections,
            index: RwLock::new(Index::default()),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Connect every server concurrently and start their health tasks.
    ///
    /// Servers that fail to connect are left in Failed and retried by their
    /// health task. Returns the number connected, or a collision error.
    pub async fn start(&self) -> Result<usize> {
        let results = join_all(self.connections.values().map(|c| c.connect())).await;
        let connected = results.iter().filter(|r| r.is_ok()).count();

        tracing::info!(
            connected,
            total = self.connections.len(),
            "MCP server connection complete"
        );

        self.rebuild_index(true)?;

        let mut tasks = self.tasks.lock();
        for conn in self.connections.values() {
            tasks.push(conn.spawn_health_task(self.shutdown.child_token()));
        }
        Ok(connected)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ServerConnection>> {
        self.connections.get(name)
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.connections.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    // ── Index ───────────────────────────────────────────────────────────────

    fn current_generation(&self) -> u64 {
        self.connections.values().map(|c| c.generation()).sum()
    }

    /// Rebuild the name index from every connection's catalog.
    ///
    /// With `strict`, a name exposed by two servers is an error and the old
    /// index is kept.
    fn rebuild_index(&self, strict: bool) -> Result<()> {
        let generation = self.current_generation();
        let mut next = Index {
            generation,
            ..Index::default()
        };

        for (server, conn) in &self.connections {
            let snapshot = conn.list_capabilities();
            for tool in &snapshot.catalog.tools {
                claim(&mut next.tools, "tool", &tool.name, server, strict)?;
            }
            for prompt in &snapshot.catalog.prompts {
                claim(&mut next.prompts, "prompt", &prompt.name, server, strict)?;
            }
            for resource in &snapshot.catalog.resources {
                next.resources
                    .entry(resource.uri.clone())
                    .or_insert_with(|| server.clone());
            }
        }

        *self.index.write() = next;
        Ok(())
    }

    fn ensure_index(&self) {
        if self.index.read().generation != self.current_generation() {
            // Non-strict rebuild cannot fail.
            let _ = self.rebuild_index(false);
        }
    }

    fn owner(
        &self,
        kind: fn(&Index) -> &HashMap<String, String>,
        key: &str,
    ) -> Option<Arc<ServerConnection>> {
        self.ensure_index();
        let index = self.index.read();
        kind(&*index)
            .get(key)
            .and_then(|server| self.connections.get(server))
            .cloned()
    }

    // ── Routing ─────────────────────────────────────────────────────────────

    /// Route a tool call to the server that owns `tool`.
    pub async fn invoke(&self, tool: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        let conn = self
            .owner(|i| &i.tools, tool)
            .ok_or_else(|| McpError::ToolNotFound(tool.to_string()))?;
        tracing::debug!(server = %conn.name(), tool, "routing tool call");
        conn.invoke(tool, arguments).await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let conn = self
            .owner(|i| &i.resources, uri)
            .ok_or_else(|| McpError::ResourceNotFound(uri.to_string()))?;
        conn.read_resource(uri).await
    }

    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<GetPromptResult> {
        let conn = self
            .owner(|i| &i.prompts, name)
            .ok_or_else(|| McpError::PromptNotFound(name.to_string()))?;
        conn.get_prompt(name, arguments).await
    }

    // ── Catalog views ───────────────────────────────────────────────────────

    /// Every routable tool, in server order.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.ensure_index();
        let index = self.index.read();
        self.connections
            .values()
            .flat_map(|c| c.list_capabilities().catalog.tools.clone())
            .filter(|t| index.tools.get(&t.name) == Some(&t.server))
            .collect()
    }

    pub fn resources(&self) -> Vec<ResourceDescriptor> {
        self.ensure_index();
        let index = self.index.read();
        self.connections
            .values()
            .flat_map(|c| c.list_capabilities().catalog.resources.clone())
            .filter(|r| index.resources.get(&r.uri) == Some(&r.server))
            .collect()
    }

    pub fn prompts(&self) -> Vec<PromptDescriptor> {
        self.ensure_index();
        let index = self.index.read();
        self.connections
            .values()
            .flat_map(|c| c.list_capabilities().catalog.prompts.clone())
            .filter(|p| index.prompts.get(&p.name) == Some(&p.server))
            .collect()
    }

    // ── Maintenance ─────────────────────────────────────────────────────────

    /// Per-server state and catalog sizes.
    pub fn snapshot_health(&self) -> Vec<ServerHealth> {
        self.connections.values().map(|c| c.health()).collect()
    }

    /// Re-run discovery on every Connected or Degraded server.
    pub async fn refresh_all(&self) -> Vec<(String, Result<usize>)> {
        let targets: Vec<_> = self
            .connections
            .values()
            .filter(|c| c.state().is_servable())
            .collect();

        let results = join_all(targets.iter().map(|c| async move {
            (c.name().to_string(), c.refresh().await)
        }))
        .await;

        for (server, result) in &results {
            if let Err(e) = result {
                tracing::warn!(server = %server, error = %e, "catalog refresh failed");
            }
        }
        self.ensure_index();
        results
    }

    /// Restart one server.
    pub async fn reconnect(&self, name: &str) -> Result<()> {
        let conn = self
            .connections
            .get(name)
            .ok_or_else(|| McpError::UnknownServer(name.to_string()))?;
        conn.connect().await?;
        self.ensure_index();
        Ok(())
    }

    /// Stop health tasks and every server process.
    pub async fn shutdown(&self) {
        tracing::info!(server_count = self.connections.len(), "shutting down all MCP servers");
        self.shutdown.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        join_all(tasks).await;
        join_all(self.connections.values().map(|c| c.shutdown())).await;
    }
}

fn claim(
    map: &mut HashMap<String, String>,
    kind: &'static str,
    name: &str,
    server: &str,
    strict: bool,
) -> Result<()> {
    match map.get(name) {
        Some(first) if first != server => {
            let err = McpError::NameCollision {
                kind,
                name: name.to_string(),
                first: first.clone(),
                second: server.to_string(),
            };
            if strict {
                return Err(err);
            }
            tracing::error!(error = %err, "ignoring colliding name");
            Ok(())
        }
        Some(_) => Ok(()),
        None => {
            map.insert(name.to_string(), server.to_string());
            Ok(())
        }
    }
}

impl Drop for ServerRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("servers", &self.connections.keys().collect::<Vec<_>>())
            .finish()
    }
}
