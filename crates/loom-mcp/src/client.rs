//! Typed MCP client over a [`StdioTransport`].

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{McpError, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, GetPromptResult, InitializeParams, InitializeResult,
    ListPromptsResult, ListResourcesResult, ListToolsResult, PromptInfo, ReadResourceResult,
    ResourceInfo, ServerCapabilities, ServerInfo, ToolInfo,
};
use crate::transport::{LaunchSpec, StdioTransport};

/// Upper bound on pagination rounds for a single list call.
const MAX_LIST_PAGES: usize = 64;

/// An MCP client bound to one running server process.
pub struct McpClient {
    name: String,
    transport: StdioTransport,
    init: Option<InitializeResult>,
    read_timeout: Duration,
}

impl McpClient {
    /// Spawn the server. Does not initialize the session.
    pub fn spawn(name: &str, launch: &LaunchSpec, read_timeout: Duration) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            transport: StdioTransport::start(name, launch)?,
            init: None,
            read_timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.init.as_ref().map(|i| &i.server_info)
    }

    pub fn capabilities(&self) -> Option<&ServerCapabilities> {
        self.init.as_ref().map(|i| &i.capabilities)
    }

    pub fn is_initialized(&self) -> bool {
        self.init.is_some()
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// Perform the MCP handshake.
    pub async fn initialize(&mut self, timeout: Duration) -> Result<&InitializeResult> {
        if self.init.is_none() {
            let params = serde_json::to_value(InitializeParams::default())?;
            let result = self
                .transport
                .request("initialize", Some(params), timeout)
                .await?;
            let init: InitializeResult = serde_json::from_value(result)?;

            tracing::info!(
                server = %self.name,
                remote = %init.server_info.name,
                version = %init.server_info.version,
                protocol = %init.protocol_version,
                "MCP server initialized"
            );

            self.transport
                .notify("notifications/initialized", None)
                .await?;
            self.init = Some(init);
        }

        self.init.as_ref().ok_or(McpError::NotInitialized)
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T> {
        if self.init.is_none() {
            return Err(McpError::NotInitialized);
        }
        let value = self
            .transport
            .request(method, params, self.read_timeout)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Follow `nextCursor` until exhausted.
    async fn list_paged<P, T>(
        &self,
        method: &str,
        mut take: impl FnMut(P) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: P = self.request(method, params).await?;
            let (mut batch, next) = take(page);
            items.append(&mut batch);
            match next {
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }
        }
        tracing::warn!(server = %self.name, method, "pagination limit reached");
        Ok(items)
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let tools = self
            .list_paged("tools/list", |p: ListToolsResult| (p.tools, p.next_cursor))
            .await?;
        tracing::debug!(server = %self.name, tool_count = tools.len(), "listed MCP tools");
        Ok(tools)
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceInfo>> {
        self.list_paged("resources/list", |p: ListResourcesResult| {
            (p.resources, p.next_cursor)
        })
        .await
    }

    pub async fn list_prompts(&self) -> Result<Vec<PromptInfo>> {
        self.list_paged("prompts/list", |p: ListPromptsResult| {
            (p.prompts, p.next_cursor)
        })
        .await
    }

    /// Call a tool on the server.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result: CallToolResult = self
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;

        if result.is_error() {
            tracing::warn!(server = %self.name, tool = %name, "tool call returned error");
        } else {
            tracing::debug!(server = %self.name, tool = %name, "tool call succeeded");
        }
        Ok(result)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.request("resources/read", Some(json!({ "uri": uri })))
            .await
    }

    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<GetPromptResult> {
        let mut params = json!({ "name": name });
        if let Some(args) = arguments {
            params["arguments"] = args;
        }
        self.request("prompts/get", Some(params)).await
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<()> {
        let _: Value = self.request("ping", None).await?;
        Ok(())
    }

    /// Shut down the server process.
    pub async fn shutdown(&self) {
        tracing::info!(server = %self.name, "shutting down MCP client");
        self.transport.close().await;
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
