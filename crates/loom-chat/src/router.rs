//! The orchestrator's view of the tool servers.

use async_trait::async_trait;
use loom_mcp::{CallToolResult, ServerRegistry, ToolDescriptor};
use serde_json::Value;

/// Tool catalog plus name-routed invocation.
///
/// Implemented by [`ServerRegistry`]; tests substitute scripted routers.
#[async_trait]
pub trait ToolRouter: Send + Sync {
    /// Every routable tool.
    fn tools(&self) -> Vec<ToolDescriptor>;

    /// Invoke `tool` on the server that owns it.
    async fn invoke(&self, tool: &str, arguments: Option<Value>) -> loom_mcp::Result<CallToolResult>;
}

#[async_trait]
impl ToolRouter for ServerRegistry {
    fn tools(&self) -> Vec<ToolDescriptor> {
        ServerRegistry::tools(self)
    }

    async fn invoke(&self, tool: &str, arguments: Option<Value>) -> loom_mcp::Result<CallToolResult> {
        ServerRegistry::invoke(self, tool, arguments).await
    }
}
