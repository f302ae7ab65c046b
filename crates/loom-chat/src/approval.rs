//! Operator confirmation for tool calls.

use async_trait::async_trait;
use loom_mcp::ToolDescriptor;

use crate::orchestrator::ToolCallRequest;

/// Decides whether a tool call outside the server's auto-approve set may run.
#[async_trait]
pub trait ToolApprover: Send + Sync {
    async fn approve(&self, request: &ToolCallRequest, tool: &ToolDescriptor) -> bool;
}

/// Approves every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

#[async_trait]
impl ToolApprover for ApproveAll {
    async fn approve(&self, _request: &ToolCallRequest, _tool: &ToolDescriptor) -> bool {
        true
    }
}
