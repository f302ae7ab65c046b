//! Capability catalog entries discovered from tool servers.
//!
//! Descriptors carry the owning server's name as a lookup key; the registry
//! resolves it to a connection when a call is routed.

use serde_json::Value;
use tokio::time::Instant;

use crate::protocol::{PromptArgument, PromptInfo, ResourceInfo, ToolInfo};

/// A callable tool and the server that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments.
    pub input_schema: Value,
    pub server: String,
    /// Listed in the server's auto-approve set.
    pub auto_approve: bool,
}

impl ToolDescriptor {
    pub fn from_info(info: ToolInfo, server: &str, auto_approve: bool) -> Self {
        Self {
            description: info.description.unwrap_or_default(),
            input_schema: info
                .input_schema
                .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
            name: info.name,
            server: server.to_string(),
            auto_approve,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub server: String,
}

impl ResourceDescriptor {
    pub fn from_info(info: ResourceInfo, server: &str) -> Self {
        Self {
            uri: info.uri,
            name: info.name,
            description: info.description,
            mime_type: info.mime_type,
            server: server.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub arguments: Vec<PromptArgument>,
    pub server: String,
}

impl PromptDescriptor {
    pub fn from_info(info: PromptInfo, server: &str) -> Self {
        Self {
            name: info.name,
            description: info.description,
            arguments: info.arguments,
            server: server.to_string(),
        }
    }
}

/// Everything one server advertised at its last successful discovery.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
    pub prompts: Vec<PromptDescriptor>,
    pub refreshed_at: Option<Instant>,
}

impl Catalog {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.resources.is_empty() && self.prompts.is_empty()
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_descriptor_defaults() {
        let info = ToolInfo {
            name: "web_search".into(),
            description: None,
            input_schema: None,
        };
        let tool = ToolDescriptor::from_info(info, "search", true);
        assert_eq!(tool.server, "search");
        assert!(tool.auto_approve);
        assert_eq!(tool.description, "");
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_catalog_lookup() {
        let mut catalog = Catalog::default();
        assert!(catalog.is_empty());
        catalog.tools.push(ToolDescriptor::from_info(
            ToolInfo {
                name: "echo".into(),
                description: Some("Echo".into()),
                input_schema: None,
            },
            "mock",
            false,
        ));
        assert!(catalog.tool("echo").is_some());
        assert!(catalog.tool("add").is_none());
    }

    #[test]
    fn test_prompt_descriptor_keeps_arguments() {
        let info: PromptInfo = serde_json::from_value(serde_json::json!({
            "name": "summarize",
            "arguments": [{"name": "text", "required": true}]
        }))
        .unwrap();
        let prompt = PromptDescriptor::from_info(info.clone(), "docs");
        assert_eq!(prompt, PromptDescriptor::from_info(info, "docs"));
        assert_eq!(
            prompt.arguments,
            vec![PromptArgument {
                name: "text".into(),
                description: None,
                required: true,
            }]
        );
        let bare = PromptInfo {
            name: "summarize".into(),
            description: None,
            arguments: vec![],
        };
        assert_ne!(prompt, PromptDescriptor::from_info(bare, "docs"));
    }
}
