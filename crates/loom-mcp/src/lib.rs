//! Tool-server (MCP) connections for Loom.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ServerRegistry                                             │
//! │  - owns every connection, name → server lookup table        │
//! │  - routes invoke / read_resource / get_prompt               │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ServerConnection                                           │
//! │  - lifecycle state machine, catalog, health loop            │
//! │  - calls guarded by CircuitBreaker + RetryPolicy            │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpClient / StdioTransport                                 │
//! │  - JSON-RPC 2.0 over the child's stdin/stdout               │
//! │  - reader task resolves responses by request id             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use loom_mcp::{ConnectionConfig, ServerRegistry, ServerSpec};
//!
//! let registry = ServerRegistry::new(
//!     vec![ServerSpec::new("search", "mcp-search").with_arg("--stdio")],
//!     ConnectionConfig::default(),
//! );
//! registry.start().await?;
//!
//! let result = registry
//!     .invoke("web_search", Some(json!({"query": "weather in Paris"})))
//!     .await?;
//! println!("{}", result.render());
//! ```

pub mod catalog;
pub mod client;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use catalog::{Catalog, PromptDescriptor, ResourceDescriptor, ToolDescriptor};
pub use client::McpClient;
pub use connection::{
    CatalogSnapshot, ConnectionConfig, ConnectionState, ServerConnection, ServerHealth,
    ServerSpec,
};
pub use error::{McpError, Result};
pub use protocol::{
    CallToolResult, GetPromptResult, PromptArgument, PromptMessage, ReadResourceResult,
    ResourceContents, ToolContent,
};
pub use registry::ServerRegistry;
pub use transport::{Framing, LaunchSpec, StdioTransport};
