//! LLM provider clients for Loom.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ProviderRegistry                                           │
//! │  - every configured provider, keyed by name                 │
//! │  - the active (provider, model) pair, switched atomically   │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ProviderClient                                             │
//! │  - CircuitBreaker + RetryPolicy per provider                │
//! │  - model list cache with TTL and fallback defaults          │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  LlmBackend                                                 │
//! │  - OpenAiBackend (groq, openai, gemini, openroute, github,  │
//! │    ollama)                                                  │
//! │  - AnthropicBackend                                         │
//! │  - MockBackend for tests                                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use loom_llm::{Message, ProviderClient, ProviderRegistry, ProviderSettings, preset};
//!
//! let settings = ProviderSettings::default();
//! let groq = ProviderClient::from_preset(
//!     preset("groq").unwrap(),
//!     std::env::var("GROQ_API_KEY").ok(),
//!     None,
//!     &settings,
//! )?;
//! let registry = ProviderRegistry::new(vec![groq], "groq", None)?;
//!
//! let (client, active) = registry.active_client()?;
//! let response = client
//!     .complete(vec![Message::user("Hello")], vec![], &active.model)
//!     .await?;
//! println!("{}", response.content);
//! ```

pub mod anthropic;
pub mod backend;
pub mod catalog;
pub mod error;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod types;

pub use anthropic::{AnthropicBackend, AnthropicConfig};
pub use backend::{LlmBackend, MockBackend, SharedBackend};
pub use catalog::{DEFAULT_OLLAMA_HOST, ProviderKind, ProviderPreset, builtin_presets, preset};
pub use error::{LlmError, RateLimitInfo, Result};
pub use openai::{OpenAiBackend, OpenAiConfig};
pub use provider::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MODEL_CACHE_TTL, DEFAULT_PROVIDER_TIMEOUT, ProviderClient,
    ProviderHealth, ProviderSettings, SharedProvider,
};
pub use registry::{ActiveModel, ProviderListing, ProviderRegistry};
pub use types::{
    CompletionRequest, CompletionResponse, DEFAULT_MAX_TOKENS, Message, Role, StopReason,
    ToolCall, ToolDefinition, Usage,
};
