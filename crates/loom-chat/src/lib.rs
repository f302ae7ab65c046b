//! Chat sessions over tool servers and LLM providers.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       ChatService                        │
//! │  list/switch providers · tools · status · send_message   │
//! └───────────────┬──────────────────────────────────────────┘
//!                 │ one turn at a time (session mutex)
//! ┌───────────────▼──────────────┐
//! │       ChatOrchestrator       │
//! │  complete → tools → complete │
//! └──────┬─────────────────┬─────┘
//!        │                 │
//! ┌──────▼───────┐  ┌──────▼───────┐
//! │ ProviderReg. │  │  ToolRouter  │ ← ServerRegistry
//! └──────────────┘  └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use loom_chat::{ChatService, Session};
//!
//! let service = ChatService::new(providers, servers, Session::default());
//! let result = service.send_message("What's the weather in Paris?").await?;
//! println!("{}", result.text);
//! ```

pub mod approval;
pub mod error;
pub mod orchestrator;
pub mod router;
pub mod service;
pub mod session;

pub use approval::{ApproveAll, ToolApprover};
pub use error::{ChatError, Result};
pub use orchestrator::{ChatOrchestrator, ToolCallOutcome, ToolCallRequest, TurnResult};
pub use router::ToolRouter;
pub use service::{ChatService, ChatStatus};
pub use session::{DEFAULT_HISTORY_LIMIT, PendingCall, Session, SessionId, TokenUsage};
