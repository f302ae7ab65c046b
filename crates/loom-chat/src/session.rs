//! Conversation state for one chat.
//!
//! A [`Session`] is owned by exactly one turn at a time; [`ChatService`]
//! enforces that with a mutex so a second message waits for the first turn.
//!
//! [`ChatService`]: crate::ChatService

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use loom_llm::{ActiveModel, Message, Role, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default number of non-system messages kept in history.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cumulative token counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn add(&mut self, usage: Usage) {
        self.input = self.input.saturating_add(usage.input_tokens);
        self.output = self.output.saturating_add(usage.output_tokens);
        self.total = self.input.saturating_add(self.output);
    }
}

/// A tool call that has been dispatched but has no result in history yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    pub correlation_id: String,
    pub tool: String,
    pub arguments: Value,
    pub started_at: DateTime<Utc>,
}

/// Ordered message history plus accounting.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    messages: Vec<Message>,
    history_limit: usize,
    active: Option<ActiveModel>,
    usage: TokenUsage,
    pending: BTreeMap<String, PendingCall>,
    created_at: DateTime<Utc>,
    turns: u64,
}

impl Session {
    pub fn new(history_limit: usize) -> Self {
        Self {
            id: SessionId::new(),
            messages: Vec::new(),
            history_limit: history_limit.max(1),
            active: None,
            usage: TokenUsage::default(),
            pending: BTreeMap::new(),
            created_at: Utc::now(),
            turns: 0,
        }
    }

    /// Start the history with a system prompt. System messages are never evicted.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.messages.push(Message::system(prompt));
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn turns(&self) -> u64 {
        self.turns
    }

    pub fn active(&self) -> Option<&ActiveModel> {
        self.active.as_ref()
    }

    pub fn set_active(&mut self, active: ActiveModel) {
        self.active = Some(active);
    }

    /// Append a user message, evicting old history if over the limit.
    ///
    /// This is the start of a turn, so it is the only append that trims.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns += 1;
        self.messages.push(Message::user(content));
        self.trim();
    }

    /// Append any message without trimming.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn record_usage(&mut self, usage: Usage) {
        self.usage.add(usage);
    }

    // ── Pending tool calls ──────────────────────────────────────────────────

    pub fn begin_call(&mut self, correlation_id: &str, tool: &str, arguments: &Value) {
        self.pending.insert(
            correlation_id.to_string(),
            PendingCall {
                correlation_id: correlation_id.to_string(),
                tool: tool.to_string(),
                arguments: arguments.clone(),
                started_at: Utc::now(),
            },
        );
    }

    /// Resolve a pending call; `None` if the id was never dispatched.
    pub fn complete_call(&mut self, correlation_id: &str) -> Option<PendingCall> {
        self.pending.remove(correlation_id)
    }

    pub fn pending_calls(&self) -> impl Iterator<Item = &PendingCall> {
        self.pending.values()
    }

    /// Drop every pending call, returning them.
    pub fn abandon_pending(&mut self) -> Vec<PendingCall> {
        std::mem::take(&mut self.pending).into_values().collect()
    }

    // ── Retention ───────────────────────────────────────────────────────────

    fn non_system_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.is_system()).count()
    }

    /// Evict the oldest non-system messages until within the limit.
    ///
    /// Tool results left at the head of the history without the assistant
    /// message that requested them are evicted too.
    fn trim(&mut self) {
        let mut evicted = 0usize;
        while self.non_system_count() > self.history_limit {
            if !self.evict_oldest() {
                break;
            }
            evicted += 1;
        }
        while self.head_is_orphaned_tool_result() {
            self.evict_oldest();
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(
                session_id = %self.id,
                evicted,
                remaining = self.messages.len(),
                "trimmed history"
            );
        }
    }

    fn evict_oldest(&mut self) -> bool {
        match self.messages.iter().position(|m| !m.is_system()) {
            Some(pos) => {
                self.messages.remove(pos);
                true
            }
            None => false,
        }
    }

    fn head_is_orphaned_tool_result(&self) -> bool {
        self.messages
            .iter()
            .find(|m| !m.is_system())
            .is_some_and(|m| m.role == Role::Tool)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}
