//! The backend trait every provider implements, plus a scripted mock.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse, ToolCall, Usage};

// ─────────────────────────────────────────────────────────────────────────────
// LLM Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// One HTTP integration with an LLM vendor.
///
/// Backends make exactly one attempt per call. Retries, circuit breaking and
/// model-list caching live in [`ProviderClient`](crate::ProviderClient).
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Execute a completion request.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Fetch the model ids the provider currently offers.
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Get the name of this backend.
    fn name(&self) -> &str;
}

/// A backend that can be shared across threads.
pub type SharedBackend = Arc<dyn LlmBackend>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Backend
// ─────────────────────────────────────────────────────────────────────────────

/// A mock backend for testing purposes.
///
/// Returns pre-configured responses (or errors) in order and records every
/// request it receives.
#[derive(Debug)]
pub struct MockBackend {
    name: String,
    responses: Mutex<VecDeque<Result<CompletionResponse>>>,
    models: Mutex<Result<Vec<String>>>,
    request_log: Mutex<Vec<CompletionRequest>>,
    model_fetches: Mutex<usize>,
}

impl MockBackend {
    /// Create a mock backend with the given responses.
    ///
    /// Once the script runs out, `complete` returns an error.
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            name: "mock".to_string(),
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            models: Mutex::new(Ok(vec!["mock-model".to_string()])),
            request_log: Mutex::new(Vec::new()),
            model_fetches: Mutex::new(0),
        }
    }

    /// Create a mock backend with a single text response.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![CompletionResponse::text(
            "mock_msg_1",
            "mock-model",
            text,
            Usage::new(10, 20),
        )])
    }

    /// A response that requests one tool call.
    pub fn tool_call_response(
        id: impl Into<String>,
        tool: impl Into<String>,
        arguments: serde_json::Value,
    ) -> CompletionResponse {
        CompletionResponse::text("mock_tool_msg", "mock-model", "", Usage::new(15, 5))
            .with_tool_calls(vec![ToolCall::new(Some(id.into()), tool, arguments)])
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_models(self, models: Vec<&str>) -> Self {
        self.set_models(models);
        self
    }

    /// Make `list_models` fail with a network error.
    pub fn with_failing_models(self) -> Self {
        self.set_failing_models();
        self
    }

    pub fn set_models(&self, models: Vec<&str>) {
        *self.models.lock() = Ok(models.into_iter().map(String::from).collect());
    }

    pub fn set_failing_models(&self) {
        *self.models.lock() = Err(LlmError::Network("mock: models unavailable".into()));
    }

    /// Queue a response after the existing ones.
    pub fn push_response(&self, response: CompletionResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queue an error after the existing responses.
    pub fn push_error(&self, error: LlmError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Get all requests that were made to this backend.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.request_log.lock().clone()
    }

    /// Get the number of requests made.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().len()
    }

    pub fn model_fetch_count(&self) -> usize {
        *self.model_fetches.lock()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.request_log.lock().push(request);

        self.responses.lock().pop_front().unwrap_or_else(|| {
            Err(LlmError::Backend(
                "MockBackend: no more responses available".to_string(),
            ))
        })
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        *self.model_fetches.lock() += 1;
        match &*self.models.lock() {
            Ok(models) => Ok(models.clone()),
            Err(e) => Err(LlmError::Network(e.to_string())),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
