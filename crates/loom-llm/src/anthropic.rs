//! Anthropic API backend implementation.
//!
//! Connects to the Messages API. System messages travel out of band in the
//! `system` field, tool calls are `tool_use` content blocks, and tool results
//! are `tool_result` blocks inside a user turn.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, header};
use serde_json::{Value, json};

use crate::backend::LlmBackend;
use crate::error::{LlmError, Result, error_from_response, transport_error};
use crate::openai::extract_model_ids;
use crate::types::{
    CompletionRequest, CompletionResponse, Message, Role, StopReason, ToolCall, Usage,
};

/// Default API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// Default API version.
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Default timeout for requests.
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the Anthropic backend.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key for authentication.
    pub api_key: String,

    /// Base URL for the API.
    pub base_url: String,

    /// API version header.
    pub api_version: String,

    /// Request timeout.
    pub timeout: Duration,

    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl AnthropicConfig {
    /// Create a new config with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_API_BASE.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Anthropic Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Anthropic API backend.
pub struct AnthropicBackend {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicBackend {
    /// Create a new Anthropic backend with the given configuration.
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Build the messages endpoint URL.
    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/v1/models", self.config.base_url)
    }

    /// Add authentication and API headers to a request.
    fn add_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header(header::CONTENT_TYPE, "application/json")
    }

    async fn handle_response(response: Response) -> Result<CompletionResponse> {
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body = response.text().await?;
        let parsed: ApiResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Serialization(e.to_string()))?;

        Ok(parsed.into())
    }
}

/// Build the Messages API request body.
fn to_api_request(request: &CompletionRequest) -> Value {
    let mut messages: Vec<Value> = Vec::new();

    for m in request.messages.iter().filter(|m| !m.is_system()) {
        match m.role {
            Role::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                    "content": m.content,
                    "is_error": m.is_error,
                });
                push_block(&mut messages, "user", block);
            }
            Role::Assistant if !m.tool_calls.is_empty() => {
                let mut blocks = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": m.content}));
                }
                for tc in &m.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id.clone().unwrap_or_default(),
                        "name": tc.name,
                        "input": tc.arguments,
                    }));
                }
                messages.push(json!({"role": "assistant", "content": blocks}));
            }
            role => {
                let role = if role == Role::Assistant { "assistant" } else { "user" };
                push_block(&mut messages, role, json!({"type": "text", "text": m.content}));
            }
        }
    }

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "messages": messages,
    });

    if let Some(system) = request.system_prompt() {
        body["system"] = Value::String(system);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
    }
    body
}

/// Append a content block, merging into the previous message when the role
/// repeats (the API requires alternating roles).
fn push_block(messages: &mut Vec<Value>, role: &str, block: Value) {
    if let Some(last) = messages.last_mut() {
        if last["role"] == role {
            if let Some(content) = last["content"].as_array_mut() {
                content.push(block);
                return;
            }
        }
    }
    messages.push(json!({"role": role, "content": [block]}));
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = to_api_request(&request);

        tracing::debug!(
            backend = "anthropic",
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending Anthropic request"
        );

        let response = self
            .add_headers(self.client.post(self.messages_url()))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("anthropic", e))?;

        Self::handle_response(response).await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .add_headers(self.client.get(self.models_url()))
            .send()
            .await
            .map_err(|e| transport_error("anthropic", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: Value = response.json().await?;
        Ok(extract_model_ids(&body, None))
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    content: Vec<ApiContentBlock>,
    #[serde(default)]
    model: String,
    stop_reason: Option<String>,
    usage: ApiUsage,
}

impl From<ApiResponse> for CompletionResponse {
    fn from(api: ApiResponse) -> Self {
        let mut text = Vec::new();
        let mut tool_calls = Vec::new();

        for block in api.content {
            match block {
                ApiContentBlock::Text { text: t } => text.push(t),
                ApiContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::new(Some(id), name, input));
                }
                ApiContentBlock::Other => {}
            }
        }

        let stop_reason = match api.stop_reason.as_deref() {
            Some("end_turn") | Some("stop_sequence") | None => StopReason::EndTurn,
            Some("tool_use") => StopReason::ToolUse,
            Some("max_tokens") => StopReason::MaxTokens,
            Some(_) => StopReason::Other,
        };

        CompletionResponse {
            id: api.id,
            model: api.model,
            content: text.join(""),
            tool_calls,
            stop_reason,
            usage: Usage::new(api.usage.input_tokens, api.usage.output_tokens),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, serde::Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolDefinition;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_config_new() {
        let config = AnthropicConfig::new("sk-ant-test");
        assert_eq!(config.base_url, DEFAULT_API_BASE);
        assert_eq!(config.api_version, "2023-06-01");
    }

    #[test]
    fn test_messages_url_custom_base() {
        let backend =
            AnthropicBackend::new(AnthropicConfig::new("k").with_base_url("http://localhost:9/"))
                .unwrap();
        assert_eq!(backend.messages_url(), "http://localhost:9/v1/messages");
    }

    #[test]
    fn test_request_body_shapes_tool_turns() {
        let request = CompletionRequest::new(
            "claude-3-5-sonnet-20240620",
            vec![
                Message::system("be brief"),
                Message::user("weather and time?"),
                Message::assistant_tool_calls(
                    "Checking.",
                    vec![
                        ToolCall::new(Some("tu_1".into()), "web_search", json!({"q": "weather"})),
                        ToolCall::new(Some("tu_2".into()), "clock", json!({})),
                    ],
                ),
                Message::tool_result("tu_2", "clock", "12:00", false),
                Message::tool_result("tu_1", "web_search", "boom", true),
            ],
        )
        .with_tools(vec![ToolDefinition::new(
            "web_search",
            "Search",
            json!({"type": "object"}),
        )]);

        let body = to_api_request(&request);
        assert_eq!(body["system"], "be brief");

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][0]["type"], "text");
        assert_eq!(messages[1]["content"][1]["type"], "tool_use");
        assert_eq!(messages[1]["content"][2]["id"], "tu_2");

        // Both results merged into one user turn, in arrival order.
        assert_eq!(messages[2]["role"], "user");
        let results = messages[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "tu_2");
        assert_eq!(results[1]["is_error"], true);

        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn test_api_response_with_tool_use() {
        let api: ApiResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-sonnet-20240620",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "tu_1", "name": "read_file", "input": {"path": "/foo.rs"}},
                {"type": "thinking", "thinking": "..."}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 50, "output_tokens": 30}
        }))
        .unwrap();

        let response: CompletionResponse = api.into();
        assert_eq!(response.content, "Let me check.");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_calls[0].id.as_deref(), Some("tu_1"));
        assert_eq!(response.usage.total(), 80);
    }

    #[tokio::test]
    async fn test_complete_sends_api_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", DEFAULT_API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "model": "claude",
                "content": [{"type": "text", "text": "Bonjour"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 3, "output_tokens": 2}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend =
            AnthropicBackend::new(AnthropicConfig::new("sk-ant-test").with_base_url(server.uri()))
                .unwrap();
        let response = backend
            .complete(CompletionRequest::new("claude", vec![Message::user("Hi")]))
            .await
            .unwrap();
        assert_eq!(response.content, "Bonjour");
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "claude-3-opus-20240229", "type": "model"}]
            })))
            .mount(&server)
            .await;

        let backend =
            AnthropicBackend::new(AnthropicConfig::new("k").with_base_url(server.uri())).unwrap();
        assert_eq!(
            backend.list_models().await.unwrap(),
            vec!["claude-3-opus-20240229"]
        );
    }

    #[tokio::test]
    async fn test_overloaded_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_json(json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .mount(&server)
            .await;

        let backend =
            AnthropicBackend::new(AnthropicConfig::new("k").with_base_url(server.uri())).unwrap();
        let err = backend
            .complete(CompletionRequest::new("claude", vec![Message::user("Hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Server { status: 529, .. }));
        assert!(err.is_retryable());
    }
}
