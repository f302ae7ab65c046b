//! OpenAI-compatible API backend implementation.
//!
//! Serves OpenAI itself and every provider that speaks the same chat
//! completions dialect (Groq, Gemini's compatibility endpoint, OpenRouter,
//! GitHub Models, Ollama).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, header};
use serde_json::Value;

use crate::backend::LlmBackend;
use crate::error::{LlmError, Result, error_from_response, transport_error};
use crate::types::{
    CompletionRequest, CompletionResponse, Message, Role, StopReason, ToolCall, Usage,
};

/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

/// Default timeout for requests.
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for an OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Name for this backend instance.
    pub name: String,

    /// Base URL; `/chat/completions` is appended for completions.
    pub base_url: String,

    /// Model listing endpoint.
    pub models_url: String,

    /// API key sent as a Bearer token (optional for local services).
    pub api_key: Option<String>,

    /// Extra headers sent with every request.
    pub extra_headers: Vec<(String, String)>,

    /// Keep only model ids containing this substring.
    pub model_filter: Option<String>,

    /// Request timeout.
    pub timeout: Duration,

    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl OpenAiConfig {
    /// A config for an OpenAI-compatible service at `base_url`.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            name: name.into(),
            models_url: format!("{}/models", base_url),
            base_url,
            api_key: None,
            extra_headers: Vec::new(),
            model_filter: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Create a new config for OpenAI.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", DEFAULT_OPENAI_BASE)
            .with_api_key(api_key)
            .with_model_filter("gpt")
    }

    /// Set a custom base URL; the models URL follows it.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self.models_url = format!("{}/models", self.base_url);
        self
    }

    pub fn with_models_url(mut self, url: impl Into<String>) -> Self {
        self.models_url = url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_model_filter(mut self, filter: impl Into<String>) -> Self {
        self.model_filter = Some(filter.into());
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
// OpenAI Backend
// ─────────────────────────────────────────────────────────────────────────────

/// OpenAI-compatible API backend.
pub struct OpenAiBackend {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiBackend {
    /// Create a new OpenAI-compatible backend with the given configuration.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    /// Build the chat completions endpoint URL.
    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    /// Add authentication and extra headers to a request.
    fn add_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder.header(header::CONTENT_TYPE, "application/json");

        if let Some(ref api_key) = self.config.api_key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", api_key));
        }
        for (name, value) in &self.config.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    /// Convert our CompletionRequest to OpenAI-compatible format.
    fn to_openai_request(&self, request: &CompletionRequest) -> OpenAiChatRequest {
        let messages = request.messages.iter().map(to_openai_message).collect();

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAiTool {
                        tool_type: "function".to_string(),
                        function: OpenAiFunction {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect(),
            )
        };

        OpenAiChatRequest {
            model: request.model.clone(),
            messages,
            max_tokens: Some(request.max_tokens),
            temperature: request.temperature,
            tools,
        }
    }

    async fn handle_response(response: Response) -> Result<CompletionResponse> {
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body = response.text().await?;
        let parsed: OpenAiChatResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Serialization(e.to_string()))?;

        Ok(parsed.into())
    }
}

fn to_openai_message(m: &Message) -> OpenAiMessage {
    match m.role {
        Role::Assistant if !m.tool_calls.is_empty() => OpenAiMessage {
            role: "assistant".to_string(),
            content: if m.content.is_empty() {
                None
            } else {
                Some(m.content.clone())
            },
            tool_calls: Some(
                m.tool_calls
                    .iter()
                    .map(|tc| OpenAiToolCall {
                        id: tc.id.clone().unwrap_or_default(),
                        call_type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.arguments.to_string(),
                        },
                    })
                    .collect(),
            ),
            tool_call_id: None,
        },
        Role::Tool => OpenAiMessage {
            role: "tool".to_string(),
            content: Some(m.content.clone()),
            tool_calls: None,
            tool_call_id: Some(m.tool_call_id.clone().unwrap_or_default()),
        },
        role => OpenAiMessage {
            role: role.as_str().to_string(),
            content: Some(m.content.clone()),
            tool_calls: None,
            tool_call_id: None,
        },
    }
}

/// Pull model ids out of a models listing.
///
/// Accepts `{"data": [{"id"}]}` (OpenAI style), `{"models": [{"name"}]}`
/// (Ollama tags) or a bare array of either.
pub(crate) fn extract_model_ids(body: &Value, filter: Option<&str>) -> Vec<String> {
    let entries = body
        .get("data")
        .or_else(|| body.get("models"))
        .unwrap_or(body)
        .as_array()
        .cloned()
        .unwrap_or_default();

    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(s.clone()),
            other => other
                .get("id")
                .or_else(|| other.get("name"))
                .and_then(Value::as_str)
                .map(String::from),
        })
        .filter(|id| filter.is_none_or(|f| id.to_lowercase().contains(f)))
        .collect()
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let openai_request = self.to_openai_request(&request);

        tracing::debug!(
            backend = %self.config.name,
            model = %openai_request.model,
            messages = openai_request.messages.len(),
            tools = openai_request.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "Sending OpenAI-compatible request"
        );

        let response = self
            .add_headers(self.client.post(self.completions_url()))
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| transport_error(&self.config.name, e))?;

        Self::handle_response(response).await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .add_headers(self.client.get(&self.config.models_url))
            .send()
            .await
            .map_err(|e| transport_error(&self.config.name, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: Value = response.json().await?;
        Ok(extract_model_ids(&body, self.config.model_filter.as_deref()))
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI API Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
}

#[derive(Debug, serde::Serialize)]
struct OpenAiMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, serde::Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAiFunction,
}

#[derive(Debug, serde::Serialize)]
struct OpenAiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: Value,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct OpenAiToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    id: String,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    model: String,
    usage: Option<OpenAiUsage>,
}

impl From<OpenAiChatResponse> for CompletionResponse {
    fn from(resp: OpenAiChatResponse) -> Self {
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut stop_reason = StopReason::EndTurn;

        if let Some(choice) = resp.choices.into_iter().next() {
            content = choice.message.content.unwrap_or_default();

            for tc in choice.message.tool_calls.unwrap_or_default() {
                let arguments = if tc.function.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&tc.function.arguments)
                        .unwrap_or(Value::String(tc.function.arguments))
                };
                let id = (!tc.id.is_empty()).then_some(tc.id);
                tool_calls.push(ToolCall::new(id, tc.function.name, arguments));
            }

            stop_reason = match choice.finish_reason.as_deref() {
                Some("stop") | None => StopReason::EndTurn,
                Some("tool_calls") | Some("function_call") => StopReason::ToolUse,
                Some("length") => StopReason::MaxTokens,
                Some(_) => StopReason::Other,
            };
        }

        if !tool_calls.is_empty() {
            stop_reason = StopReason::ToolUse;
        }

        let usage = resp
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        CompletionResponse {
            id: resp.id,
            model: resp.model,
            content,
            tool_calls,
            stop_reason,
            usage,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolDefinition;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend_for(server: &MockServer) -> OpenAiBackend {
        OpenAiBackend::new(
            OpenAiConfig::new("test", server.uri())
                .with_api_key("sk-test")
                .with_header("X-Title", "Loom"),
        )
        .unwrap()
    }

    #[test]
    fn test_openai_config() {
        let config = OpenAiConfig::openai("test-key");
        assert_eq!(config.api_key, Some("test-key".to_string()));
        assert_eq!(config.base_url, DEFAULT_OPENAI_BASE);
        assert_eq!(config.models_url, "https://api.openai.com/v1/models");
        assert_eq!(config.name, "openai");
        assert_eq!(config.model_filter.as_deref(), Some("gpt"));
    }

    #[test]
    fn test_completions_url_trims_slash() {
        let backend = OpenAiBackend::new(OpenAiConfig::new("x", "http://host/v1/")).unwrap();
        assert_eq!(backend.completions_url(), "http://host/v1/chat/completions");
    }

    #[test]
    fn test_to_openai_request_maps_tool_turns() {
        let backend = OpenAiBackend::new(OpenAiConfig::new("x", "http://host")).unwrap();
        let request = CompletionRequest::new(
            "gpt-4o",
            vec![
                Message::system("be brief"),
                Message::user("weather?"),
                Message::assistant_tool_calls(
                    "",
                    vec![ToolCall::new(
                        Some("call_1".into()),
                        "web_search",
                        json!({"query": "weather in Paris"}),
                    )],
                ),
                Message::tool_result("call_1", "web_search", "sunny", false),
            ],
        )
        .with_tools(vec![ToolDefinition::new(
            "web_search",
            "Search the web",
            json!({"type": "object"}),
        )]);

        let body = serde_json::to_value(backend.to_openai_request(&request)).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[2]["role"], "assistant");
        assert!(messages[2]["content"].is_null());
        assert_eq!(messages[2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            messages[2]["tool_calls"][0]["function"]["arguments"],
            r#"{"query":"weather in Paris"}"#
        );
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["function"]["name"], "web_search");
    }

    #[test]
    fn test_openai_response_with_tool_calls() {
        let resp: OpenAiChatResponse = serde_json::from_value(json!({
            "id": "chatcmpl-456",
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_123",
                        "type": "function",
                        "function": {"name": "read_file", "arguments": "{\"path\": \"/foo.rs\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 50, "completion_tokens": 30}
        }))
        .unwrap();

        let response: CompletionResponse = resp.into();
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id.as_deref(), Some("call_123"));
        assert_eq!(response.tool_calls[0].arguments, json!({"path": "/foo.rs"}));
        assert_eq!(response.usage, Usage::new(50, 30));
    }

    #[test]
    fn test_extract_model_ids_shapes() {
        let openai = json!({"data": [{"id": "gpt-4o"}, {"id": "whisper-1"}, {"id": "GPT-3.5"}]});
        assert_eq!(
            extract_model_ids(&openai, Some("gpt")),
            vec!["gpt-4o", "GPT-3.5"]
        );

        let ollama = json!({"models": [{"name": "llama3:latest"}, {"name": "mistral"}]});
        assert_eq!(
            extract_model_ids(&ollama, None),
            vec!["llama3:latest", "mistral"]
        );

        let bare = json!([{"id": "a"}, "b"]);
        assert_eq!(extract_model_ids(&bare, None), vec!["a", "b"]);

        assert!(extract_model_ids(&json!({"unexpected": true}), None).is_empty());
    }

    #[tokio::test]
    async fn test_complete_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header("x-title", "Loom"))
            .and(body_partial_json(json!({"model": "gpt-4o"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "model": "gpt-4o",
                "choices": [{"message": {"content": "Hello!"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let response = backend
            .complete(CompletionRequest::new("gpt-4o", vec![Message::user("Hi")]))
            .await
            .unwrap();

        assert_eq!(response.content, "Hello!");
        assert_eq!(response.usage.total(), 15);
    }

    #[tokio::test]
    async fn test_error_statuses_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"model": "limited"})))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_json(json!({"error": {"message": "Rate limit reached"}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"model": "locked"})))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"error": {"message": "Invalid API key"}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"model": "down"})))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let call = |model: &str| {
            backend.complete(CompletionRequest::new(model, vec![Message::user("Hi")]))
        };

        let err = call("limited").await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

        let err = call("locked").await.unwrap_err();
        assert!(matches!(err, LlmError::Auth(ref m) if m == "Invalid API key"));

        let err = call("down").await.unwrap_err();
        assert!(matches!(err, LlmError::Server { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_list_models_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "gpt-4o"}, {"id": "dall-e-3"}]
            })))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(
            OpenAiConfig::new("openai", server.uri()).with_model_filter("gpt"),
        )
        .unwrap();
        assert_eq!(backend.list_models().await.unwrap(), vec!["gpt-4o"]);
    }

    #[tokio::test]
    async fn test_timeout_reported_against_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(
            OpenAiConfig::new("slowpoke", server.uri()).with_timeout(Duration::from_millis(50)),
        )
        .unwrap();
        let err = backend
            .complete(CompletionRequest::new("m", vec![Message::user("Hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout { ref provider } if provider == "slowpoke"));
    }
}
