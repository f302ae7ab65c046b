//! The turn loop: user message → provider → tools → provider → answer.
//!
//! One turn makes at most two completion calls. If the first response asks
//! for tools, every call is dispatched concurrently through the
//! [`ToolRouter`], each result is appended to history as it arrives (tagged
//! with its correlation id), and a second completion produces the answer.
//! Tool failures are reported to the model as error results; only provider
//! failures fail the turn.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use loom_llm::{Message, ProviderRegistry, ToolCall, ToolDefinition, Usage};
use loom_mcp::{CallToolResult, McpError, ToolDescriptor};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::approval::{ApproveAll, ToolApprover};
use crate::error::{ChatError, Result};
use crate::router::ToolRouter;
use crate::session::Session;

const DENIED_BY_OPERATOR: &str = "denied by operator";

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    /// The provider's call id, or a generated UUID.
    pub correlation_id: String,
    pub tool: String,
    pub arguments: Value,
}

/// The outcome of one tool call, as fed back to the model.
#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    pub correlation_id: String,
    pub tool: String,
    /// Server that handled the call; `None` if it was never routed.
    pub server: Option<String>,
    pub is_error: bool,
    /// Text sent to the model.
    pub payload: String,
    /// The server's raw result, when the server answered.
    pub raw: Option<CallToolResult>,
}

impl ToolCallOutcome {
    fn failed(request: &ToolCallRequest, server: Option<String>, message: impl Into<String>) -> Self {
        Self {
            correlation_id: request.correlation_id.clone(),
            tool: request.tool.clone(),
            server,
            is_error: true,
            payload: message.into(),
            raw: None,
        }
    }
}

/// What a completed turn returns to the presentation layer.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub text: String,
    /// Tool outcomes in arrival order.
    pub tool_results: Vec<ToolCallOutcome>,
    /// Summed over both completion calls.
    pub usage: Usage,
    pub provider: String,
    pub model: String,
    pub elapsed: Duration,
}

impl TurnResult {
    pub fn used_tools(&self) -> bool {
        !self.tool_results.is_empty()
    }
}

/// Drives turns against shared provider and tool registries.
pub struct ChatOrchestrator {
    providers: Arc<ProviderRegistry>,
    tools: Arc<dyn ToolRouter>,
    approver: Arc<dyn ToolApprover>,
    turn_timeout: Option<Duration>,
}

impl ChatOrchestrator {
    pub fn new(providers: Arc<ProviderRegistry>, tools: Arc<dyn ToolRouter>) -> Self {
        Self {
            providers,
            tools,
            approver: Arc::new(ApproveAll),
            turn_timeout: None,
        }
    }

    pub fn with_approver(mut self, approver: Arc<dyn ToolApprover>) -> Self {
        self.approver = approver;
        self
    }

    /// Default deadline for turns that do not supply their own.
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = Some(timeout);
        self
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// Run one turn with the default deadline.
    pub async fn turn(&self, session: &mut Session, user_message: &str) -> Result<TurnResult> {
        self.turn_with_deadline(session, user_message, self.turn_timeout)
            .await
    }

    /// Run one turn, failing with [`ChatError::Timeout`] after `deadline`.
    ///
    /// On timeout, outstanding tool calls are abandoned: their results are
    /// discarded if they arrive later, and an error result is recorded for
    /// each so the history stays well-formed. The user message is kept on
    /// every failure.
    pub async fn turn_with_deadline(
        &self,
        session: &mut Session,
        user_message: &str,
        deadline: Option<Duration>,
    ) -> Result<TurnResult> {
        let started = Instant::now();
        session.push_user(user_message);

        tracing::info!(
            session_id = %session.id(),
            message_len = user_message.len(),
            history = session.len(),
            "turn started"
        );

        let Some(deadline) = deadline else {
            return self.run(session, started).await;
        };

        let outcome = tokio::time::timeout(deadline, self.run(session, started)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                let abandoned = session.abandon_pending();
                for call in &abandoned {
                    session.push(Message::tool_result(
                        call.correlation_id.clone(),
                        call.tool.clone(),
                        "tool call abandoned: turn deadline exceeded",
                        true,
                    ));
                }
                tracing::warn!(
                    session_id = %session.id(),
                    deadline_ms = deadline.as_millis() as u64,
                    abandoned = abandoned.len(),
                    "turn timed out"
                );
                Err(ChatError::Timeout { after: deadline })
            }
        }
    }

    async fn run(&self, session: &mut Session, started: Instant) -> Result<TurnResult> {
        let (client, active) = self.providers.active_client()?;
        let model = active.model.clone();
        session.set_active(active.clone());

        let catalog = self.tools.tools();
        let definitions: Vec<ToolDefinition> = catalog
            .iter()
            .map(|t| ToolDefinition::new(&t.name, &t.description, t.input_schema.clone()))
            .collect();

        let first = client
            .complete(session.messages().to_vec(), definitions.clone(), &model)
            .await?;
        session.record_usage(first.usage);
        let mut usage = first.usage;

        if !first.has_tool_calls() {
            session.push(Message::assistant(first.content.clone()));
            return Ok(self.finish(session, first.content, Vec::new(), usage, &active, started));
        }

        let requests = correlate(&first.tool_calls);
        let calls = requests
            .iter()
            .map(|r| ToolCall::new(Some(r.correlation_id.clone()), &r.tool, r.arguments.clone()))
            .collect();
        session.push(Message::assistant_tool_calls(first.content.clone(), calls));
        for request in &requests {
            session.begin_call(&request.correlation_id, &request.tool, &request.arguments);
        }

        let tool_names: Vec<&str> = requests.iter().map(|r| r.tool.as_str()).collect();
        tracing::info!(
            session_id = %session.id(),
            tool_count = requests.len(),
            tools = %tool_names.join(", "),
            "executing tools"
        );

        let mut in_flight: FuturesUnordered<_> = requests
            .into_iter()
            .map(|request| self.dispatch(request, &catalog))
            .collect();

        let mut outcomes = Vec::new();
        while let Some(outcome) = in_flight.next().await {
            if session.complete_call(&outcome.correlation_id).is_none() {
                tracing::warn!(
                    correlation_id = %outcome.correlation_id,
                    "discarding result for unknown tool call"
                );
                continue;
            }
            session.push(Message::tool_result(
                outcome.correlation_id.clone(),
                outcome.tool.clone(),
                outcome.payload.clone(),
                outcome.is_error,
            ));
            outcomes.push(outcome);
        }

        let second = client
            .complete(session.messages().to_vec(), definitions, &model)
            .await?;
        session.record_usage(second.usage);
        usage += second.usage;

        if second.has_tool_calls() {
            tracing::warn!(
                session_id = %session.id(),
                requested = second.tool_calls.len(),
                "ignoring tool calls in final response"
            );
        }
        session.push(Message::assistant(second.content.clone()));

        Ok(self.finish(session, second.content, outcomes, usage, &active, started))
    }

    fn finish(
        &self,
        session: &Session,
        text: String,
        tool_results: Vec<ToolCallOutcome>,
        usage: Usage,
        active: &loom_llm::ActiveModel,
        started: Instant,
    ) -> TurnResult {
        let elapsed = started.elapsed();
        tracing::info!(
            session_id = %session.id(),
            provider = %active.provider,
            model = %active.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            tool_calls = tool_results.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "turn completed"
        );
        TurnResult {
            text,
            tool_results,
            usage,
            provider: active.provider.clone(),
            model: active.model.clone(),
            elapsed,
        }
    }

    /// Execute one tool call. Never fails: problems become error outcomes.
    async fn dispatch(&self, request: ToolCallRequest, catalog: &[ToolDescriptor]) -> ToolCallOutcome {
        let Some(descriptor) = catalog.iter().find(|t| t.name == request.tool) else {
            tracing::warn!(tool = %request.tool, "model requested an unknown tool");
            let err = McpError::ToolNotFound(request.tool.clone());
            return ToolCallOutcome::failed(&request, None, format!("Error: {}", err));
        };
        let server = Some(descriptor.server.clone());

        let arguments = match &request.arguments {
            Value::Object(_) => Some(request.arguments.clone()),
            Value::Null => None,
            other => {
                let message = format!(
                    "Error: invalid arguments for '{}': expected a JSON object, got {}",
                    request.tool, other
                );
                return ToolCallOutcome::failed(&request, server, message);
            }
        };

        if !descriptor.auto_approve && !self.approver.approve(&request, descriptor).await {
            tracing::info!(tool = %request.tool, server = %descriptor.server, "tool call denied");
            return ToolCallOutcome::failed(&request, server, DENIED_BY_OPERATOR);
        }

        let started = Instant::now();
        match self.tools.invoke(&request.tool, arguments).await {
            Ok(result) => {
                tracing::debug!(
                    tool = %request.tool,
                    server = %descriptor.server,
                    is_error = result.is_error(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "tool call finished"
                );
                ToolCallOutcome {
                    correlation_id: request.correlation_id,
                    tool: request.tool,
                    server,
                    is_error: result.is_error(),
                    payload: result.render(),
                    raw: Some(result),
                }
            }
            Err(e) => {
                tracing::warn!(tool = %request.tool, server = %descriptor.server, error = %e, "tool call failed");
                ToolCallOutcome::failed(&request, server, format!("Error: {}", e))
            }
        }
    }
}

/// Assign a correlation id to every requested call.
///
/// The provider's id is kept when present and unique within the response.
fn correlate(calls: &[ToolCall]) -> Vec<ToolCallRequest> {
    let mut seen = HashSet::new();
    calls
        .iter()
        .map(|call| {
            let correlation_id = call
                .id
                .clone()
                .filter(|id| !id.is_empty() && !seen.contains(id))
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            seen.insert(correlation_id.clone());
            ToolCallRequest {
                correlation_id,
                tool: call.name.clone(),
                arguments: call.arguments.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loom_llm::{
        CompletionResponse, LlmError, MockBackend, ProviderClient, ProviderSettings, Role,
    };
    use loom_resilience::{BreakerConfig, RetryPolicy};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    // ── Test doubles ────────────────────────────────────────────────────────

    #[derive(Default)]
    struct ScriptedRouter {
        tools: Vec<ToolDescriptor>,
        replies: HashMap<String, (Duration, loom_mcp::Result<CallToolResult>)>,
        calls: Mutex<Vec<(String, Option<Value>)>>,
    }

    impl ScriptedRouter {
        fn tool(mut self, server: &str, name: &str, auto_approve: bool) -> Self {
            self.tools.push(ToolDescriptor {
                name: name.into(),
                description: format!("{} tool", name),
                input_schema: json!({"type": "object"}),
                server: server.into(),
                auto_approve,
            });
            self
        }

        fn reply(mut self, tool: &str, delay: Duration, text: &str) -> Self {
            self.replies.insert(
                tool.into(),
                (delay, Ok(CallToolResult::text_result(text, false))),
            );
            self
        }

        fn fail(mut self, tool: &str, error: McpError) -> Self {
            self.replies.insert(tool.into(), (Duration::ZERO, Err(error)));
            self
        }

        fn calls(&self) -> Vec<(String, Option<Value>)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ToolRouter for ScriptedRouter {
        fn tools(&self) -> Vec<ToolDescriptor> {
            self.tools.clone()
        }

        async fn invoke(
            &self,
            tool: &str,
            arguments: Option<Value>,
        ) -> loom_mcp::Result<CallToolResult> {
            self.calls.lock().push((tool.to_string(), arguments));
            let Some((delay, reply)) = self.replies.get(tool) else {
                return Err(McpError::ToolNotFound(tool.to_string()));
            };
            tokio::time::sleep(*delay).await;
            match reply {
                Ok(result) => Ok(result.clone()),
                Err(e) => Err(McpError::protocol(e.to_string())),
            }
        }
    }

    struct DenyAll;

    #[async_trait]
    impl ToolApprover for DenyAll {
        async fn approve(&self, _request: &ToolCallRequest, _tool: &ToolDescriptor) -> bool {
            false
        }
    }

    fn text(content: &str, input: u64, output: u64) -> CompletionResponse {
        CompletionResponse::text("r", "mock-model", content, Usage::new(input, output))
    }

    fn setup(
        backend: MockBackend,
        router: ScriptedRouter,
    ) -> (ChatOrchestrator, Arc<MockBackend>, Arc<ScriptedRouter>) {
        setup_with(backend, router, ProviderSettings::default())
    }

    fn setup_with(
        backend: MockBackend,
        router: ScriptedRouter,
        settings: ProviderSettings,
    ) -> (ChatOrchestrator, Arc<MockBackend>, Arc<ScriptedRouter>) {
        let backend = Arc::new(backend);
        let client = ProviderClient::new(
            "mock",
            backend.clone(),
            true,
            vec!["mock-model".into()],
            &settings,
        );
        let providers =
            Arc::new(ProviderRegistry::new(vec![client], "mock", Some("mock-model")).unwrap());
        let router = Arc::new(router);
        let orchestrator = ChatOrchestrator::new(providers, router.clone());
        (orchestrator, backend, router)
    }

    // ── Tests ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_plain_answer() {
        let (orchestrator, backend, router) =
            setup(MockBackend::new(vec![text("Hello!", 4, 2)]), ScriptedRouter::default());
        let mut session = Session::default();

        let result = orchestrator.turn(&mut session, "hi").await.unwrap();
        assert_eq!(result.text, "Hello!");
        assert!(!result.used_tools());
        assert_eq!(result.usage, Usage::new(4, 2));
        assert_eq!(result.provider, "mock");
        assert_eq!(backend.request_count(), 1);
        assert!(router.calls().is_empty());

        let roles: Vec<_> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_weather_scenario() {
        let backend = MockBackend::new(vec![
            MockBackend::tool_call_response(
                "call_1",
                "web_search",
                json!({"query": "weather in Paris"}),
            ),
            text("It is sunny in Paris, 22°C.", 40, 12),
        ]);
        let router = ScriptedRouter::default()
            .tool("search", "web_search", true)
            .reply("web_search", Duration::ZERO, "Paris: sunny, 22C");
        let (orchestrator, backend, router) = setup(backend, router);
        let mut session = Session::default();

        let result = orchestrator
            .turn(&mut session, "What's the weather in Paris?")
            .await
            .unwrap();

        assert_eq!(result.text, "It is sunny in Paris, 22°C.");
        assert_eq!(result.tool_results.len(), 1);
        let outcome = &result.tool_results[0];
        assert_eq!(outcome.correlation_id, "call_1");
        assert_eq!(outcome.server.as_deref(), Some("search"));
        assert!(!outcome.is_error);
        assert_eq!(
            outcome.raw.as_ref().and_then(|r| r.text()).as_deref(),
            Some("Paris: sunny, 22C")
        );

        assert_eq!(result.usage, Usage::new(55, 17));
        assert_eq!(session.usage().total, 72);

        assert_eq!(
            router.calls(),
            vec![("web_search".to_string(), Some(json!({"query": "weather in Paris"})))]
        );

        // The second completion saw the tool result under the call's id.
        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 1);
        let tool_msg = requests[1]
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_msg.content, "Paris: sunny, 22C");
        assert_eq!(session.pending_calls().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_appended_in_arrival_order() {
        let first = CompletionResponse::text("r", "m", "", Usage::new(1, 1)).with_tool_calls(vec![
            ToolCall::new(Some("slow".into()), "slow_tool", json!({})),
            ToolCall::new(Some("fast".into()), "fast_tool", json!({})),
        ]);
        let backend = MockBackend::new(vec![first, text("done", 1, 1)]);
        let router = ScriptedRouter::default()
            .tool("a", "slow_tool", true)
            .tool("b", "fast_tool", true)
            .reply("slow_tool", Duration::from_millis(500), "slow result")
            .reply("fast_tool", Duration::from_millis(10), "fast result");
        let (orchestrator, _backend, _router) = setup(backend, router);
        let mut session = Session::default();

        let result = orchestrator.turn(&mut session, "go").await.unwrap();
        let order: Vec<_> = result
            .tool_results
            .iter()
            .map(|o| o.correlation_id.as_str())
            .collect();
        assert_eq!(order, vec!["fast", "slow"]);

        let tool_ids: Vec<_> = session
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(tool_ids, vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn test_missing_call_ids_are_generated() {
        let first = CompletionResponse::text("r", "m", "", Usage::new(1, 1)).with_tool_calls(vec![
            ToolCall::new(None, "web_search", json!({"query": "a"})),
            ToolCall::new(None, "web_search", json!({"query": "b"})),
        ]);
        let backend = MockBackend::new(vec![first, text("ok", 1, 1)]);
        let router = ScriptedRouter::default()
            .tool("search", "web_search", true)
            .reply("web_search", Duration::ZERO, "result");
        let (orchestrator, _backend, _router) = setup(backend, router);
        let mut session = Session::default();

        let result = orchestrator.turn(&mut session, "go").await.unwrap();
        let ids: HashSet<_> = result
            .tool_results
            .iter()
            .map(|o| o.correlation_id.clone())
            .collect();
        assert_eq!(ids.len(), 2);
        for id in &ids {
            assert!(Uuid::parse_str(id).is_ok());
        }

        let assistant = session
            .messages()
            .iter()
            .find(|m| !m.tool_calls.is_empty())
            .unwrap();
        let requested: HashSet<_> = assistant
            .tool_calls
            .iter()
            .filter_map(|c| c.id.clone())
            .collect();
        assert_eq!(requested, ids);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_closed() {
        let backend = MockBackend::new(vec![
            MockBackend::tool_call_response("c1", "launch_rockets", json!({})),
            text("I could not do that.", 1, 1),
        ]);
        let router = ScriptedRouter::default().tool("search", "web_search", true);
        let (orchestrator, backend, router) = setup(backend, router);
        let mut session = Session::default();

        let result = orchestrator.turn(&mut session, "launch").await.unwrap();
        let outcome = &result.tool_results[0];
        assert!(outcome.is_error);
        assert!(outcome.payload.contains("tool not found: launch_rockets"));
        assert!(outcome.server.is_none());
        assert!(router.calls().is_empty());
        assert_eq!(backend.request_count(), 2);
    }

    #[tokio::test]
    async fn test_tool_error_reported_to_model() {
        let backend = MockBackend::new(vec![
            MockBackend::tool_call_response("c1", "web_search", json!({"query": "x"})),
            text("Search is down.", 1, 1),
        ]);
        let router = ScriptedRouter::default()
            .tool("search", "web_search", true)
            .fail("web_search", McpError::ConnectionClosed);
        let (orchestrator, backend, _router) = setup(backend, router);
        let mut session = Session::default();

        let result = orchestrator.turn(&mut session, "search").await.unwrap();
        assert_eq!(result.text, "Search is down.");
        assert!(result.tool_results[0].is_error);

        let tool_msg = &backend.requests()[1].messages[2];
        assert_eq!(tool_msg.role, Role::Tool);
        assert!(tool_msg.is_error);
        assert!(tool_msg.content.starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_denied_unless_auto_approved() {
        let first = CompletionResponse::text("r", "m", "", Usage::new(1, 1)).with_tool_calls(vec![
            ToolCall::new(Some("c1".into()), "delete_file", json!({"path": "/tmp/x"})),
            ToolCall::new(Some("c2".into()), "read_file", json!({"path": "/tmp/x"})),
        ]);
        let backend = MockBackend::new(vec![first, text("ok", 1, 1)]);
        let router = ScriptedRouter::default()
            .tool("fs", "delete_file", false)
            .tool("fs", "read_file", true)
            .reply("delete_file", Duration::ZERO, "deleted")
            .reply("read_file", Duration::ZERO, "contents");
        let (orchestrator, _backend, router) = setup(backend, router);
        let orchestrator = orchestrator.with_approver(Arc::new(DenyAll));
        let mut session = Session::default();

        let result = orchestrator.turn(&mut session, "clean up").await.unwrap();
        let denied = result
            .tool_results
            .iter()
            .find(|o| o.correlation_id == "c1")
            .unwrap();
        assert!(denied.is_error);
        assert_eq!(denied.payload, DENIED_BY_OPERATOR);

        let calls: Vec<_> = router.calls().into_iter().map(|(t, _)| t).collect();
        assert_eq!(calls, vec!["read_file"]);
    }

    #[tokio::test]
    async fn test_non_object_arguments_rejected() {
        let backend = MockBackend::new(vec![
            MockBackend::tool_call_response("c1", "web_search", json!("{not json")),
            text("sorry", 1, 1),
        ]);
        let router = ScriptedRouter::default()
            .tool("search", "web_search", true)
            .reply("web_search", Duration::ZERO, "result");
        let (orchestrator, _backend, router) = setup(backend, router);
        let mut session = Session::default();

        let result = orchestrator.turn(&mut session, "go").await.unwrap();
        assert!(result.tool_results[0].is_error);
        assert!(result.tool_results[0].payload.contains("expected a JSON object"));
        assert!(router.calls().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_user_message() {
        let (orchestrator, _backend, _router) =
            setup(MockBackend::new(vec![]), ScriptedRouter::default());
        let mut session = Session::default();

        let err = orchestrator.turn(&mut session, "hello?").await.unwrap_err();
        assert!(matches!(err, ChatError::Llm(LlmError::Backend(_))));
        assert_eq!(session.len(), 1);
        assert_eq!(session.messages()[0].content, "hello?");
        assert_eq!(session.usage().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_abandons_tool_calls() {
        let backend = MockBackend::new(vec![
            MockBackend::tool_call_response("c1", "slow_tool", json!({})),
            text("never reached", 1, 1),
        ]);
        let router = ScriptedRouter::default()
            .tool("s", "slow_tool", true)
            .reply("slow_tool", Duration::from_secs(30), "late");
        let (orchestrator, backend, _router) = setup(backend, router);
        let mut session = Session::default();

        let err = orchestrator
            .turn_with_deadline(&mut session, "go", Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Timeout { after } if after == Duration::from_secs(1)));
        assert_eq!(backend.request_count(), 1);
        assert_eq!(session.pending_calls().count(), 0);

        // user, assistant tool call, abandoned result
        let last = session.messages().last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some("c1"));
        assert!(last.is_error);
        assert_eq!(session.usage().input, 15);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let settings = ProviderSettings {
            retry: RetryPolicy::none(),
            breaker: BreakerConfig::new(1, Duration::from_secs(60)),
            ..ProviderSettings::default()
        };
        let backend = MockBackend::new(vec![]);
        backend.push_error(LlmError::Network("connection refused".into()));
        let (orchestrator, backend, _router) =
            setup_with(backend, ScriptedRouter::default(), settings);
        let mut session = Session::default();

        let err = orchestrator.turn(&mut session, "one").await.unwrap_err();
        assert!(!err.is_circuit_open());

        let err = orchestrator.turn(&mut session, "two").await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(backend.request_count(), 1);
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn test_duplicate_provider_ids_are_replaced() {
        let calls = vec![
            ToolCall::new(Some("x".into()), "a", json!({})),
            ToolCall::new(Some("x".into()), "b", json!({})),
            ToolCall::new(Some(String::new()), "c", json!({})),
        ];
        let requests = correlate(&calls);
        assert_eq!(requests[0].correlation_id, "x");
        assert_ne!(requests[1].correlation_id, "x");
        assert!(!requests[2].correlation_id.is_empty());
    }
}
