//! The session command surface.
//!
//! [`ChatService`] is the only thing a presentation layer talks to. It owns
//! one [`Session`], shares the provider and server registries with the
//! orchestrator, and serializes turns: a second message waits for the turn
//! in flight instead of interleaving with it.

use std::sync::Arc;
use std::time::Duration;

use loom_llm::{ActiveModel, ProviderHealth, ProviderListing, ProviderRegistry};
use loom_mcp::{
    GetPromptResult, PromptDescriptor, ReadResourceResult, ResourceDescriptor, ServerHealth,
    ServerRegistry, ToolDescriptor,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::approval::ToolApprover;
use crate::error::{ChatError, Result};
use crate::orchestrator::{ChatOrchestrator, TurnResult};
use crate::session::{Session, SessionId, TokenUsage};

/// Floor for background task periods; a zero setting would spin.
const MIN_BACKGROUND_INTERVAL: Duration = Duration::from_secs(1);

/// Everything `/status` shows.
#[derive(Debug, Clone)]
pub struct ChatStatus {
    pub session_id: SessionId,
    pub active: ActiveModel,
    pub usage: TokenUsage,
    pub history_len: usize,
    pub turns: u64,
    pub servers: Vec<ServerHealth>,
    pub providers: Vec<ProviderHealth>,
}

/// Session counters mirrored outside the session lock so status never
/// waits for a turn.
#[derive(Debug, Clone, Copy, Default)]
struct SessionStats {
    usage: TokenUsage,
    history_len: usize,
    turns: u64,
}

impl SessionStats {
    fn of(session: &Session) -> Self {
        Self {
            usage: session.usage(),
            history_len: session.len(),
            turns: session.turns(),
        }
    }
}

/// Command surface over one chat session.
pub struct ChatService {
    orchestrator: ChatOrchestrator,
    providers: Arc<ProviderRegistry>,
    servers: Arc<ServerRegistry>,
    session_id: SessionId,
    session: tokio::sync::Mutex<Session>,
    stats: Mutex<SessionStats>,
    background: CancellationToken,
}

impl ChatService {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        servers: Arc<ServerRegistry>,
        session: Session,
    ) -> Self {
        let orchestrator = ChatOrchestrator::new(providers.clone(), servers.clone());
        Self {
            orchestrator,
            providers,
            servers,
            session_id: session.id(),
            stats: Mutex::new(SessionStats::of(&session)),
            session: tokio::sync::Mutex::new(session),
            background: CancellationToken::new(),
        }
    }

    pub fn with_approver(mut self, approver: Arc<dyn ToolApprover>) -> Self {
        self.orchestrator = self.orchestrator.with_approver(approver);
        self
    }

    /// Deadline applied to every [`send_message`](Self::send_message).
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.orchestrator = self.orchestrator.with_turn_timeout(timeout);
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    // ── Providers ───────────────────────────────────────────────────────────

    pub fn list_providers(&self) -> Vec<ProviderListing> {
        self.providers.list()
    }

    pub fn active_model(&self) -> ActiveModel {
        self.providers.active()
    }

    /// Switch the active provider and model. A rejected switch changes nothing.
    ///
    /// Takes effect from the next turn; history and token counts carry over.
    pub async fn switch_provider(&self, provider: &str, model: Option<&str>) -> Result<ActiveModel> {
        Ok(self.providers.switch(provider, model).await?)
    }

    /// Re-fetch every credentialed provider's model list.
    pub async fn refresh_models(&self) -> Vec<(String, loom_llm::Result<usize>)> {
        self.providers.refresh_models().await
    }

    /// Refresh model lists every `interval` until [`shutdown`](Self::shutdown).
    pub fn spawn_model_refresh(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let token = self.background.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_BACKGROUND_INTERVAL));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; startup already fetched.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        for (provider, result) in service.refresh_models().await {
                            match result {
                                Ok(count) => tracing::debug!(provider = %provider, count, "model list refreshed"),
                                Err(e) => tracing::warn!(provider = %provider, error = %e, "model refresh failed"),
                            }
                        }
                    }
                }
            }
            tracing::debug!("model refresh task stopped");
        })
    }

    /// Probe every credentialed provider once.
    pub async fn check_providers(&self) -> Vec<(String, loom_llm::Result<Duration>)> {
        self.providers.check_health().await
    }

    /// Probe provider health every `interval` until [`shutdown`](Self::shutdown).
    pub fn spawn_provider_health(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let token = self.background.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_BACKGROUND_INTERVAL));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let results = service.check_providers().await;
                        let healthy = results.iter().filter(|(_, r)| r.is_ok()).count();
                        tracing::debug!(healthy, checked = results.len(), "provider health checked");
                    }
                }
            }
            tracing::debug!("provider health task stopped");
        })
    }

    // ── Tool servers ────────────────────────────────────────────────────────

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.servers.tools()
    }

    pub fn list_resources(&self) -> Vec<ResourceDescriptor> {
        self.servers.resources()
    }

    pub fn list_prompts(&self) -> Vec<PromptDescriptor> {
        self.servers.prompts()
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        Ok(self.servers.read_resource(uri).await?)
    }

    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<GetPromptResult> {
        Ok(self.servers.get_prompt(name, arguments).await?)
    }

    /// Restart one tool server.
    pub async fn reconnect_server(&self, name: &str) -> Result<()> {
        Ok(self.servers.reconnect(name).await?)
    }

    /// Re-run discovery on every live server.
    pub async fn refresh_servers(&self) -> Vec<(String, loom_mcp::Result<usize>)> {
        self.servers.refresh_all().await
    }

    // ── Turns ───────────────────────────────────────────────────────────────

    /// Run one turn with the configured deadline.
    pub async fn send_message(&self, text: &str) -> Result<TurnResult> {
        self.send(text, None).await
    }

    /// Run one turn with an explicit deadline.
    pub async fn send_message_with_deadline(&self, text: &str, deadline: Duration) -> Result<TurnResult> {
        self.send(text, Some(deadline)).await
    }

    async fn send(&self, text: &str, deadline: Option<Duration>) -> Result<TurnResult> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::invalid_input("message is empty"));
        }

        let mut session = self.session.lock().await;
        let result = match deadline {
            Some(d) => {
                self.orchestrator
                    .turn_with_deadline(&mut session, text, Some(d))
                    .await
            }
            None => self.orchestrator.turn(&mut session, text).await,
        };
        *self.stats.lock() = SessionStats::of(&session);

        if let Err(e) = &result {
            tracing::warn!(session_id = %self.session_id, error = %e, "turn failed");
        }
        result
    }

    // ── Status ──────────────────────────────────────────────────────────────

    pub fn get_status(&self) -> ChatStatus {
        let stats = *self.stats.lock();
        ChatStatus {
            session_id: self.session_id,
            active: self.providers.active(),
            usage: stats.usage,
            history_len: stats.history_len,
            turns: stats.turns,
            servers: self.servers.snapshot_health(),
            providers: self.providers.health(),
        }
    }

    /// Stop background tasks and every tool server.
    pub async fn shutdown(&self) {
        self.background.cancel();
        self.servers.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_llm::{
        CompletionResponse, LlmError, MockBackend, ProviderClient, ProviderSettings, Role, Usage,
    };
    use loom_mcp::{ConnectionConfig, McpError};

    fn client(name: &str, backend: MockBackend, models: &[&str]) -> ProviderClient {
        ProviderClient::new(
            name,
            Arc::new(backend.with_name(name).with_models(models.to_vec())),
            true,
            models.iter().map(|m| m.to_string()).collect(),
            &ProviderSettings::default(),
        )
    }

    fn service(providers: Vec<ProviderClient>, default: &str) -> ChatService {
        let providers = Arc::new(ProviderRegistry::new(providers, default, None).unwrap());
        let servers = Arc::new(ServerRegistry::new(vec![], ConnectionConfig::default()));
        ChatService::new(providers, servers, Session::default())
    }

    fn reply(text: &str) -> CompletionResponse {
        CompletionResponse::text("r", "m", text, Usage::new(10, 5))
    }

    #[tokio::test]
    async fn test_send_message_updates_status() {
        let svc = service(
            vec![client("groq", MockBackend::new(vec![reply("hi there")]), &["llama"])],
            "groq",
        );

        let result = svc.send_message("hello").await.unwrap();
        assert_eq!(result.text, "hi there");

        let status = svc.get_status();
        assert_eq!(status.session_id, svc.session_id());
        assert_eq!(status.active.to_string(), "groq/llama");
        assert_eq!(status.usage.total, 15);
        assert_eq!(status.history_len, 2);
        assert_eq!(status.turns, 1);
        assert!(status.servers.is_empty());
        assert_eq!(status.providers.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let svc = service(vec![client("groq", MockBackend::new(vec![]), &["llama"])], "groq");
        let err = svc.send_message("   ").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
        assert_eq!(svc.get_status().history_len, 0);
    }

    #[tokio::test]
    async fn test_switch_preserves_history_and_usage() {
        let svc = service(
            vec![
                client("groq", MockBackend::new(vec![reply("from groq")]), &["llama"]),
                client("openai", MockBackend::new(vec![reply("from openai")]), &["gpt-4o", "gpt-4o-mini"]),
            ],
            "groq",
        );

        svc.send_message("first").await.unwrap();

        let err = svc.switch_provider("openai", Some("gpt-9")).await.unwrap_err();
        assert!(matches!(err, ChatError::Llm(LlmError::UnknownModel { .. })));
        assert_eq!(svc.active_model().to_string(), "groq/llama");

        let active = svc.switch_provider("openai", Some("gpt-4o-mini")).await.unwrap();
        assert_eq!(active.to_string(), "openai/gpt-4o-mini");

        let result = svc.send_message("second").await.unwrap();
        assert_eq!(result.text, "from openai");
        assert_eq!(result.provider, "openai");

        let status = svc.get_status();
        assert_eq!(status.history_len, 4);
        assert_eq!(status.usage.total, 30);

        let listing = svc.list_providers();
        assert!(listing.iter().any(|p| p.name == "openai" && p.active));
    }

    #[tokio::test]
    async fn test_turns_are_serialized() {
        let svc = Arc::new(service(
            vec![client(
                "groq",
                MockBackend::new(vec![reply("one"), reply("two")]),
                &["llama"],
            )],
            "groq",
        ));

        let a = tokio::spawn({
            let svc = svc.clone();
            async move { svc.send_message("a").await }
        });
        let b = tokio::spawn({
            let svc = svc.clone();
            async move { svc.send_message("b").await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // Each turn saw a complete user/assistant pair before the next began.
        let session = svc.session.lock().await;
        let roles: Vec<_> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_unknown_resource_and_server() {
        let svc = service(vec![client("groq", MockBackend::new(vec![]), &["llama"])], "groq");
        assert!(svc.list_tools().is_empty());
        assert!(svc.list_resources().is_empty());
        assert!(svc.list_prompts().is_empty());

        let err = svc.read_resource("file:///nope").await.unwrap_err();
        assert!(matches!(err, ChatError::Mcp(McpError::ResourceNotFound(_))));

        let err = svc.reconnect_server("ghost").await.unwrap_err();
        assert!(matches!(err, ChatError::Mcp(McpError::UnknownServer(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_refresh_task_stops_on_shutdown() {
        let svc = Arc::new(service(
            vec![client("groq", MockBackend::new(vec![]), &["llama"])],
            "groq",
        ));
        let handle = svc.spawn_model_refresh(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(130)).await;
        svc.shutdown().await;
        handle.await.unwrap();

        let models = &svc.list_providers()[0].models;
        assert_eq!(models, &vec!["llama".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_health_task_marks_recovery() {
        let backend = Arc::new(MockBackend::new(vec![]).with_name("groq").with_models(vec!["llama"]));
        let settings = ProviderSettings {
            retry: loom_resilience::RetryPolicy::none(),
            ..ProviderSettings::default()
        };
        let client = ProviderClient::new("groq", backend.clone(), true, vec!["llama".into()], &settings);
        let svc = Arc::new(service(vec![client], "groq"));

        // The script is empty, so the turn fails and the provider is marked down.
        backend.set_failing_models();
        assert!(svc.send_message("hello").await.is_err());
        assert!(!svc.get_status().providers[0].healthy);

        let handle = svc.spawn_provider_health(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!svc.get_status().providers[0].healthy);

        backend.set_models(vec!["llama"]);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(svc.get_status().providers[0].healthy);
        assert!(backend.model_fetch_count() >= 2);

        svc.shutdown().await;
        handle.await.unwrap();
    }
}
