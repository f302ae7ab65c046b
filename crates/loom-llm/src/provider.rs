//! One LLM vendor integration with resilience and model caching.
//!
//! A [`ProviderClient`] wraps a [`LlmBackend`](crate::LlmBackend) with its own
//! [`CircuitBreaker`] and [`RetryPolicy`], caches the vendor's model list for
//! a TTL, and tracks a health flag plus the latency of the last successful
//! call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use loom_resilience::{BreakerConfig, BreakerState, CircuitBreaker, RetryPolicy, execute};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::backend::SharedBackend;
use crate::catalog::ProviderPreset;
use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse, Message, ToolDefinition};

/// Default lifetime of a fetched model list.
pub const DEFAULT_MODEL_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Default HTTP timeout for provider calls.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Default TCP connect timeout for provider calls.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables shared by every provider client.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub model_cache_ttl: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROVIDER_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            model_cache_ttl: DEFAULT_MODEL_CACHE_TTL,
        }
    }
}

#[derive(Debug, Default)]
struct ModelCache {
    models: Vec<String>,
    fetched_at: Option<Instant>,
    using_defaults: bool,
}

/// Point-in-time view of a provider, for status reporting.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub name: String,
    pub has_credentials: bool,
    pub healthy: bool,
    pub last_latency_ms: Option<u64>,
    pub model_count: usize,
    pub using_default_models: bool,
    pub breaker: BreakerState,
}

/// A single LLM provider.
pub struct ProviderClient {
    name: String,
    backend: SharedBackend,
    has_credentials: bool,
    default_models: Vec<String>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    ttl: Duration,
    models: Mutex<ModelCache>,
    refresh_lock: tokio::sync::Mutex<()>,
    healthy: AtomicBool,
    last_latency: Mutex<Option<Duration>>,
}

impl ProviderClient {
    pub fn new(
        name: impl Into<String>,
        backend: SharedBackend,
        has_credentials: bool,
        default_models: Vec<String>,
        settings: &ProviderSettings,
    ) -> Self {
        let name = name.into();
        Self {
            breaker: CircuitBreaker::new(format!("provider:{}", name), settings.breaker),
            name,
            backend,
            has_credentials,
            default_models,
            retry: settings.retry,
            ttl: settings.model_cache_ttl,
            models: Mutex::new(ModelCache::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
            healthy: AtomicBool::new(true),
            last_latency: Mutex::new(None),
        }
    }

    /// Build a client from a built-in preset.
    ///
    /// A preset that needs a key but gets none is still constructed; it is
    /// listed but every call fails with [`LlmError::MissingCredentials`].
    pub fn from_preset(
        preset: &ProviderPreset,
        api_key: Option<String>,
        base_url: Option<&str>,
        settings: &ProviderSettings,
    ) -> Result<Self> {
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        let has_credentials = !preset.requires_credentials() || api_key.is_some();
        let backend = preset.build_backend(api_key, base_url, settings)?;
        Ok(Self::new(
            preset.name,
            backend,
            has_credentials,
            preset.default_models(),
            settings,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_credentials(&self) -> bool {
        self.has_credentials
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn last_latency(&self) -> Option<Duration> {
        *self.last_latency.lock()
    }

    fn ensure_credentials(&self) -> Result<()> {
        if self.has_credentials {
            Ok(())
        } else {
            Err(LlmError::MissingCredentials(self.name.clone()))
        }
    }

    // ── Completion ──────────────────────────────────────────────────────────

    /// Run one chat completion through the breaker and retry policy.
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: &str,
    ) -> Result<CompletionResponse> {
        self.ensure_credentials()?;

        let request = CompletionRequest::new(model, messages).with_tools(tools);
        let started = Instant::now();

        let result = execute(&self.breaker, &self.retry, |_| {
            self.backend.complete(request.clone())
        })
        .await
        .map_err(LlmError::from);

        match &result {
            Ok(response) => {
                let elapsed = started.elapsed();
                self.healthy.store(true, Ordering::Relaxed);
                *self.last_latency.lock() = Some(elapsed);
                tracing::debug!(
                    provider = %self.name,
                    model,
                    latency_ms = elapsed.as_millis() as u64,
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    tool_calls = response.tool_calls.len(),
                    "completion finished"
                );
            }
            Err(e) => {
                self.healthy.store(false, Ordering::Relaxed);
                tracing::warn!(provider = %self.name, model, error = %e, "completion failed");
            }
        }
        result
    }

    // ── Models ──────────────────────────────────────────────────────────────

    /// The model list, from cache while it is fresh.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        {
            let cache = self.models.lock();
            let fresh = cache
                .fetched_at
                .is_some_and(|at| at.elapsed() < self.ttl);
            if fresh && !cache.using_defaults {
                return Ok(cache.models.clone());
            }
        }
        self.refresh_models().await
    }

    /// Fetch the model list from the provider, bypassing the cache.
    ///
    /// On failure the previous list is kept; a provider that never fetched
    /// one falls back to its defaults.
    pub async fn refresh_models(&self) -> Result<Vec<String>> {
        self.ensure_credentials()?;
        let _guard = self.refresh_lock.lock().await;

        let fetched = execute(&self.breaker, &self.retry, |_| self.backend.list_models())
            .await
            .map_err(LlmError::from)
            .and_then(|models| {
                if models.is_empty() {
                    Err(LlmError::Backend("provider returned no models".into()))
                } else {
                    Ok(models)
                }
            });

        let mut cache = self.models.lock();
        match fetched {
            Ok(models) => {
                tracing::info!(provider = %self.name, count = models.len(), "loaded models");
                cache.models = models.clone();
                cache.fetched_at = Some(Instant::now());
                cache.using_defaults = false;
                self.healthy.store(true, Ordering::Relaxed);
                Ok(models)
            }
            Err(e) => {
                tracing::warn!(provider = %self.name, error = %e, "could not fetch models");
                if cache.models.is_empty() {
                    cache.models = self.default_models.clone();
                    cache.using_defaults = true;
                }
                self.healthy.store(false, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Probe the provider with a model-list request and update its health.
    ///
    /// The probe is a single attempt outside the breaker, so a provider whose
    /// circuit is open can still be seen to recover. The model cache is left
    /// alone.
    pub async fn check_health(&self) -> Result<Duration> {
        self.ensure_credentials()?;

        let started = Instant::now();
        let probe = self.backend.list_models().await.and_then(|models| {
            if models.is_empty() {
                Err(LlmError::Backend("provider returned no models".into()))
            } else {
                Ok(models)
            }
        });

        match probe {
            Ok(_) => {
                let elapsed = started.elapsed();
                *self.last_latency.lock() = Some(elapsed);
                if !self.healthy.swap(true, Ordering::Relaxed) {
                    tracing::info!(provider = %self.name, "provider recovered");
                }
                Ok(elapsed)
            }
            Err(e) => {
                if self.healthy.swap(false, Ordering::Relaxed) {
                    tracing::warn!(provider = %self.name, error = %e, "health check failed");
                } else {
                    tracing::debug!(provider = %self.name, error = %e, "provider still unhealthy");
                }
                Err(e)
            }
        }
    }

    /// Last known model list, or the defaults if none was ever fetched.
    pub fn cached_models(&self) -> Vec<String> {
        let cache = self.models.lock();
        if cache.models.is_empty() {
            self.default_models.clone()
        } else {
            cache.models.clone()
        }
    }

    /// Models to validate a switch against: fresh if possible, else cached.
    pub async fn known_models(&self) -> Vec<String> {
        match self.list_models().await {
            Ok(models) => models,
            Err(_) => self.cached_models(),
        }
    }

    pub fn health(&self) -> ProviderHealth {
        let cache = self.models.lock();
        ProviderHealth {
            name: self.name.clone(),
            has_credentials: self.has_credentials,
            healthy: self.is_healthy(),
            last_latency_ms: self.last_latency().map(|d| d.as_millis() as u64),
            model_count: if cache.models.is_empty() {
                self.default_models.len()
            } else {
                cache.models.len()
            },
            using_default_models: cache.using_defaults || cache.models.is_empty(),
            breaker: self.breaker.state(),
        }
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("name", &self.name)
            .field("has_credentials", &self.has_credentials)
            .field("breaker", &self.breaker.state())
            .finish()
    }
}

/// A shared provider client.
pub type SharedProvider = Arc<ProviderClient>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::types::{CompletionResponse, Usage};

    fn settings() -> ProviderSettings {
        ProviderSettings {
            retry: RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(40), 2),
            breaker: BreakerConfig::new(2, Duration::from_secs(30)),
            model_cache_ttl: Duration::from_secs(60),
            ..ProviderSettings::default()
        }
    }

    fn client(backend: MockBackend) -> (ProviderClient, Arc<MockBackend>) {
        let backend = Arc::new(backend);
        let client = ProviderClient::new(
            "mock",
            backend.clone(),
            true,
            vec!["fallback-model".into()],
            &settings(),
        );
        (client, backend)
    }

    fn ok(text: &str) -> CompletionResponse {
        CompletionResponse::text("r", "m", text, Usage::new(1, 1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_retries_transient_errors() {
        let (client, backend) = client(MockBackend::new(vec![]));
        backend.push_error(LlmError::rate_limit("slow down"));
        backend.push_error(LlmError::Network("reset".into()));
        backend.push_response(ok("done"));

        let response = client
            .complete(vec![Message::user("hi")], vec![], "m")
            .await
            .unwrap();
        assert_eq!(response.content, "done");
        assert_eq!(backend.request_count(), 3);
        assert!(client.is_healthy());
        assert!(client.last_latency().is_some());
        assert_eq!(client.breaker().state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_fails_fast() {
        let (client, backend) = client(MockBackend::new(vec![]));
        for _ in 0..6 {
            backend.push_error(LlmError::Network("down".into()));
        }

        // Two exhausted calls (3 attempts each) trip a threshold of 2.
        for _ in 0..2 {
            let err = client
                .complete(vec![Message::user("hi")], vec![], "m")
                .await
                .unwrap_err();
            assert!(matches!(err, LlmError::Network(_)));
        }
        assert_eq!(client.breaker().state(), BreakerState::Open);
        assert!(!client.is_healthy());

        let before = backend.request_count();
        let err = client
            .complete(vec![Message::user("hi")], vec![], "m")
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(backend.request_count(), before);
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        let (client, backend) = client(MockBackend::new(vec![]));
        backend.push_error(LlmError::Auth("bad key".into()));

        let err = client
            .complete(vec![Message::user("hi")], vec![], "m")
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
        assert_eq!(backend.request_count(), 1);
        assert_eq!(client.breaker().snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let backend: SharedBackend = Arc::new(MockBackend::with_text("x"));
        let client = ProviderClient::new("groq", backend, false, vec![], &settings());
        let err = client
            .complete(vec![Message::user("hi")], vec![], "m")
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::MissingCredentials(p) if p == "groq"));
        assert!(client.refresh_models().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_cache_ttl() {
        let (client, backend) = client(MockBackend::with_text("x").with_models(vec!["a", "b"]));

        assert_eq!(client.list_models().await.unwrap(), vec!["a", "b"]);
        assert_eq!(client.list_models().await.unwrap(), vec!["a", "b"]);
        assert_eq!(backend.model_fetch_count(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        client.list_models().await.unwrap();
        assert_eq!(backend.model_fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_falls_back_to_defaults() {
        let (client, _backend) = client(MockBackend::with_text("x").with_failing_models());

        assert!(client.refresh_models().await.is_err());
        assert_eq!(client.cached_models(), vec!["fallback-model"]);
        assert_eq!(client.known_models().await, vec!["fallback-model"]);

        let health = client.health();
        assert!(health.using_default_models);
        assert_eq!(health.model_count, 1);
        assert!(!health.healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_marks_recovery() {
        let (client, backend) = client(MockBackend::new(vec![]));
        for _ in 0..3 {
            backend.push_error(LlmError::Network("down".into()));
        }
        assert!(client.complete(vec![Message::user("hi")], vec![], "m").await.is_err());
        assert!(!client.is_healthy());

        backend.set_failing_models();
        assert!(client.check_health().await.is_err());
        assert!(!client.is_healthy());

        backend.set_models(vec!["a"]);
        client.check_health().await.unwrap();
        assert!(client.is_healthy());
        assert!(client.last_latency().is_some());
        // The probe does not replace the cached list.
        assert_eq!(client.cached_models(), vec!["fallback-model"]);
    }

    #[tokio::test]
    async fn test_health_check_without_credentials() {
        let backend = Arc::new(MockBackend::with_text("x"));
        let client = ProviderClient::new("groq", backend.clone(), false, vec![], &settings());
        let err = client.check_health().await.unwrap_err();
        assert!(matches!(err, LlmError::MissingCredentials(_)));
        assert_eq!(backend.model_fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_from_preset_without_key() {
        let preset = crate::catalog::preset("openai").unwrap();
        let client =
            ProviderClient::from_preset(preset, Some("  ".into()), None, &settings()).unwrap();
        assert!(!client.has_credentials());

        let preset = crate::catalog::preset("ollama").unwrap();
        let client = ProviderClient::from_preset(preset, None, None, &settings()).unwrap();
        assert!(client.has_credentials());
        assert_eq!(client.cached_models(), vec!["llama3", "mistral", "mixtral"]);
    }
}
