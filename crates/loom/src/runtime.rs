//! Startup wiring: settings → registries → chat service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use loom_chat::{ChatService, Session, ToolApprover};
use loom_config::{
    DEFAULT_SERVERS_FILE, LoadOptions, LoadedConfig, LoomConfig, McpServerEntry, ResilienceConfig,
};
use loom_llm::{ProviderClient, ProviderRegistry, ProviderSettings, builtin_presets};
use loom_mcp::{ConnectionConfig, ServerRegistry, ServerSpec};
use loom_resilience::{BreakerConfig, RetryPolicy};

use crate::commands::Context;

/// A started service plus what the presentation layer should show at startup.
pub struct Runtime {
    pub service: Arc<ChatService>,
    pub warnings: Vec<String>,
    pub servers_connected: usize,
    pub servers_configured: usize,
}

impl Runtime {
    /// Load settings, spawn tool servers, and build the chat service.
    pub async fn start(ctx: &Context, approver: Option<Arc<dyn ToolApprover>>) -> Result<Self> {
        let LoadedConfig {
            config, warnings, ..
        } = loom_config::load_config(&LoadOptions {
            config_file: ctx.config_file.clone(),
            ..LoadOptions::default()
        })
        .context("failed to load settings")?;

        let specs = load_server_specs(ctx.servers_file.as_deref())?;
        let servers = Arc::new(ServerRegistry::new(specs, connection_config(&config)));
        let servers_configured = servers.len();
        let servers_connected = servers
            .start()
            .await
            .context("tool servers could not be registered")?;

        let providers = Arc::new(build_providers(&config)?);
        for (provider, result) in providers.refresh_models().await {
            if let Err(e) = result {
                tracing::warn!(provider = %provider, error = %e, "initial model fetch failed");
            }
        }

        let session_cfg = config.session();
        let mut session = Session::new(session_cfg.history_limit);
        if let Some(prompt) = session_cfg.system_prompt.filter(|p| !p.trim().is_empty()) {
            session = session.with_system_prompt(prompt);
        }

        let mut service = ChatService::new(providers, servers, session);
        if let Some(approver) = approver {
            service = service.with_approver(approver);
        }
        if let Some(timeout) = ctx.turn_timeout {
            service = service.with_turn_timeout(timeout);
        }
        let service = Arc::new(service);

        let refresh_every = config.provider(&config.defaults().provider).model_cache_ttl();
        service.spawn_model_refresh(refresh_every);
        service.spawn_provider_health(config.servers().health_check_interval());

        Ok(Self {
            service,
            warnings,
            servers_connected,
            servers_configured,
        })
    }

    pub async fn shutdown(self) {
        self.service.shutdown().await;
    }
}

/// Read the launch file. A missing default file means no tool servers.
fn load_server_specs(explicit: Option<&Path>) -> Result<Vec<ServerSpec>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = PathBuf::from(DEFAULT_SERVERS_FILE);
            if !path.is_file() {
                tracing::info!(path = %path.display(), "no tool-server launch file, starting without tools");
                return Ok(Vec::new());
            }
            path
        }
    };

    let file = loom_config::load_servers_file(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    Ok(file.enabled().map(server_spec).collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings mapping
// ─────────────────────────────────────────────────────────────────────────────

pub fn server_spec(entry: &McpServerEntry) -> ServerSpec {
    let mut spec = ServerSpec::new(&entry.name, &entry.command)
        .with_args(entry.args.clone())
        .disabled(entry.disabled);
    for (key, value) in &entry.env {
        spec = spec.with_env_var(key, value);
    }
    for tool in &entry.auto_approve {
        spec = spec.with_auto_approve(tool);
    }
    spec
}

fn retry_policy(r: &ResilienceConfig) -> RetryPolicy {
    RetryPolicy::new(r.retry_base_delay(), r.retry_max_delay(), r.max_retries)
}

fn breaker_config(r: &ResilienceConfig) -> BreakerConfig {
    BreakerConfig::new(r.failure_threshold, r.cooldown())
        .with_max_cooldown(r.cooldown_max())
        .with_backoff_factor(r.cooldown_backoff_factor)
}

pub fn connection_config(config: &LoomConfig) -> ConnectionConfig {
    let resilience = config.resilience();
    let servers = config.servers();
    ConnectionConfig {
        init_timeout: servers.init_timeout(),
        read_timeout: resilience.read_timeout(),
        retry: retry_policy(&resilience),
        breaker: breaker_config(&resilience),
        health_interval: servers.health_check_interval(),
        reconnect_delay: servers.reconnect_delay(),
    }
}

pub fn provider_settings(config: &LoomConfig, provider: &str) -> ProviderSettings {
    let resilience = config.resilience();
    ProviderSettings {
        timeout: resilience.read_timeout(),
        connect_timeout: resilience.connection_timeout(),
        retry: retry_policy(&resilience),
        breaker: breaker_config(&resilience),
        model_cache_ttl: config.provider(provider).model_cache_ttl(),
    }
}

/// One client per built-in preset, keys from the environment.
pub fn build_providers(config: &LoomConfig) -> Result<ProviderRegistry> {
    build_providers_with(config, loom_config::resolve_api_key)
}

fn build_providers_with<F>(config: &LoomConfig, api_key: F) -> Result<ProviderRegistry>
where
    F: Fn(&str) -> Option<String>,
{
    let mut clients = Vec::new();
    for preset in builtin_presets() {
        let settings = provider_settings(config, preset.name);
        let base_url = config.provider(preset.name).base_url;
        let client =
            ProviderClient::from_preset(preset, api_key(preset.name), base_url.as_deref(), &settings)
                .with_context(|| format!("failed to configure provider '{}'", preset.name))?;
        clients.push(client);
    }

    let defaults = config.defaults();
    ProviderRegistry::new(clients, &defaults.provider, defaults.model.as_deref())
        .with_context(|| format!("default provider '{}' is not available", defaults.provider))
}
