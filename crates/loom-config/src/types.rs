//! Settings types mapping to the TOML schema.
//!
//! ```toml
//! [defaults]            # provider and model used at startup
//! [resilience]          # timeouts, retry and circuit-breaker tuning
//! [servers]             # tool-server lifecycle
//! [session]             # history retention, system prompt
//! [providers.groq]      # per-provider overrides
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root settings structure.
///
/// All sections are optional so that partial files can be layered; use the
/// accessor methods to read a section with defaults applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoomConfig {
    pub defaults: Option<DefaultsConfig>,
    pub resilience: Option<ResilienceConfig>,
    pub servers: Option<ServersConfig>,
    pub session: Option<SessionConfig>,
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl LoomConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole; provider entries are replaced per name.
    pub fn merge(&mut self, other: LoomConfig) {
        if other.defaults.is_some() {
            self.defaults = other.defaults;
        }
        if other.resilience.is_some() {
            self.resilience = other.resilience;
        }
        if other.servers.is_some() {
            self.servers = other.servers;
        }
        if other.session.is_some() {
            self.session = other.session;
        }
        for (name, provider) in other.providers {
            self.providers.insert(name, provider);
        }
    }

    pub fn defaults(&self) -> DefaultsConfig {
        self.defaults.clone().unwrap_or_default()
    }

    pub fn resilience(&self) -> ResilienceConfig {
        self.resilience.clone().unwrap_or_default()
    }

    pub fn servers(&self) -> ServersConfig {
        self.servers.clone().unwrap_or_default()
    }

    pub fn session(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    /// Overrides for one provider (defaults if none configured).
    pub fn provider(&self, name: &str) -> ProviderConfig {
        self.providers.get(name).cloned().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_PROVIDER: &str = "groq";

/// `[defaults]`: the provider and model selected at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub provider: String,
    /// `None` selects the provider's first known model.
    pub model: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: None,
        }
    }
}

/// `[resilience]`: timeouts, retry policy and circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub connection_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub cooldown_max_secs: u64,
    pub cooldown_backoff_factor: f64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 10,
            read_timeout_secs: 60,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            failure_threshold: 5,
            cooldown_secs: 30,
            cooldown_max_secs: 300,
            cooldown_backoff_factor: 2.0,
        }
    }
}

impl ResilienceConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Cooldown ceiling; never below the base cooldown.
    pub fn cooldown_max(&self) -> Duration {
        Duration::from_secs(self.cooldown_max_secs.max(self.cooldown_secs))
    }
}

/// `[servers]`: tool-server lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServersConfig {
    pub init_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for ServersConfig {
    fn default() -> Self {
        Self {
            init_timeout_secs: 30,
            health_check_interval_secs: 60,
            reconnect_delay_secs: 5,
        }
    }
}

impl ServersConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// `[session]`: conversation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Non-system messages retained in history.
    pub history_limit: usize,
    pub system_prompt: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            system_prompt: None,
        }
    }
}

/// `[providers.<name>]`: per-provider overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub model_cache_ttl_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model_cache_ttl_secs: 3600,
        }
    }
}

impl ProviderConfig {
    pub fn model_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.model_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = LoomConfig::from_toml("").unwrap();
        assert_eq!(config, LoomConfig::new());
        assert_eq!(config.defaults().provider, "groq");
        assert_eq!(config.resilience().max_retries, 3);
        assert_eq!(config.session().history_limit, 20);
        assert_eq!(config.servers().init_timeout(), Duration::from_secs(30));
        assert_eq!(config.provider("groq").model_cache_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_partial_sections() {
        let config = LoomConfig::from_toml(
            r#"
[resilience]
max_retries = 5
retry_base_delay_ms = 250

[session]
system_prompt = "Be brief."

[providers.ollama]
base_url = "http://gpu-box:11434"
"#,
        )
        .unwrap();

        let resilience = config.resilience();
        assert_eq!(resilience.max_retries, 5);
        assert_eq!(resilience.retry_base_delay(), Duration::from_millis(250));
        assert_eq!(resilience.failure_threshold, 5);

        let session = config.session();
        assert_eq!(session.history_limit, 20);
        assert_eq!(session.system_prompt.as_deref(), Some("Be brief."));

        let ollama = config.provider("ollama");
        assert_eq!(ollama.base_url.as_deref(), Some("http://gpu-box:11434"));
        assert_eq!(ollama.model_cache_ttl_secs, 3600);
    }

    #[test]
    fn test_merge_replaces_sections() {
        let mut base = LoomConfig::from_toml(
            r#"
[defaults]
provider = "openai"
model = "gpt-4o"

[providers.groq]
model_cache_ttl_secs = 60

[providers.openai]
base_url = "http://proxy"
"#,
        )
        .unwrap();
        let overlay = LoomConfig::from_toml(
            r#"
[defaults]
provider = "anthropic"

[providers.groq]
model_cache_ttl_secs = 120
"#,
        )
        .unwrap();

        base.merge(overlay);
        let defaults = base.defaults();
        assert_eq!(defaults.provider, "anthropic");
        // The overlay's [defaults] replaced the base section whole.
        assert_eq!(defaults.model, None);
        assert_eq!(base.provider("groq").model_cache_ttl_secs, 120);
        assert_eq!(base.provider("openai").base_url.as_deref(), Some("http://proxy"));
    }

    #[test]
    fn test_cooldown_ceiling_not_below_base() {
        let resilience = ResilienceConfig {
            cooldown_secs: 600,
            cooldown_max_secs: 300,
            ..ResilienceConfig::default()
        };
        assert_eq!(resilience.cooldown_max(), Duration::from_secs(600));
    }

    #[test]
    fn test_invalid_toml() {
        let err = LoomConfig::from_toml("[resilience\nmax_retries = ").unwrap_err();
        assert!(matches!(err, crate::ConfigError::Parse(_)));
    }
}
