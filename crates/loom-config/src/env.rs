//! Environment variable overrides, applied after all files are merged.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `CONNECTION_TIMEOUT` | `resilience.connection_timeout_secs` |
//! | `READ_TIMEOUT` | `resilience.read_timeout_secs` |
//! | `MAX_RETRIES` | `resilience.max_retries` |
//! | `RETRY_DELAY_BASE` | `resilience.retry_base_delay_ms` (seconds, float) |
//! | `RETRY_MAX_DELAY` | `resilience.retry_max_delay_ms` (seconds, float) |
//! | `HEALTH_CHECK_INTERVAL` | `servers.health_check_interval_secs` |
//! | `SERVER_INIT_TIMEOUT` | `servers.init_timeout_secs` |
//! | `MESSAGE_HISTORY_LIMIT` | `session.history_limit` |
//! | `DEFAULT_LLM_PROVIDER` | `defaults.provider` |
//! | `DEFAULT_LLM_MODEL` | `defaults.model` |
//! | `OLLAMA_HOST` | `providers.ollama.base_url` |
//!
//! An unparseable value is reported and the previous value kept.

use std::str::FromStr;

use crate::types::LoomConfig;

/// Apply overrides from the process environment.
pub fn apply_env_overrides(config: &mut LoomConfig) -> Vec<String> {
    apply_overrides(config, |key| std::env::var(key).ok())
}

/// Apply overrides from an arbitrary lookup. Returns one warning per
/// rejected value.
pub fn apply_overrides<F>(config: &mut LoomConfig, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut warnings = Vec::new();
    let mut env = Overrides {
        lookup: &lookup,
        warnings: &mut warnings,
    };

    let mut resilience = config.resilience();
    let mut servers = config.servers();
    let mut session = config.session();
    let mut defaults = config.defaults();

    let mut changed = false;
    changed |= env.parse("CONNECTION_TIMEOUT", &mut resilience.connection_timeout_secs);
    changed |= env.parse("READ_TIMEOUT", &mut resilience.read_timeout_secs);
    changed |= env.parse("MAX_RETRIES", &mut resilience.max_retries);
    changed |= env.seconds_as_ms("RETRY_DELAY_BASE", &mut resilience.retry_base_delay_ms);
    changed |= env.seconds_as_ms("RETRY_MAX_DELAY", &mut resilience.retry_max_delay_ms);
    if changed {
        config.resilience = Some(resilience);
    }

    let mut changed = false;
    changed |= env.parse("HEALTH_CHECK_INTERVAL", &mut servers.health_check_interval_secs);
    changed |= env.parse("SERVER_INIT_TIMEOUT", &mut servers.init_timeout_secs);
    if changed {
        config.servers = Some(servers);
    }

    if env.parse("MESSAGE_HISTORY_LIMIT", &mut session.history_limit) {
        config.session = Some(session);
    }

    let mut changed = false;
    if let Some(provider) = env.text("DEFAULT_LLM_PROVIDER") {
        defaults.provider = provider;
        changed = true;
    }
    if let Some(model) = env.text("DEFAULT_LLM_MODEL") {
        defaults.model = Some(model);
        changed = true;
    }
    if changed {
        config.defaults = Some(defaults);
    }

    if let Some(host) = env.text("OLLAMA_HOST") {
        config
            .providers
            .entry("ollama".to_string())
            .or_default()
            .base_url = Some(host);
    }

    warnings
}

struct Overrides<'a, F> {
    lookup: &'a F,
    warnings: &'a mut Vec<String>,
}

impl<F> Overrides<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty trimmed value of `key`.
    fn text(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn reject(&mut self, key: &str, value: &str) {
        tracing::warn!(var = key, value, "invalid value in environment, keeping previous");
        self.warnings
            .push(format!("Invalid value for {}: '{}', keeping previous", key, value));
    }

    fn parse<T: FromStr>(&mut self, key: &str, target: &mut T) -> bool {
        let Some(raw) = self.text(key) else {
            return false;
        };
        match raw.parse() {
            Ok(v) => {
                *target = v;
                true
            }
            Err(_) => {
                self.reject(key, &raw);
                false
            }
        }
    }

    fn seconds_as_ms(&mut self, key: &str, target: &mut u64) -> bool {
        let Some(raw) = self.text(key) else {
            return false;
        };
        match raw.parse::<f64>() {
            Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                *target = (secs * 1000.0).round() as u64;
                true
            }
            _ => {
                self.reject(key, &raw);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn apply(vars: &[(&str, &str)], config: &mut LoomConfig) -> Vec<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        apply_overrides(config, |k| vars.get(k).cloned())
    }

    #[test]
    fn test_no_vars_leaves_config_untouched() {
        let mut config = LoomConfig::new();
        assert!(apply(&[], &mut config).is_empty());
        assert_eq!(config, LoomConfig::new());
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = LoomConfig::new();
        let warnings = apply(
            &[
                ("CONNECTION_TIMEOUT", "15"),
                ("MAX_RETRIES", "7"),
                ("RETRY_DELAY_BASE", "0.5"),
                ("RETRY_MAX_DELAY", "12"),
                ("HEALTH_CHECK_INTERVAL", "90"),
                ("SERVER_INIT_TIMEOUT", "45"),
                ("MESSAGE_HISTORY_LIMIT", "40"),
                ("DEFAULT_LLM_PROVIDER", "openai"),
                ("DEFAULT_LLM_MODEL", "gpt-4o"),
                ("OLLAMA_HOST", "http://gpu:11434"),
            ],
            &mut config,
        );
        assert!(warnings.is_empty());

        let resilience = config.resilience();
        assert_eq!(resilience.connection_timeout_secs, 15);
        assert_eq!(resilience.max_retries, 7);
        assert_eq!(resilience.retry_base_delay_ms, 500);
        assert_eq!(resilience.retry_max_delay_ms, 12_000);
        assert_eq!(resilience.read_timeout_secs, 60);

        assert_eq!(config.servers().health_check_interval_secs, 90);
        assert_eq!(config.servers().init_timeout_secs, 45);
        assert_eq!(config.session().history_limit, 40);
        assert_eq!(config.defaults().provider, "openai");
        assert_eq!(config.defaults().model.as_deref(), Some("gpt-4o"));
        assert_eq!(
            config.provider("ollama").base_url.as_deref(),
            Some("http://gpu:11434")
        );
    }

    #[test]
    fn test_invalid_values_keep_previous() {
        let mut config = LoomConfig::from_toml("[resilience]\nmax_retries = 4\n").unwrap();
        let warnings = apply(
            &[
                ("MAX_RETRIES", "lots"),
                ("RETRY_DELAY_BASE", "-1"),
                ("MESSAGE_HISTORY_LIMIT", "twenty"),
            ],
            &mut config,
        );
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("MAX_RETRIES"));
        assert_eq!(config.resilience().max_retries, 4);
        assert_eq!(config.resilience().retry_base_delay_ms, 1000);
        assert_eq!(config.session().history_limit, 20);
    }

    #[test]
    fn test_blank_values_ignored() {
        let mut config = LoomConfig::new();
        let warnings = apply(&[("DEFAULT_LLM_PROVIDER", "  ")], &mut config);
        assert!(warnings.is_empty());
        assert!(config.defaults.is_none());
    }
}
