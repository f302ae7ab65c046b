//! Built-in provider presets.
//!
//! Each preset knows where a vendor's API lives, how to authenticate, which
//! environment variable carries its key, and a fallback model list for when
//! the live listing cannot be fetched.

use std::sync::Arc;

use crate::anthropic::{AnthropicBackend, AnthropicConfig};
use crate::backend::SharedBackend;
use crate::error::Result;
use crate::openai::{OpenAiBackend, OpenAiConfig};
use crate::provider::ProviderSettings;

/// Default local Ollama endpoint.
pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";

/// Wire dialect spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// OpenAI chat completions with Bearer auth.
    OpenAiCompatible,
    /// Anthropic Messages API.
    Anthropic,
    /// Local Ollama: OpenAI-compatible chat under `/v1`, models from `/api/tags`.
    Ollama,
}

/// Static description of one provider.
#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub kind: ProviderKind,
    pub base_url: &'static str,
    /// Environment variable holding the API key; `None` if no key is needed.
    pub credential_env: Option<&'static str>,
    pub extra_headers: &'static [(&'static str, &'static str)],
    pub model_filter: Option<&'static str>,
    pub default_models: &'static [&'static str],
}

impl ProviderPreset {
    pub fn requires_credentials(&self) -> bool {
        self.credential_env.is_some()
    }

    pub fn default_models(&self) -> Vec<String> {
        self.default_models.iter().map(|m| m.to_string()).collect()
    }

    /// Construct the HTTP backend for this preset.
    ///
    /// `base_url` overrides the preset's URL (for Ollama, the host).
    pub fn build_backend(
        &self,
        api_key: Option<String>,
        base_url: Option<&str>,
        settings: &ProviderSettings,
    ) -> Result<SharedBackend> {
        let base_url = base_url.unwrap_or(self.base_url).trim_end_matches('/');
        let (timeout, connect_timeout) = (settings.timeout, settings.connect_timeout);

        match self.kind {
            ProviderKind::Anthropic => {
                let config = AnthropicConfig::new(api_key.unwrap_or_default())
                    .with_base_url(base_url)
                    .with_timeout(timeout)
                    .with_connect_timeout(connect_timeout);
                Ok(Arc::new(AnthropicBackend::new(config)?))
            }
            ProviderKind::OpenAiCompatible => {
                let mut config = OpenAiConfig::new(self.name, base_url)
                    .with_timeout(timeout)
                    .with_connect_timeout(connect_timeout);
                if let Some(key) = api_key {
                    config = config.with_api_key(key);
                }
                for (name, value) in self.extra_headers {
                    config = config.with_header(*name, *value);
                }
                if let Some(filter) = self.model_filter {
                    config = config.with_model_filter(filter);
                }
                Ok(Arc::new(OpenAiBackend::new(config)?))
            }
            ProviderKind::Ollama => {
                let config = OpenAiConfig::new(self.name, format!("{}/v1", base_url))
                    .with_models_url(format!("{}/api/tags", base_url))
                    .with_timeout(timeout)
                    .with_connect_timeout(connect_timeout);
                Ok(Arc::new(OpenAiBackend::new(config)?))
            }
        }
    }
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "groq",
        kind: ProviderKind::OpenAiCompatible,
        base_url: "https://api.groq.com/openai/v1",
        credential_env: Some("GROQ_API_KEY"),
        extra_headers: &[],
        model_filter: None,
        default_models: &["llama-3.2-90b-vision-preview", "llama-3.2-70b-instruct-preview"],
    },
    ProviderPreset {
        name: "openai",
        kind: ProviderKind::OpenAiCompatible,
        base_url: "https://api.openai.com/v1",
        credential_env: Some("OPENAI_API_KEY"),
        extra_headers: &[],
        model_filter: Some("gpt"),
        default_models: &["gpt-4o", "gpt-4-turbo", "gpt-3.5-turbo"],
    },
    ProviderPreset {
        name: "anthropic",
        kind: ProviderKind::Anthropic,
        base_url: "https://api.anthropic.com",
        credential_env: Some("ANTHROPIC_API_KEY"),
        extra_headers: &[],
        model_filter: None,
        default_models: &["claude-3-5-sonnet-20240620", "claude-3-opus-20240229"],
    },
    ProviderPreset {
        name: "gemini",
        kind: ProviderKind::OpenAiCompatible,
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        credential_env: Some("GEMINI_API_KEY"),
        extra_headers: &[],
        model_filter: None,
        default_models: &["gemini-1.5-pro", "gemini-1.5-flash", "gemini-1.0-pro"],
    },
    ProviderPreset {
        name: "openroute",
        kind: ProviderKind::OpenAiCompatible,
        base_url: "https://openrouter.ai/api/v1",
        credential_env: Some("OPENROUTE_API_KEY"),
        extra_headers: &[("HTTP-Referer", "http://localhost"), ("X-Title", "Loom")],
        model_filter: None,
        default_models: &[
            "openai/gpt-4o",
            "anthropic/claude-3-5-sonnet",
            "meta-llama/llama-3.2-70b-instruct",
        ],
    },
    ProviderPreset {
        name: "github",
        kind: ProviderKind::OpenAiCompatible,
        base_url: "https://models.inference.ai.azure.com",
        credential_env: Some("GITHUB_API_KEY"),
        extra_headers: &[],
        model_filter: None,
        default_models: &["gpt-4o", "gpt-4o-mini"],
    },
    ProviderPreset {
        name: "ollama",
        kind: ProviderKind::Ollama,
        base_url: DEFAULT_OLLAMA_HOST,
        credential_env: None,
        extra_headers: &[],
        model_filter: None,
        default_models: &["llama3", "mistral", "mixtral"],
    },
];

/// All built-in presets, in display order.
pub fn builtin_presets() -> &'static [ProviderPreset] {
    PRESETS
}

/// Look up a built-in preset by (case-insensitive) name.
pub fn preset(name: &str) -> Option<&'static ProviderPreset> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}
