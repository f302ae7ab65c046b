//! The set of configured providers and the active `(provider, model)` pair.
//!
//! Switching validates the target before touching the active pointer, so a
//! rejected switch never changes what the next turn will use.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;

use crate::error::{LlmError, Result};
use crate::provider::{ProviderClient, ProviderHealth};

/// The provider and model new turns are sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveModel {
    pub provider: String,
    pub model: String,
}

impl std::fmt::Display for ActiveModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// A provider as shown by `listProviders`.
#[derive(Debug, Clone)]
pub struct ProviderListing {
    pub name: String,
    pub has_credentials: bool,
    pub active: bool,
    pub models: Vec<String>,
    pub using_default_models: bool,
}

/// Owner of all provider clients.
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<ProviderClient>>,
    active: RwLock<ActiveModel>,
}

impl ProviderRegistry {
    /// Create a registry with `default_provider` active.
    ///
    /// Without an explicit model, the provider's first known model is used.
    /// The model is not validated here; that needs network access.
    pub fn new(
        providers: impl IntoIterator<Item = ProviderClient>,
        default_provider: &str,
        default_model: Option<&str>,
    ) -> Result<Self> {
        let providers: BTreeMap<String, Arc<ProviderClient>> = providers
            .into_iter()
            .map(|p| (p.name().to_string(), Arc::new(p)))
            .collect();

        let client = providers
            .get(default_provider)
            .ok_or_else(|| LlmError::UnknownProvider(default_provider.to_string()))?;

        let model = match default_model {
            Some(m) => m.to_string(),
            None => client
                .cached_models()
                .into_iter()
                .next()
                .ok_or_else(|| LlmError::UnknownModel {
                    provider: default_provider.to_string(),
                    model: String::new(),
                })?,
        };

        if !client.has_credentials() {
            tracing::warn!(
                provider = default_provider,
                "default provider has no API key configured"
            );
        }

        Ok(Self {
            active: RwLock::new(ActiveModel {
                provider: default_provider.to_string(),
                model,
            }),
            providers,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ProviderClient>> {
        self.providers.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// The active selection.
    pub fn active(&self) -> ActiveModel {
        self.active.read().clone()
    }

    /// The active client together with the selection it was resolved from.
    ///
    /// Both come from one read of the active pair, so a concurrent `switch`
    /// cannot make them disagree.
    pub fn active_client(&self) -> Result<(Arc<ProviderClient>, ActiveModel)> {
        let active = self.active();
        let client = self
            .providers
            .get(&active.provider)
            .cloned()
            .ok_or_else(|| LlmError::UnknownProvider(active.provider.clone()))?;
        Ok((client, active))
    }

    /// Make `(provider, model)` active.
    ///
    /// Without a model, the provider's first known model is chosen. Fails with
    /// `UnknownProvider`, `MissingCredentials` or `UnknownModel`, leaving the
    /// active pair unchanged.
    pub async fn switch(&self, provider: &str, model: Option<&str>) -> Result<ActiveModel> {
        let client = self
            .providers
            .get(provider)
            .ok_or_else(|| LlmError::UnknownProvider(provider.to_string()))?;

        if !client.has_credentials() {
            return Err(LlmError::MissingCredentials(provider.to_string()));
        }

        let known = client.known_models().await;
        let model = match model {
            Some(m) if known.iter().any(|k| k == m) => m.to_string(),
            Some(m) => {
                return Err(LlmError::UnknownModel {
                    provider: provider.to_string(),
                    model: m.to_string(),
                });
            }
            None => known.into_iter().next().ok_or_else(|| LlmError::UnknownModel {
                provider: provider.to_string(),
                model: String::new(),
            })?,
        };

        let next = ActiveModel {
            provider: provider.to_string(),
            model,
        };
        let previous = std::mem::replace(&mut *self.active.write(), next.clone());
        tracing::info!(from = %previous, to = %next, "switched provider");
        Ok(next)
    }

    /// Every provider with its known models.
    pub fn list(&self) -> Vec<ProviderListing> {
        let active = self.active();
        self.providers
            .values()
            .map(|p| {
                let health = p.health();
                ProviderListing {
                    name: p.name().to_string(),
                    has_credentials: p.has_credentials(),
                    active: p.name() == active.provider,
                    models: p.cached_models(),
                    using_default_models: health.using_default_models,
                }
            })
            .collect()
    }

    /// Re-fetch model lists for every credentialed provider concurrently.
    pub async fn refresh_models(&self) -> Vec<(String, Result<usize>)> {
        let targets: Vec<_> = self
            .providers
            .values()
            .filter(|p| p.has_credentials())
            .collect();

        join_all(targets.into_iter().map(|p| async move {
            let result = p.refresh_models().await.map(|models| models.len());
            (p.name().to_string(), result)
        }))
        .await
    }

    /// Probe every credentialed provider concurrently.
    pub async fn check_health(&self) -> Vec<(String, Result<Duration>)> {
        let targets: Vec<_> = self
            .providers
            .values()
            .filter(|p| p.has_credentials())
            .collect();

        join_all(targets.into_iter().map(|p| async move {
            (p.name().to_string(), p.check_health().await)
        }))
        .await
    }

    pub fn health(&self) -> Vec<ProviderHealth> {
        self.providers.values().map(|p| p.health()).collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("active", &*self.active.read())
            .finish()
    }
}
