//! Provider credential lookup.
//!
//! Keys come only from `<PROVIDER>_API_KEY` environment variables; they are
//! never read from or written to settings files.

/// Environment variable carrying `provider`'s API key.
pub fn api_key_env(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_ascii_uppercase().replace('-', "_"))
}

/// The API key for `provider` from the process environment.
pub fn resolve_api_key(provider: &str) -> Option<String> {
    resolve_api_key_with(provider, |key| std::env::var(key).ok())
}

/// The API key for `provider` from `lookup`. Blank values count as unset.
pub fn resolve_api_key_with<F>(provider: &str, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(&api_key_env(provider))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
