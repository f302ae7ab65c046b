//! Settings file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `<config_dir>/loom/config.toml` (user config)
//! 2. `./loom.toml` (project-local), or an explicit `--config` path
//! 3. Environment variables (see [`crate::env`])

use std::path::{Path, PathBuf};

use crate::env::apply_overrides;
use crate::{ConfigError, LoomConfig, Result};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "loom.toml";

/// Default config filename within the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

const APP_NAME: &str = "loom";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "LOOM_CONFIG_DIR";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration, environment overrides included.
    pub config: LoomConfig,
    /// Sources that were checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Problems that did not stop loading (bad files, bad env values).
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Where to look for settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit settings file; replaces `./loom.toml` and must exist.
    pub config_file: Option<PathBuf>,
    /// Directory holding the project-local `loom.toml`.
    pub project_dir: Option<PathBuf>,
    /// User config directory; overrides `LOOM_CONFIG_DIR` and the platform default.
    pub config_dir: Option<PathBuf>,
    /// Skip environment overrides.
    pub skip_env: bool,
}

/// Discover, merge and override settings using the process environment.
pub fn load_config(options: &LoadOptions) -> Result<LoadedConfig> {
    load_config_with_env(options, |key| std::env::var(key).ok())
}

/// Like [`load_config`] with an explicit environment lookup.
pub fn load_config_with_env<F>(options: &LoadOptions, lookup: F) -> Result<LoadedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = LoomConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_path = match &options.config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => config_dir_with(&lookup).map(|d| d.join(USER_CONFIG_FILE)),
    };
    if let Some(path) = user_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    match &options.config_file {
        Some(path) => {
            config.merge(load_config_file(path)?);
            sources.push(ConfigSource {
                path: path.clone(),
                loaded: true,
            });
        }
        None => {
            let path = options
                .project_dir
                .as_ref()
                .map(|d| d.join(PROJECT_CONFIG_FILE))
                .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
            sources.push(load_layer(&mut config, &path, &mut warnings));
        }
    }

    if !options.skip_env {
        warnings.extend(apply_overrides(&mut config, lookup));
    }

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Load settings from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<LoomConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    LoomConfig::from_toml(&contents)
}

/// The loom config directory.
///
/// Checks `LOOM_CONFIG_DIR` first, then falls back to the platform default
/// (`~/.config/loom` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    config_dir_with(|key| std::env::var(key).ok())
}

fn config_dir_with<F>(lookup: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Directory for rolling log files.
pub fn log_dir() -> Option<PathBuf> {
    config_dir().map(|d| d.join("logs"))
}

/// Load an optional layer; a broken file becomes a warning.
fn load_layer(config: &mut LoomConfig, path: &Path, warnings: &mut Vec<String>) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config file");
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}
