//! Configuration for Loom.
//!
//! Three inputs:
//! - the tool-server launch file (`servers_config.json`, `mcpServers` map)
//! - layered TOML settings (user config dir, then `./loom.toml`)
//! - environment overrides and `<PROVIDER>_API_KEY` credentials

pub mod credentials;
pub mod discovery;
pub mod env;
pub mod error;
pub mod servers;
pub mod types;

pub use credentials::{api_key_env, resolve_api_key, resolve_api_key_with};
pub use discovery::{
    ConfigSource, LoadOptions, LoadedConfig, config_dir, load_config, load_config_file,
    load_config_with_env, log_dir,
};
pub use env::{apply_env_overrides, apply_overrides};
pub use error::{ConfigError, Result};
pub use servers::{DEFAULT_SERVERS_FILE, McpServerEntry, ServersFile, load_servers_file};
pub use types::*;
