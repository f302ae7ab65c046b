//! The tool-server launch file.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "search": {
//!       "command": "uvx",
//!       "args": ["mcp-server-search"],
//!       "env": {"SEARCH_API_KEY": "..."},
//!       "autoApprove": ["web_search"]
//!     },
//!     "sqlite": { "command": "mcp-server-sqlite", "disabled": true }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ConfigError, Result};

/// Default launch file name, looked up in the working directory.
pub const DEFAULT_SERVERS_FILE: &str = "servers_config.json";

/// One entry of the `mcpServers` map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerEntry {
    /// Map key; filled in after parsing.
    #[serde(skip)]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub disabled: bool,
    /// Tools that run without operator confirmation.
    #[serde(default)]
    pub auto_approve: Vec<String>,
}

impl McpServerEntry {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }
}

/// Parsed launch file. Entries are ordered by name.
#[derive(Debug, Clone, Default)]
pub struct ServersFile {
    pub servers: Vec<McpServerEntry>,
}

impl ServersFile {
    /// Parse launch-file JSON. `context` names the source in errors.
    pub fn from_json(json: &str, context: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(json).map_err(|e| ConfigError::ParseJson {
            path: context.to_string(),
            source: e,
        })?;

        let map = raw
            .get("mcpServers")
            .ok_or_else(|| ConfigError::MissingField {
                field: "mcpServers".into(),
                context: context.to_string(),
            })?
            .clone();

        let entries: BTreeMap<String, McpServerEntry> =
            serde_json::from_value(map).map_err(|e| ConfigError::ParseJson {
                path: context.to_string(),
                source: e,
            })?;

        let mut servers = Vec::with_capacity(entries.len());
        for (name, mut entry) in entries {
            if entry.command.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("mcpServers.{}.command", name),
                    context: context.to_string(),
                    reason: "command must not be empty".into(),
                });
            }
            entry.name = name;
            servers.push(entry);
        }
        Ok(Self { servers })
    }

    /// Entries that are not disabled.
    pub fn enabled(&self) -> impl Iterator<Item = &McpServerEntry> {
        self.servers.iter().filter(|s| s.is_enabled())
    }
}

/// Load and validate a launch file.
pub fn load_servers_file(path: &Path) -> Result<ServersFile> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    let file = ServersFile::from_json(&contents, &path.display().to_string())?;
    tracing::debug!(
        path = %path.display(),
        total = file.servers.len(),
        enabled = file.enabled().count(),
        "loaded server launch file"
    );
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "mcpServers": {
            "search": {
                "command": "uvx",
                "args": ["mcp-server-search", "--stdio"],
                "env": {"SEARCH_API_KEY": "k"},
                "autoApprove": ["web_search"]
            },
            "sqlite": {
                "command": "mcp-server-sqlite",
                "disabled": true
            }
        }
    }"#;

    #[test]
    fn test_parse_entries() {
        let file = ServersFile::from_json(SAMPLE, "test").unwrap();
        assert_eq!(file.servers.len(), 2);

        let search = &file.servers[0];
        assert_eq!(search.name, "search");
        assert_eq!(search.command, "uvx");
        assert_eq!(search.args, vec!["mcp-server-search", "--stdio"]);
        assert_eq!(search.env.get("SEARCH_API_KEY").map(String::as_str), Some("k"));
        assert_eq!(search.auto_approve, vec!["web_search"]);
        assert!(search.is_enabled());

        let sqlite = &file.servers[1];
        assert!(sqlite.disabled);
        assert!(sqlite.args.is_empty());
    }

    #[test]
    fn test_disabled_entries_filtered() {
        let file = ServersFile::from_json(SAMPLE, "test").unwrap();
        let names: Vec<_> = file.enabled().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["search"]);
    }

    #[test]
    fn test_missing_servers_key() {
        let err = ServersFile::from_json(r#"{"servers": {}}"#, "cfg.json").unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingField { ref field, .. } if field == "mcpServers")
        );
    }

    #[test]
    fn test_invalid_json() {
        let err = ServersFile::from_json("{not json", "cfg.json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_empty_command_rejected() {
        let err =
            ServersFile::from_json(r#"{"mcpServers": {"x": {"command": " "}}}"#, "t").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_SERVERS_FILE);
        fs::write(&path, SAMPLE).unwrap();

        let file = load_servers_file(&path).unwrap();
        assert_eq!(file.servers.len(), 2);

        let err = load_servers_file(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
