//! CLI command handlers.

use std::path::PathBuf;
use std::time::Duration;

pub mod approve;
pub mod ask;
pub mod chat;
pub mod render;
pub mod repl;
pub mod status;
pub mod tools;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Tool-server launch file; `None` looks for `servers_config.json`.
    pub servers_file: Option<PathBuf>,
    /// Explicit settings file.
    pub config_file: Option<PathBuf>,
    /// Deadline for each chat turn.
    pub turn_timeout: Option<Duration>,
}
