//! Loom - chat with LLM providers over MCP tool servers
//!
//! Main entry point for the Loom CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod runtime;

use commands::{ask, chat, status, tools};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Loom - chat with LLM providers over MCP tool servers
#[derive(Parser)]
#[command(name = "loom")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Tool-server launch file
    #[arg(long, global = true, env = "LOOM_SERVERS")]
    pub servers: Option<PathBuf>,

    /// Settings file (replaces ./loom.toml)
    #[arg(long, global = true, env = "LOOM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Turn deadline in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Enter interactive chat mode (REPL)
    Chat(chat::ChatArgs),

    /// Ask a one-shot question
    Ask(ask::AskArgs),

    /// Show provider and tool-server status
    Status(status::StatusArgs),

    /// List tools, resources and prompts from every server
    Tools(tools::ToolsArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable, stderr) + rotating JSON file
    let filter = if cli.verbose {
        "loom=debug,loom_chat=debug,loom_llm=debug,loom_mcp=debug,loom_config=debug,loom_resilience=debug,info"
    } else {
        "loom=warn,loom_chat=warn,loom_llm=warn,loom_mcp=warn,loom_config=warn,warn"
    };

    let log_dir = loom_config::log_dir().unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "loom.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "loom=trace,loom_chat=trace,loom_llm=debug,loom_mcp=debug,loom_config=debug,loom_resilience=debug,info",
                )),
        )
        .init();

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        servers_file: cli.servers,
        config_file: cli.config,
        turn_timeout: cli.timeout.map(std::time::Duration::from_secs),
    };

    match cli.command {
        Some(Commands::Chat(args)) => chat::run(args, &ctx).await,
        Some(Commands::Ask(args)) => ask::run(args, &ctx).await,
        Some(Commands::Status(args)) => status::run(args, &ctx).await,
        Some(Commands::Tools(args)) => tools::run(args, &ctx).await,
        None => chat::run(chat::ChatArgs::default(), &ctx).await,
    }
}
