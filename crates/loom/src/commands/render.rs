//! Human-readable and JSON output shared by the commands and the REPL.

use console::{Style, style};
use loom_chat::{ChatStatus, TurnResult};
use loom_llm::ProviderListing;
use loom_mcp::{ConnectionState, PromptDescriptor, ResourceDescriptor, ToolDescriptor};
use loom_resilience::BreakerState;
use serde::Serialize;

pub fn print_dim(msg: &str) {
    println!("{}", Style::new().dim().apply_to(msg));
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", Style::new().red().apply_to("Error:"), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", Style::new().yellow().apply_to("Warning:"), msg);
}

fn heading(title: &str) {
    println!();
    println!("{}", style(title).bold());
    println!("{}", Style::new().dim().apply_to("─".repeat(40)));
}

fn breaker_badge(state: BreakerState) -> String {
    match state {
        BreakerState::Closed => style("closed").green().to_string(),
        BreakerState::HalfOpen => style("half-open").yellow().to_string(),
        BreakerState::Open => style("open").red().to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Turns
// ─────────────────────────────────────────────────────────────────────────────

pub fn print_turn(result: &TurnResult, verbose: bool) {
    let dim = Style::new().dim();
    for outcome in &result.tool_results {
        let status = if outcome.is_error { "failed" } else { "done" };
        let server = outcome.server.as_deref().unwrap_or("-");
        println!(
            "{}",
            dim.apply_to(format!("[{} on {}: {}]", outcome.tool, server, status))
        );
        if verbose {
            println!("{}", dim.apply_to(&outcome.payload));
        }
    }
    println!("{}", result.text);
    if verbose {
        println!(
            "{}",
            dim.apply_to(format!(
                "({}/{} · {} in / {} out tokens · {:.1}s)",
                result.provider,
                result.model,
                result.usage.input_tokens,
                result.usage.output_tokens,
                result.elapsed.as_secs_f64()
            ))
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalogs
// ─────────────────────────────────────────────────────────────────────────────

pub fn print_providers(providers: &[ProviderListing]) {
    let dim = Style::new().dim();
    heading("Providers");
    for p in providers {
        let marker = if p.active {
            style("●").green().to_string()
        } else {
            " ".to_string()
        };
        let creds = if p.has_credentials {
            String::new()
        } else {
            style(" (no API key)").red().to_string()
        };
        let defaults = if p.using_default_models {
            dim.apply_to(" (default list)").to_string()
        } else {
            String::new()
        };
        println!("{} {}{}{}", marker, style(&p.name).cyan(), creds, defaults);
        for model in &p.models {
            println!("    {}", dim.apply_to(model));
        }
    }
    println!();
}

pub fn print_tools(tools: &[ToolDescriptor]) {
    heading("Tools");
    if tools.is_empty() {
        print_dim("  (none)");
    }
    for tool in tools {
        let auto = if tool.auto_approve {
            Style::new().dim().apply_to(" [auto-approve]").to_string()
        } else {
            String::new()
        };
        println!(
            "  {} {}{}",
            style(&tool.name).cyan(),
            Style::new().dim().apply_to(format!("({})", tool.server)),
            auto
        );
        if !tool.description.is_empty() {
            println!("      {}", tool.description);
        }
    }
    println!();
}

pub fn print_resources(resources: &[ResourceDescriptor]) {
    heading("Resources");
    if resources.is_empty() {
        print_dim("  (none)");
    }
    for r in resources {
        println!(
            "  {} {} {}",
            style(&r.uri).cyan(),
            r.name,
            Style::new().dim().apply_to(format!("({})", r.server))
        );
        if let Some(desc) = &r.description {
            println!("      {}", desc);
        }
    }
    println!();
}

pub fn print_prompts(prompts: &[PromptDescriptor]) {
    heading("Prompts");
    if prompts.is_empty() {
        print_dim("  (none)");
    }
    for p in prompts {
        println!(
            "  {} {}",
            style(&p.name).cyan(),
            Style::new().dim().apply_to(format!("({})", p.server))
        );
        if let Some(desc) = &p.description {
            println!("      {}", desc);
        }
    }
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

pub fn print_status(status: &ChatStatus) {
    let dim = Style::new().dim();
    heading("Loom Status");
    println!("  {} {}", dim.apply_to("Session:"), status.session_id);
    println!("  {} {}", dim.apply_to("Active:"), style(&status.active).cyan());
    println!(
        "  {} {} in / {} out / {} total ({} turns, {} messages)",
        dim.apply_to("Tokens:"),
        status.usage.input,
        status.usage.output,
        status.usage.total,
        status.turns,
        status.history_len
    );

    println!();
    println!("{}", style("Tool servers").bold());
    if status.servers.is_empty() {
        print_dim("  (none configured)");
    }
    for s in &status.servers {
        let state = match s.state {
            ConnectionState::Connected => style(s.state.as_str()).green(),
            ConnectionState::Degraded | ConnectionState::Connecting => {
                style(s.state.as_str()).yellow()
            }
            ConnectionState::Disconnected | ConnectionState::Failed => style(s.state.as_str()).red(),
        };
        println!(
            "  {} {} {}",
            style(&s.name).cyan(),
            state,
            dim.apply_to(format!(
                "tools={} resources={} prompts={} failures={} breaker={}",
                s.tool_count,
                s.resource_count,
                s.prompt_count,
                s.consecutive_failures,
                breaker_badge(s.breaker)
            ))
        );
        if let Some(err) = &s.last_error {
            println!("      {}", dim.apply_to(format!("last error: {}", err)));
        }
    }

    println!();
    println!("{}", style("Providers").bold());
    for p in &status.providers {
        let health = if !p.has_credentials {
            style("no key").dim().to_string()
        } else if p.healthy {
            style("healthy").green().to_string()
        } else {
            style("unhealthy").red().to_string()
        };
        let latency = p
            .last_latency_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} {} {}",
            style(&p.name).cyan(),
            health,
            dim.apply_to(format!(
                "models={} latency={} breaker={}",
                p.model_count,
                latency,
                breaker_badge(p.breaker)
            ))
        );
    }
    println!();
}

/// Status response for JSON output.
#[derive(Debug, Serialize)]
pub struct StatusOutput {
    session_id: String,
    provider: String,
    model: String,
    usage: UsageOutput,
    turns: u64,
    history_len: usize,
    servers: Vec<ServerOutput>,
    providers: Vec<ProviderOutput>,
}

#[derive(Debug, Serialize)]
struct UsageOutput {
    input: u64,
    output: u64,
    total: u64,
}

#[derive(Debug, Serialize)]
struct ServerOutput {
    name: String,
    state: &'static str,
    tool_count: usize,
    resource_count: usize,
    prompt_count: usize,
    consecutive_failures: u32,
    last_error: Option<String>,
    breaker: &'static str,
}

#[derive(Debug, Serialize)]
struct ProviderOutput {
    name: String,
    has_credentials: bool,
    healthy: bool,
    last_latency_ms: Option<u64>,
    model_count: usize,
    breaker: &'static str,
}

impl From<&ChatStatus> for StatusOutput {
    fn from(status: &ChatStatus) -> Self {
        Self {
            session_id: status.session_id.to_string(),
            provider: status.active.provider.clone(),
            model: status.active.model.clone(),
            usage: UsageOutput {
                input: status.usage.input,
                output: status.usage.output,
                total: status.usage.total,
            },
            turns: status.turns,
            history_len: status.history_len,
            servers: status
                .servers
                .iter()
                .map(|s| ServerOutput {
                    name: s.name.clone(),
                    state: s.state.as_str(),
                    tool_count: s.tool_count,
                    resource_count: s.resource_count,
                    prompt_count: s.prompt_count,
                    consecutive_failures: s.consecutive_failures,
                    last_error: s.last_error.clone(),
                    breaker: s.breaker.as_str(),
                })
                .collect(),
            providers: status
                .providers
                .iter()
                .map(|p| ProviderOutput {
                    name: p.name.clone(),
                    has_credentials: p.has_credentials,
                    healthy: p.healthy,
                    last_latency_ms: p.last_latency_ms,
                    model_count: p.model_count,
                    breaker: p.breaker.as_str(),
                })
                .collect(),
        }
    }
}

/// Tool listing for JSON output.
#[derive(Debug, Serialize)]
pub struct ToolOutput<'a> {
    name: &'a str,
    server: &'a str,
    description: &'a str,
    auto_approve: bool,
    input_schema: &'a serde_json::Value,
}

impl<'a> From<&'a ToolDescriptor> for ToolOutput<'a> {
    fn from(tool: &'a ToolDescriptor) -> Self {
        Self {
            name: &tool.name,
            server: &tool.server,
            description: &tool.description,
            auto_approve: tool.auto_approve,
            input_schema: &tool.input_schema,
        }
    }
}
