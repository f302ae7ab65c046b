//! Ask command - one turn, then exit.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use loom_chat::{ApproveAll, ToolApprover};

use super::Context;
use super::approve::ConsoleApprover;
use super::render;
use crate::runtime::Runtime;

/// Arguments for the ask command.
#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question or prompt to send
    #[arg(required = true, num_args = 1..)]
    pub prompt: Vec<String>,

    /// Run every tool without asking
    #[arg(short, long)]
    pub yes: bool,
}

/// Run the ask command.
pub async fn run(args: AskArgs, ctx: &Context) -> Result<()> {
    let approver: Arc<dyn ToolApprover> = if args.yes {
        Arc::new(ApproveAll)
    } else {
        Arc::new(ConsoleApprover::default())
    };
    let runtime = Runtime::start(ctx, Some(approver)).await?;
    for warning in &runtime.warnings {
        render::print_warning(warning);
    }

    let prompt = args.prompt.join(" ");
    let outcome = runtime.service.send_message(&prompt).await;
    runtime.shutdown().await;

    let result = outcome?;
    if ctx.json_output {
        let output = serde_json::json!({
            "text": result.text,
            "provider": result.provider,
            "model": result.model,
            "input_tokens": result.usage.input_tokens,
            "output_tokens": result.usage.output_tokens,
            "elapsed_ms": result.elapsed.as_millis() as u64,
            "tools": result.tool_results.iter().map(|o| serde_json::json!({
                "correlation_id": o.correlation_id,
                "tool": o.tool,
                "server": o.server,
                "is_error": o.is_error,
                "payload": o.payload,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        render::print_turn(&result, ctx.verbose);
    }
    Ok(())
}
