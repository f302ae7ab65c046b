//! Chat command - interactive REPL mode.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use loom_chat::ToolApprover;

use super::Context;
use super::approve::ConsoleApprover;
use super::render;
use super::repl::Repl;
use crate::runtime::Runtime;

/// Arguments for the chat command.
#[derive(Args, Debug, Default)]
pub struct ChatArgs {
    /// Run every tool without asking
    #[arg(short, long)]
    pub yes: bool,
}

/// Run the chat command (REPL).
pub async fn run(args: ChatArgs, ctx: &Context) -> Result<()> {
    let approver: Option<Arc<dyn ToolApprover>> = if args.yes {
        None
    } else {
        Some(Arc::new(ConsoleApprover::default()))
    };
    let runtime = Runtime::start(ctx, approver).await?;
    for warning in &runtime.warnings {
        render::print_warning(warning);
    }

    let mut repl = Repl::new(runtime.service.clone(), ctx.verbose)?;
    repl.print_welcome(runtime.servers_connected, runtime.servers_configured);
    let result = repl.run().await;

    runtime.shutdown().await;
    result
}
