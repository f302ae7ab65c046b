//! Tools command - list what the configured servers expose.

use anyhow::Result;
use clap::Args;

use super::Context;
use super::render::{self, ToolOutput};
use crate::runtime::Runtime;

/// Arguments for the tools command.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Also list resources and prompts
    #[arg(short, long)]
    pub all: bool,
}

/// Run the tools command.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let runtime = Runtime::start(ctx, None).await?;
    let service = &runtime.service;
    let tools = service.list_tools();

    if ctx.json_output {
        let output: Vec<ToolOutput<'_>> = tools.iter().map(ToolOutput::from).collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        render::print_tools(&tools);
        if args.all {
            render::print_resources(&service.list_resources());
            render::print_prompts(&service.list_prompts());
        }
    }

    runtime.shutdown().await;
    Ok(())
}
