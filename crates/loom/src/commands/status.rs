//! Status command - connect everything once and report health.

use anyhow::Result;
use clap::Args;

use super::Context;
use super::render::{self, StatusOutput};
use crate::runtime::Runtime;

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Probe provider model endpoints before reporting
    #[arg(long)]
    pub refresh: bool,
}

/// Run the status command.
pub async fn run(args: StatusArgs, ctx: &Context) -> Result<()> {
    let runtime = Runtime::start(ctx, None).await?;
    if args.refresh {
        runtime.service.refresh_models().await;
    }
    let status = runtime.service.get_status();
    runtime.shutdown().await;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&StatusOutput::from(&status))?);
    } else {
        render::print_status(&status);
    }
    Ok(())
}
