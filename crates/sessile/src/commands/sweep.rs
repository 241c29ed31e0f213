//! Sweep command - bounded removal of expired sessions.

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};

use super::Context;

/// Arguments for the sweep command.
#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Maximum rows to remove (overrides cleanup_limit)
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Select ids first, then delete them
    #[arg(long)]
    pub two_phase: bool,
}

/// Run one cleanup sweep.
pub async fn run(args: SweepArgs, ctx: &Context) -> Result<()> {
    let mut config = ctx.settings.clone().into_config();
    if let Some(limit) = args.limit {
        config = config.with_cleanup_limit(limit);
    }
    if args.two_phase {
        config = config.with_limit_subquery(false);
    }
    if !config.cleanup_enabled() {
        bail!("cleanup is disabled; set cleanup_limit or pass --limit");
    }

    let store = ctx.open_store_with(config)?;
    let Some(report) = store.cleanup().await? else {
        bail!("cleanup is disabled");
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} {} expired session(s) {}",
            style("Removed").bold(),
            style(report.removed).cyan(),
            Style::new()
                .dim()
                .apply_to(format!("({})", report.strategy))
        );
    }
    Ok(())
}
