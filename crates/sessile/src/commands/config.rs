//! Config command - show the effective store settings.

use anyhow::Result;
use console::{Style, style};

use super::Context;

/// Print the merged settings.
pub fn run(ctx: &Context) -> Result<()> {
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&ctx.settings)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Store Settings").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    print!("{}", ctx.settings.to_toml()?);
    if ctx.settings.database.is_none() {
        println!();
        println!("{}", dim.apply_to("(no database configured)"));
    }
    Ok(())
}
