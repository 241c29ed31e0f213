//! Session commands - list, show, count, destroy, touch.

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};
use serde_json::json;

use super::Context;

/// Arguments for the show command.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Session id
    pub id: String,
}

/// Arguments for the destroy command.
#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Session ids
    #[arg(required = true)]
    pub ids: Vec<String>,
}

/// Arguments for the touch command.
#[derive(Args, Debug)]
pub struct TouchArgs {
    /// Session id
    pub id: String,
}

/// List every live session.
pub async fn list(ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let sessions = store.all().await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    if sessions.is_empty() {
        println!("{}", dim.apply_to("No live sessions"));
        return Ok(());
    }

    println!("{}", style("Live Sessions").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    for (i, session) in sessions.iter().enumerate() {
        let id = session.id().unwrap_or("?");
        let keys: Vec<&str> = session
            .fields
            .keys()
            .map(String::as_str)
            .filter(|k| *k != "id")
            .collect();
        println!("{}. {}", style(i + 1).cyan(), id);
        if ctx.verbose && !keys.is_empty() {
            println!("   {}", dim.apply_to(keys.join(", ")));
        }
    }
    println!();
    println!("{}", dim.apply_to(format!("{} session(s)", sessions.len())));
    Ok(())
}

/// Print one live session's payload.
pub async fn show(args: ShowArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let Some(session) = store.load(&args.id).await? else {
        bail!("no live session '{}'", args.id);
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        println!("{}", style(format!("Session {}", args.id)).bold());
        println!("{}", Style::new().dim().apply_to("─".repeat(50)));
        println!("{}", serde_json::to_string_pretty(&session)?);
    }
    Ok(())
}

/// Count live and stored rows.
pub async fn count(ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let live = store.length().await?;
    let stored = store.count().await?;

    if ctx.json_output {
        let out = json!({ "live": live, "stored": stored });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", style("Session Counts").bold());
        println!("{}", Style::new().dim().apply_to("─".repeat(50)));
        println!("  Live:    {}", style(live).cyan());
        println!("  Stored:  {}", style(stored).cyan());
    }
    Ok(())
}

/// Tombstone the given sessions.
pub async fn destroy(args: DestroyArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let requested = args.ids.len();
    let destroyed = store.destroy(args.ids).await?;

    if ctx.json_output {
        let out = json!({ "requested": requested, "destroyed": destroyed });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "{} {} of {} session(s)",
            Style::new().green().apply_to("Destroyed"),
            destroyed,
            requested
        );
    }
    Ok(())
}

/// Refresh a live session's deadline using its stored cookie.
pub async fn touch(args: TouchArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let Some(session) = store.load(&args.id).await? else {
        bail!("no live session '{}'", args.id);
    };
    let touched = store.touch(&args.id, &session).await?;

    if ctx.json_output {
        let out = json!({ "id": args.id, "touched": touched });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if touched {
        println!("{} {}", Style::new().green().apply_to("Touched"), args.id);
    } else {
        println!(
            "{}",
            Style::new()
                .dim()
                .apply_to(format!("{} not touched (fixed expiry)", args.id))
        );
    }
    Ok(())
}
