//! Sessile - session store administration
//!
//! Main entry point for the Sessile CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{config, sessions, sweep};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Sessile - inspect and maintain a SQLite session store
#[derive(Parser)]
#[command(name = "sessile")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Session database path (overrides the config file)
    #[arg(long, global = true, env = "SESSILE_DB")]
    pub db: Option<std::path::PathBuf>,

    /// Config file with a [store] section
    #[arg(long, global = true, env = "SESSILE_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List live sessions
    List,

    /// Show one live session
    Show(sessions::ShowArgs),

    /// Count live and stored sessions
    Count,

    /// Destroy one or more sessions
    Destroy(sessions::DestroyArgs),

    /// Extend a live session's deadline
    Touch(sessions::TouchArgs),

    /// Remove one bounded batch of expired sessions
    Sweep(sweep::SweepArgs),

    /// Show the effective store settings
    Config,
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "sessile=debug,sessile_store=debug,info"
    } else {
        "sessile=info,sessile_store=info,warn"
    };

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
        .init();

    let ctx = commands::Context::load(cli.db, cli.config.as_deref(), cli.json, cli.verbose)?;

    match cli.command {
        Commands::List => sessions::list(&ctx).await,
        Commands::Show(args) => sessions::show(args, &ctx).await,
        Commands::Count => sessions::count(&ctx).await,
        Commands::Destroy(args) => sessions::destroy(args, &ctx).await,
        Commands::Touch(args) => sessions::touch(args, &ctx).await,
        Commands::Sweep(args) => sweep::run(args, &ctx).await,
        Commands::Config => config::run(&ctx),
    }
}
