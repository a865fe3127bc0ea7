//! bizsim - command-line reader for the business simulation API
//!
//! Main entry point for the bizsim CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod client;
mod commands;

use commands::{config, get};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// bizsim - read simulation resources through the client cache
#[derive(Parser)]
#[command(name = "bizsim")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// API base URL (default: from config, then http://localhost:8000/api)
    #[arg(long, global = true, env = "BIZSIM_API_URL")]
    pub api: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read a JSON resource through the cache
    Get(get::GetArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `config` subcommands must work on a broken config so it can be repaired.
    let loaded = match cli.command {
        Commands::Config(_) => bizsim_config::load_config_lenient(None),
        _ => bizsim_config::load_config(None)?,
    };
    let logging = loaded.config.logging();

    // Console (human-readable) + optional rotating JSON file
    let console_filter = if cli.verbose {
        "bizsim=debug,bizsim_cache=debug,bizsim_config=debug,info".to_string()
    } else {
        logging.level.clone()
    };

    use tracing_subscriber::prelude::*;

    let (file_layer, _guard) = if logging.file {
        let log_dir = bizsim_config::xdg_config_dir()
            .map(|d| d.join("logs"))
            .unwrap_or_else(|| std::path::PathBuf::from("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "bizsim.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(tracing_subscriber::EnvFilter::new(
                "bizsim=trace,bizsim_cache=trace,bizsim_config=trace,info",
            ));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(console_filter)),
        )
        .with(file_layer)
        .init();

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let api_url = cli.api.unwrap_or_else(|| loaded.config.api().base_url);

    // Create context for commands
    let ctx = commands::Context {
        api_url,
        loaded,
        verbose: cli.verbose,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Get(args) => get::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
