//! Config command - configuration management.

use anyhow::Result;
use clap::{Args, Subcommand};

use bizsim_config::{BizsimConfig, PROJECT_CONFIG_FILE};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show resolved configuration and the files it came from
    Show,

    /// Show configuration file path
    Path,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./bizsim.toml) instead of user config
        #[arg(long)]
        local: bool,
    },
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx).await,
        ConfigCommand::Path => cmd_path().await,
        ConfigCommand::Init { local } => cmd_init(local).await,
    }
}

async fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;
    let config = ctx.config();

    println!("# bizsim Configuration\n");

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }

    // Each setting is followed by the file that set it, if any.
    let setting = |key: &str, value: String| {
        let origin = loaded
            .origin(key)
            .map(|p| format!("  ({})", p.display()))
            .unwrap_or_default();
        let name = key.rsplit('.').next().unwrap_or(key);
        println!("  {}: {}{}", name, value, origin);
    };

    let cache = config.cache();
    println!("Cache:");
    setting("cache.ttl_ms", cache.ttl_ms.to_string());
    setting("cache.max_items", cache.max_items.to_string());
    setting(
        "cache.stale_while_revalidate",
        cache.stale_while_revalidate.to_string(),
    );
    setting(
        "cache.sweep_interval_secs",
        cache
            .sweep_interval_secs
            .map_or_else(|| "(after fetches only)".to_string(), |s| s.to_string()),
    );
    println!();

    let api = config.api();
    println!("API:");
    if ctx.api_url == api.base_url {
        setting("api.base_url", api.base_url.clone());
    } else {
        println!("  base_url: {}  (command line)", ctx.api_url);
    }
    setting("api.timeout_secs", api.timeout_secs.to_string());
    println!();

    let logging = config.logging();
    println!("Logging:");
    setting("logging.level", logging.level.clone());
    setting("logging.file", logging.file.to_string());
    println!();

    if !loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  ⚠ {}", w);
        }
        println!();
    }

    if ctx.verbose {
        println!("---\nRaw config:\n");
        println!("{}", config.to_toml()?);
    }

    Ok(())
}

async fn cmd_path() -> Result<()> {
    if let Some(path) = bizsim_config::xdg_config_path() {
        println!("{}", path.display());
    } else {
        eprintln!("Could not determine config directory");
    }
    Ok(())
}

async fn cmd_init(local: bool) -> Result<()> {
    let path = if local {
        std::path::PathBuf::from(PROJECT_CONFIG_FILE)
    } else {
        bizsim_config::xdg_config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
    };

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    bizsim_config::save_config(&BizsimConfig::with_defaults(), &path)?;
    println!("Created config file: {}", path.display());

    Ok(())
}
