//! CLI command handlers.

use bizsim_config::{BizsimConfig, LoadedConfig};

pub mod config;
pub mod get;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// API base URL, after `--api` / `BIZSIM_API_URL` overrides.
    pub api_url: String,
    /// Layered configuration and where each setting came from.
    pub loaded: LoadedConfig,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// The merged configuration.
    pub fn config(&self) -> &BizsimConfig {
        &self.loaded.config
    }
}
