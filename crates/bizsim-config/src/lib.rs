//! Configuration system for the bizsim client.
//!
//! Provides TOML-based configuration with:
//! - Cache defaults (`[cache]`): TTL, capacity, stale-while-revalidate,
//!   optional background sweep interval
//! - Backend settings (`[api]`): base URL and request timeout
//! - Logging (`[logging]`): console level and JSON file output
//! - Per-setting layering of the user config and a project-local override,
//!   with the origin of every setting recorded

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, PROJECT_CONFIG_FILE, load_config, load_config_lenient,
    load_config_with_options, save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
