//! Config discovery with per-setting layering.
//!
//! Two files are read, later ones winning setting by setting:
//! 1. the user file, `$BIZSIM_CONFIG_DIR/config.toml` or
//!    `~/.config/bizsim/config.toml`
//! 2. the project file, `./bizsim.toml`
//!
//! A project file holding only `[cache] max_items = 2` changes that one
//! setting and keeps the user file's TTL. [`LoadedConfig::origin`] tells which
//! file a setting came from; settings no file mentions use built-in defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use toml::{Table, Value};

use crate::{BizsimConfig, ConfigError, Result};

/// Project-local config filename.
pub const PROJECT_CONFIG_FILE: &str = "bizsim.toml";

/// Config filename inside the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Directory name under the platform config dir.
const APP_NAME: &str = "bizsim";

/// Overrides the user config directory.
const CONFIG_DIR_ENV: &str = "BIZSIM_CONFIG_DIR";

/// One candidate config file.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    /// Found, parsed and applied.
    pub loaded: bool,
}

/// The merged configuration plus where it came from.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: BizsimConfig,

    /// Candidate files, lowest precedence first.
    pub sources: Vec<ConfigSource>,

    /// `section.setting` → the file that last set it.
    pub origins: BTreeMap<String, PathBuf>,

    /// Problems that did not stop loading: skipped files and, for lenient
    /// loads, failed validation.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of the files that were applied.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }

    /// The file that set `setting` (e.g. `"cache.ttl_ms"`), if any did.
    pub fn origin(&self, setting: &str) -> Option<&Path> {
        self.origins.get(setting).map(PathBuf::as_path)
    }
}

/// Discover, layer and validate configuration.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`] with an explicit user config directory, which takes
/// precedence over `BIZSIM_CONFIG_DIR` and the platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let loaded = discover(project_dir, config_dir)?;
    loaded.config.validate()?;
    Ok(loaded)
}

/// Load without failing: invalid values are kept and reported as warnings.
///
/// For commands that inspect or repair configuration.
pub fn load_config_lenient(project_dir: Option<&Path>) -> LoadedConfig {
    match discover(project_dir, None) {
        Ok(mut loaded) => {
            if let Err(e) = loaded.config.validate() {
                loaded.warnings.push(e.to_string());
            }
            loaded
        }
        Err(e) => LoadedConfig {
            warnings: vec![format!("Using defaults: {}", e)],
            ..LoadedConfig::default()
        },
    }
}

/// Write `config` as TOML, creating parent directories.
pub fn save_config(config: &BizsimConfig, path: &Path) -> Result<()> {
    let write_error = |path: &Path, source| ConfigError::WriteFile {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| write_error(parent, e))?;
    }
    std::fs::write(path, config.to_toml()?).map_err(|e| write_error(path, e))
}

/// The user config file path.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// The user config directory: `BIZSIM_CONFIG_DIR` if set, else the platform
/// config dir joined with `bizsim`.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

// ─────────────────────────────────────────────────────────────────────────────
// Layering
// ─────────────────────────────────────────────────────────────────────────────

fn discover(project_dir: Option<&Path>, config_dir: Option<&Path>) -> Result<LoadedConfig> {
    let user = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => xdg_config_path(),
    };
    let project = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));

    let mut merged = Table::new();
    let mut loaded = LoadedConfig::default();

    for path in user.into_iter().chain(Some(project)) {
        let applied = match read_layer(&path) {
            Ok(Some(layer)) => {
                apply_layer(&mut merged, &mut loaded.origins, layer, &path);
                true
            }
            Ok(None) => false,
            Err(e) => {
                loaded
                    .warnings
                    .push(format!("Skipped {}: {}", path.display(), e));
                false
            }
        };
        loaded.sources.push(ConfigSource {
            path,
            loaded: applied,
        });
    }

    loaded.config = parse_config(merged)?;
    Ok(loaded)
}

/// Parse one file. `None` if it doesn't exist.
///
/// The layer must deserialize on its own so a wrongly typed setting is
/// rejected with its file rather than after merging.
fn read_layer(path: &Path) -> Result<Option<Table>> {
    if !path.is_file() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    let layer: Table = contents.parse()?;
    parse_config(layer.clone())?;
    Ok(Some(layer))
}

/// Overlay `layer` on `merged` one setting at a time, recording origins.
fn apply_layer(
    merged: &mut Table,
    origins: &mut BTreeMap<String, PathBuf>,
    layer: Table,
    path: &Path,
) {
    for (section, value) in layer {
        let settings = match value {
            Value::Table(settings) => settings,
            other => {
                origins.insert(section.clone(), path.to_path_buf());
                merged.insert(section, other);
                continue;
            }
        };

        let target = merged
            .entry(section.clone())
            .or_insert(Value::Table(Table::new()));
        if !target.is_table() {
            *target = Value::Table(Table::new());
        }
        if let Value::Table(target) = target {
            for (name, setting) in settings {
                origins.insert(format!("{}.{}", section, name), path.to_path_buf());
                target.insert(name, setting);
            }
        }
    }
}

fn parse_config(table: Table) -> Result<BizsimConfig> {
    Ok(Value::Table(table).try_into()?)
}
