//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [cache]      # defaults for every cache subscription
//! [api]        # REST backend the client talks to
//! [logging]    # log level and file output
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that a partial file (e.g., a project-local
/// override of one cache setting) still deserializes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BizsimConfig {
    /// Cache defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSection>,

    /// Backend API settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiSection>,

    /// Logging settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSection>,
}

impl BizsimConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Config with every section populated with defaults.
    pub fn with_defaults() -> Self {
        Self {
            cache: Some(CacheSection::default()),
            api: Some(ApiSection::default()),
            logging: Some(LoggingSection::default()),
        }
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Effective cache section.
    pub fn cache(&self) -> CacheSection {
        self.cache.clone().unwrap_or_default()
    }

    /// Effective API section.
    pub fn api(&self) -> ApiSection {
        self.api.clone().unwrap_or_default()
    }

    /// Effective logging section.
    pub fn logging(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }

    /// Check value ranges across all present sections.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref cache) = self.cache {
            cache.validate()?;
        }
        if let Some(ref api) = self.api {
            api.validate()?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache
// ─────────────────────────────────────────────────────────────────────────────

/// Default TTL in milliseconds (5 minutes).
pub const DEFAULT_TTL_MS: u64 = 300_000;

/// Default capacity enforced by sweeps.
pub const DEFAULT_MAX_ITEMS: usize = 100;

/// Cache defaults applied to every subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// How long a fetched value stays fresh, in milliseconds.
    pub ttl_ms: u64,

    /// Store size bound passed to each sweep.
    pub max_items: usize,

    /// Show expired data while refetching.
    pub stale_while_revalidate: bool,

    /// Run a background sweep at this interval. Unset means sweeps only
    /// happen after fetches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval_secs: Option<u64>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_TTL_MS,
            max_items: DEFAULT_MAX_ITEMS,
            stale_while_revalidate: true,
            sweep_interval_secs: None,
        }
    }
}

impl CacheSection {
    /// Background sweep interval, if configured.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.ttl_ms == 0 {
            return Err(invalid("cache.ttl_ms", "must be greater than zero"));
        }
        if self.max_items == 0 {
            return Err(invalid("cache.max_items", "must be greater than zero"));
        }
        if self.sweep_interval_secs == Some(0) {
            return Err(invalid(
                "cache.sweep_interval_secs",
                "must be greater than zero when set",
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API
// ─────────────────────────────────────────────────────────────────────────────

/// Default backend base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// REST backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Base URL every resource path is joined onto.
    pub base_url: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ApiSection {
    /// Request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(invalid("api.base_url", "must start with http:// or https://"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("api.timeout_secs", "must be greater than zero"));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Console filter directive (e.g. `info`, `bizsim_cache=debug`).
    pub level: String,

    /// Also write JSON logs to a daily rolling file.
    pub file: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: true,
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
