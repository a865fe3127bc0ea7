//! Per-controller cache options.

use std::time::Duration;

use serde_json::Value;

/// Default time-to-live for cached values (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_millis(300_000);

/// Default capacity passed to every sweep.
pub const DEFAULT_MAX_ITEMS: usize = 100;

/// Options for a single cache subscription.
///
/// Capacity is not a property of the store: `max_items` is handed to each
/// sweep the controller triggers, and that sweep acts on the whole store.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    /// How long a written value stays fresh.
    pub ttl: Duration,

    /// Store size bound enforced by sweeps this controller triggers.
    pub max_items: usize,

    /// Publish expired data while a refetch is running.
    pub stale_while_revalidate: bool,

    /// Disabled controllers never fetch.
    pub enabled: bool,

    /// Values whose change (by equality) re-triggers a fetch.
    pub dependencies: Vec<Value>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_items: DEFAULT_MAX_ITEMS,
            stale_while_revalidate: true,
            enabled: true,
            dependencies: Vec::new(),
        }
    }
}

impl CacheOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the time-to-live in milliseconds.
    pub fn with_ttl_ms(self, ttl_ms: u64) -> Self {
        self.with_ttl(Duration::from_millis(ttl_ms))
    }

    /// Set the capacity used by sweeps.
    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items = max;
        self
    }

    /// Enable or disable stale-while-revalidate.
    pub fn with_stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }

    /// Enable or disable fetching.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Replace the dependency list.
    pub fn with_dependencies<I, V>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Append a single dependency.
    pub fn with_dependency(mut self, dep: impl Into<Value>) -> Self {
        self.dependencies.push(dep.into());
        self
    }
}
