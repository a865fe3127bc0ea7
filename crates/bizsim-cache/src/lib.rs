//! Client-side data cache for the bizsim web client.
//!
//! This crate provides a keyed, in-memory cache for values produced by
//! asynchronous fetchers (typically REST calls) with:
//! - Per-key TTL and stale-while-revalidate
//! - Cancellation of superseded requests
//! - A shared, bounded store with expiry and oldest-first eviction
//! - Optimistic mutation with background reconciliation
//!
//! All subscriptions share one store, so keys form a flat global namespace and
//! a sweep triggered by any subscription can evict any key.
//!
//! # Example
//!
//! ```rust,ignore
//! use bizsim_cache::{use_cache, CacheOptions};
//!
//! let team = use_cache(
//!     "team:42",
//!     |_token| async { api.team(42).await },
//!     CacheOptions::new().with_ttl_ms(1_000),
//! );
//!
//! let state = team.settled().await;
//! team.mutate(|t| t.cloned().unwrap_or_default().with_gold(150), true);
//! ```

mod controller;
mod entry;
mod error;
mod facade;
mod options;
mod store;

pub use controller::{FetchController, FetchFuture, FetchPhase, FetchState};
pub use entry::{CacheEntry, StoredValue};
pub use error::{BoxError, Error, Result, SharedError};
pub use facade::{
    CacheHandle, cache_size, clear_all, clear_entry, global_store, prefetch, prefetch_in,
    use_cache, use_cache_in,
};
pub use options::{CacheOptions, DEFAULT_MAX_ITEMS, DEFAULT_TTL};
pub use store::{CacheStats, CacheStore, SweepStats};
pub use tokio_util::sync::CancellationToken;
