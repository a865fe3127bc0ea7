//! Consumer API: subscriptions and process-wide helpers.

use std::future::Future;
use std::ops::Deref;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::controller::{FetchController, FetchState};
use crate::error::{BoxError, Error, Result};
use crate::options::CacheOptions;
use crate::store::CacheStore;

/// A live subscription to one cache key.
///
/// Dereferences to its [`FetchController`] for the operations (`refresh`,
/// `invalidate`, `mutate`, `refetch`, ...) and adds shorthand accessors for
/// the published fields.
#[derive(Debug, Clone)]
pub struct CacheHandle<T> {
    controller: FetchController<T>,
}

impl<T> CacheHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The published data, if any.
    pub fn data(&self) -> Option<T> {
        self.controller.state().data
    }

    /// Whether a request is in flight.
    pub fn loading(&self) -> bool {
        self.controller.state().loading
    }

    /// The last fetch failure, if any.
    pub fn error(&self) -> Option<Error> {
        self.controller.state().error
    }

    /// Whether the published data is past its TTL.
    pub fn is_stale(&self) -> bool {
        self.controller.state().is_stale
    }

    /// Wait until the published state satisfies `predicate` and return it.
    pub async fn wait_for<P>(&self, mut predicate: P) -> FetchState<T>
    where
        P: FnMut(&FetchState<T>) -> bool,
    {
        let mut rx = self.controller.subscribe();
        match rx.wait_for(|state| predicate(state)).await {
            Ok(state) => state.clone(),
            // The sender lives as long as the controller we hold.
            Err(_) => self.controller.state(),
        }
    }

    /// Wait for the current request, if any, to settle.
    pub async fn settled(&self) -> FetchState<T> {
        self.wait_for(|state| !state.loading).await
    }

    /// The underlying controller.
    pub fn controller(&self) -> &FetchController<T> {
        &self.controller
    }
}

impl<T> Deref for CacheHandle<T> {
    type Target = FetchController<T>;

    fn deref(&self) -> &Self::Target {
        &self.controller
    }
}

/// Subscribe to `key` on the process-wide store.
///
/// The first fetch (stale allowed) starts immediately if `options.enabled`.
/// Must be called within a Tokio runtime.
pub fn use_cache<T, F, Fut, E>(
    key: impl Into<String>,
    fetcher: F,
    options: CacheOptions,
) -> CacheHandle<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    use_cache_in(CacheStore::global(), key, fetcher, options)
}

/// Subscribe to `key` on an explicit store.
pub fn use_cache_in<T, F, Fut, E>(
    store: &CacheStore,
    key: impl Into<String>,
    fetcher: F,
    options: CacheOptions,
) -> CacheHandle<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    let controller = FetchController::new(store.clone(), key, fetcher, options);
    controller.activate();
    CacheHandle { controller }
}

/// Warm the process-wide store before anything subscribes to `key`.
pub async fn prefetch<T, F, Fut, E>(
    key: impl Into<String>,
    fetcher: F,
    options: &CacheOptions,
) -> Result<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<BoxError>,
{
    prefetch_in(CacheStore::global(), key, fetcher, options).await
}

/// Run `fetcher` outside any controller and cache its result in `store`.
///
/// Failures are returned but nothing is written. Prefetching does not sweep.
pub async fn prefetch_in<T, F, Fut, E>(
    store: &CacheStore,
    key: impl Into<String>,
    fetcher: F,
    options: &CacheOptions,
) -> Result<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<BoxError>,
{
    let key = key.into();
    match fetcher(CancellationToken::new()).await {
        Ok(value) => {
            store.insert(key.clone(), value.clone(), options.ttl);
            debug!(key = %key, "Prefetched value cached");
            Ok(value)
        }
        Err(source) => {
            let err = Error::fetch_failed(key, source.into());
            warn!(error = %err, "Prefetch failed");
            Err(err)
        }
    }
}

/// Remove one key from the process-wide store.
pub fn clear_entry(key: &str) -> bool {
    CacheStore::global().delete(key)
}

/// Empty the process-wide store.
pub fn clear_all() {
    CacheStore::global().clear();
}

/// Number of entries in the process-wide store.
pub fn cache_size() -> usize {
    CacheStore::global().size()
}

/// The process-wide store.
pub fn global_store() -> &'static CacheStore {
    CacheStore::global()
}
