//! Per-subscription fetch orchestration.
//!
//! A [`FetchController`] binds one cache key to one fetcher and one set of
//! [`CacheOptions`]. It serves fresh entries straight from the shared store,
//! publishes expired entries while it revalidates them, and makes sure a
//! request superseded by a newer one never touches published state or the
//! store.
//!
//! ```text
//! Idle ──► Fetching ──► Fresh
//!   ▲          │    ├─► Stale   (expired data shown, refetch running)
//!   │          │    └─► Failed
//!   └──────────┴── any new trigger re-enters Fetching
//! ```

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::entry::CacheEntry;
use crate::error::{BoxError, Error, Result};
use crate::options::CacheOptions;
use crate::store::CacheStore;

/// Future returned by every fetch trigger.
pub type FetchFuture<T> = BoxFuture<'static, Result<T>>;

type Fetcher<T> = dyn Fn(CancellationToken) -> BoxFuture<'static, std::result::Result<T, BoxError>>
    + Send
    + Sync;

/// State published to consumers.
#[derive(Debug, Clone)]
pub struct FetchState<T> {
    /// Last value known for the key, if any.
    pub data: Option<T>,

    /// Whether a request is in flight.
    pub loading: bool,

    /// The last fetch failure. Cleared when a new request starts.
    pub error: Option<Error>,

    /// Whether `data` is past its TTL.
    pub is_stale: bool,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            is_stale: false,
        }
    }
}

impl<T> FetchState<T> {
    /// Where the controller currently sits in its lifecycle.
    pub fn phase(&self) -> FetchPhase {
        if self.loading {
            FetchPhase::Fetching
        } else if self.error.is_some() {
            FetchPhase::Failed
        } else if self.data.is_none() {
            FetchPhase::Idle
        } else if self.is_stale {
            FetchPhase::Stale
        } else {
            FetchPhase::Fresh
        }
    }
}

/// Lifecycle phase derived from a [`FetchState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    /// Nothing fetched yet, or invalidated.
    Idle,
    /// A request is in flight.
    Fetching,
    /// Data is within its TTL.
    Fresh,
    /// Data is past its TTL.
    Stale,
    /// The last request failed.
    Failed,
}

impl fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchPhase::Idle => write!(f, "idle"),
            FetchPhase::Fetching => write!(f, "fetching"),
            FetchPhase::Fresh => write!(f, "fresh"),
            FetchPhase::Stale => write!(f, "stale"),
            FetchPhase::Failed => write!(f, "failed"),
        }
    }
}

/// The request this controller currently considers authoritative.
struct InFlight {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct RequestSlot {
    /// Number of requests issued so far.
    issued: u64,
    current: Option<InFlight>,
}

struct Shared<T> {
    key: String,
    fetcher: Box<Fetcher<T>>,
    store: CacheStore,
    options: Mutex<CacheOptions>,
    state: watch::Sender<FetchState<T>>,

    /// Guards both supersession and result application, so cancelling an old
    /// request always happens-before that request's completion is handled.
    requests: Mutex<RequestSlot>,

    activated: AtomicBool,
}

/// Orchestrates fetches for one key against the shared store.
///
/// Cloning yields another handle to the same controller. Triggers that need
/// to fetch spawn a Tokio task, so they must be called within a Tokio runtime.
pub struct FetchController<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for FetchController<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for FetchController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("FetchController")
            .field("key", &self.shared.key)
            .field("phase", &state.phase())
            .finish()
    }
}

impl<T> FetchController<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a controller. Nothing is fetched until a trigger runs.
    pub fn new<F, Fut, E>(
        store: CacheStore,
        key: impl Into<String>,
        fetcher: F,
        options: CacheOptions,
    ) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let fetcher: Box<Fetcher<T>> = Box::new(move |token: CancellationToken| {
            fetcher(token)
                .map(|result| result.map_err(Into::<BoxError>::into))
                .boxed()
        });

        Self {
            shared: Arc::new(Shared {
                key: key.into(),
                fetcher,
                store,
                options: Mutex::new(options),
                state: watch::Sender::new(FetchState::default()),
                requests: Mutex::new(RequestSlot::default()),
                activated: AtomicBool::new(false),
            }),
        }
    }

    /// The cache key this controller is bound to.
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// The store this controller reads and writes.
    pub fn store(&self) -> &CacheStore {
        &self.shared.store
    }

    /// Current options.
    pub fn options(&self) -> CacheOptions {
        self.shared.options.lock().clone()
    }

    /// Snapshot of the published state.
    pub fn state(&self) -> FetchState<T> {
        self.shared.state.borrow().clone()
    }

    /// Subscribe to published state changes.
    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.shared.state.subscribe()
    }

    /// First activation: fetch once (stale allowed) if enabled.
    ///
    /// Later calls do nothing.
    pub fn activate(&self) {
        if self.shared.activated.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.shared.options.lock().enabled {
            // The request runs in its own task; the handle is not needed.
            drop(self.trigger_fetch(true));
        }
    }

    /// Replace the dependency list, refetching if it changed by value.
    ///
    /// Returns whether a refetch was triggered. Before activation the new
    /// list is only recorded.
    pub fn set_dependencies(&self, dependencies: Vec<Value>) -> bool {
        let enabled = {
            let mut options = self.shared.options.lock();
            if options.dependencies == dependencies {
                return false;
            }
            options.dependencies = dependencies;
            options.enabled
        };

        if enabled && self.shared.activated.load(Ordering::SeqCst) {
            debug!(key = %self.shared.key, "Dependencies changed, refetching");
            drop(self.trigger_fetch(true));
            true
        } else {
            false
        }
    }

    /// Enable or disable fetching. Re-enabling an activated controller
    /// refetches. Returns whether a refetch was triggered.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let was_enabled = std::mem::replace(&mut self.shared.options.lock().enabled, enabled);

        if enabled && !was_enabled && self.shared.activated.load(Ordering::SeqCst) {
            drop(self.trigger_fetch(true));
            true
        } else {
            false
        }
    }

    /// Fetch with stale data allowed.
    pub fn fetch(&self) -> FetchFuture<T> {
        self.trigger_fetch(true)
    }

    /// Fetch with explicit control over stale-while-revalidate.
    pub fn refetch(&self, use_stale: bool) -> FetchFuture<T> {
        self.trigger_fetch(use_stale)
    }

    /// Drop the cached entry and fetch strictly fresh data.
    pub fn refresh(&self) -> FetchFuture<T> {
        self.invalidate();
        self.trigger_fetch(false)
    }

    /// Remove this key from the store and clear published data.
    pub fn invalidate(&self) {
        let removed = self.shared.store.delete(&self.shared.key);
        debug!(key = %self.shared.key, removed, "Cache entry invalidated");

        self.shared.state.send_modify(|state| {
            state.data = None;
            state.is_stale = false;
            state.error = None;
        });
    }

    /// Optimistically replace the published data.
    ///
    /// `updater` receives the current data. The result is published before
    /// this returns. With `revalidate`, the value is also written to the store
    /// and a refetch is scheduled on a separate task to reconcile with the
    /// fetcher. That refetch skips the fresh-hit check, since the entry it
    /// would hit is the one just written.
    pub fn mutate<F>(&self, updater: F, revalidate: bool)
    where
        F: FnOnce(Option<&T>) -> T,
    {
        let current = self.shared.state.borrow().data.clone();
        let updated = updater(current.as_ref());

        self.shared.state.send_modify(|state| {
            state.data = Some(updated.clone());
        });

        if !revalidate {
            return;
        }

        let options = self.options();
        self.shared.store.set(
            self.shared.key.clone(),
            CacheEntry::new(updated.clone(), options.ttl).into_stored(),
        );

        let controller = self.clone();
        tokio::spawn(async move {
            let fallback = options.stale_while_revalidate.then_some(updated);
            if let Err(err) = controller.revalidate(fallback).await {
                trace!(key = %controller.shared.key, error = %err, "Revalidation after mutate did not apply");
            }
        });
    }

    /// [`mutate`](Self::mutate) with a plain value.
    pub fn mutate_value(&self, value: T, revalidate: bool) {
        self.mutate(move |_| value, revalidate);
    }

    /// Run the fetch state machine.
    ///
    /// The store lookup, any stale publication, supersession of the previous
    /// request and the `loading` flag all happen before this returns. The
    /// returned future resolves once the fetcher does; dropping it does not
    /// stop the request.
    pub fn trigger_fetch(&self, use_stale: bool) -> FetchFuture<T> {
        let options = self.options();
        let key = &self.shared.key;

        if !options.enabled {
            trace!(key = %key, "Controller disabled, not fetching");
            return future::ready(Err(Error::Disabled { key: key.clone() })).boxed();
        }

        let mut fallback = None;
        match self.cached(Instant::now()) {
            Err(err) => {
                warn!(key = %key, error = %err, "Cached value has an unexpected type");
                self.shared.state.send_modify(|state| {
                    state.error = Some(err.clone());
                    state.loading = false;
                });
                return future::ready(Err(err)).boxed();
            }
            Ok(Some((data, true))) => {
                trace!(key = %key, "Cache hit");
                self.shared.state.send_modify(|state| {
                    state.data = Some(data.clone());
                    state.is_stale = false;
                    state.error = None;
                    state.loading = false;
                });
                return future::ready(Ok(data)).boxed();
            }
            Ok(Some((data, false))) if options.stale_while_revalidate && use_stale => {
                debug!(key = %key, "Serving stale entry while revalidating");
                self.shared.state.send_modify(|state| {
                    state.data = Some(data.clone());
                    state.is_stale = true;
                    state.error = None;
                });
                fallback = Some(data);
            }
            Ok(_) => debug!(key = %key, "Cache miss"),
        }

        self.start_request(fallback, options)
    }

    /// Fetch regardless of freshness, keeping what is already published.
    fn revalidate(&self, fallback: Option<T>) -> FetchFuture<T> {
        let options = self.options();
        if !options.enabled {
            return future::ready(Err(Error::Disabled {
                key: self.shared.key.clone(),
            }))
            .boxed();
        }
        self.start_request(fallback, options)
    }

    /// Typed lookup: the cached value and whether it is fresh at `now`.
    fn cached(&self, now: Instant) -> Result<Option<(T, bool)>> {
        let Some(entry) = self.shared.store.get(&self.shared.key) else {
            return Ok(None);
        };
        let typed = entry.downcast::<T>().ok_or_else(|| Error::TypeMismatch {
            key: self.shared.key.clone(),
            expected: type_name::<T>(),
        })?;
        Ok(Some(((*typed.data).clone(), typed.is_fresh_at(now))))
    }

    fn start_request(&self, fallback: Option<T>, options: CacheOptions) -> FetchFuture<T> {
        let key = self.shared.key.clone();

        let (generation, token) = {
            let mut slot = self.shared.requests.lock();
            if let Some(previous) = slot.current.take() {
                debug!(key = %key, superseded = previous.generation, "Cancelling in-flight request");
                previous.token.cancel();
            }
            slot.issued += 1;
            let token = CancellationToken::new();
            slot.current = Some(InFlight {
                generation: slot.issued,
                token: token.clone(),
            });
            (slot.issued, token)
        };

        self.shared.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });

        // A panic while building the future or while polling it is a failed fetch.
        let request: BoxFuture<'static, std::result::Result<T, BoxError>> =
            match panic::catch_unwind(AssertUnwindSafe(|| (self.shared.fetcher)(token.clone()))) {
                Ok(request) => AssertUnwindSafe(request)
                    .catch_unwind()
                    .map(|outcome| outcome.unwrap_or_else(|_| Err(fetcher_panicked())))
                    .boxed(),
                Err(_) => future::ready(Err(fetcher_panicked())).boxed(),
            };
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let outcome = request.await;
            shared.complete(generation, &token, outcome, fallback, &options)
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(Error::TaskFailed {
                    key,
                    reason: err.to_string(),
                }),
            }
        }
        .boxed()
    }
}

impl<T> Shared<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Apply a finished request unless it was superseded.
    fn complete(
        &self,
        generation: u64,
        token: &CancellationToken,
        outcome: std::result::Result<T, BoxError>,
        fallback: Option<T>,
        options: &CacheOptions,
    ) -> Result<T> {
        // Held until the result is applied; see `requests`.
        let mut slot = self.requests.lock();

        if token.is_cancelled() {
            trace!(key = %self.key, generation, "Discarding result of superseded request");
            return Err(Error::Cancelled {
                key: self.key.clone(),
            });
        }
        if slot
            .current
            .as_ref()
            .is_some_and(|current| current.generation == generation)
        {
            slot.current = None;
        }

        match outcome {
            Ok(value) => {
                self.store.set(
                    self.key.clone(),
                    CacheEntry::new(value.clone(), options.ttl).into_stored(),
                );
                self.store.sweep(options.max_items);

                self.state.send_modify(|state| {
                    state.data = Some(value.clone());
                    state.is_stale = false;
                    state.loading = false;
                    state.error = None;
                });

                debug!(key = %self.key, generation, "Fetched value cached");
                Ok(value)
            }
            Err(source) => {
                let err = Error::fetch_failed(self.key.clone(), source);
                warn!(key = %self.key, error = %err, keeps_stale = fallback.is_some(), "Fetch failed");

                self.state.send_modify(|state| {
                    state.error = Some(err.clone());
                    state.loading = false;
                    match fallback {
                        Some(stale) => {
                            state.data = Some(stale);
                            state.is_stale = true;
                        }
                        None => {
                            state.data = None;
                            state.is_stale = false;
                        }
                    }
                });

                Err(err)
            }
        }
    }
}

fn fetcher_panicked() -> BoxError {
    BoxError::from("fetcher panicked")
}
