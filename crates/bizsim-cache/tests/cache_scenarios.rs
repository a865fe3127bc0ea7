//! Scenario tests for the fetch controller against a shared store.
//!
//! All tests run on a paused Tokio clock so TTLs can be stepped precisely.
//! Fetchers that need latency sleep on the same clock, which auto-advances
//! whenever every task is idle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bizsim_cache::{
    BoxError, CacheOptions, CacheStore, CancellationToken, Error, FetchController, FetchPhase,
    use_cache_in,
};
use futures::future::{BoxFuture, FutureExt};

#[derive(Debug, Clone, PartialEq)]
struct Team {
    gold: u32,
}

/// Fetcher that serves `responses[n]` on its n-th call (repeating the last).
fn scripted<T>(
    responses: Vec<T>,
) -> (
    Arc<AtomicUsize>,
    impl Fn(CancellationToken) -> std::future::Ready<Result<T, BoxError>>
    + Send
    + Sync
    + 'static,
)
where
    T: Clone + Send + Sync + 'static,
{
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let fetcher = move |_token: CancellationToken| {
        let n = seen.fetch_add(1, Ordering::SeqCst);
        let value = responses[n.min(responses.len() - 1)].clone();
        std::future::ready(Ok::<T, BoxError>(value))
    };
    (calls, fetcher)
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Freshness and expiry
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn team_scenario_fresh_then_stale_then_revalidated() {
    let store = CacheStore::new();
    let (calls, fetcher) = scripted(vec![Team { gold: 100 }, Team { gold: 150 }]);
    let controller = FetchController::new(
        store.clone(),
        "team:42",
        fetcher,
        CacheOptions::new().with_ttl_ms(1_000),
    );

    // t = 0
    assert_eq!(controller.fetch().await.unwrap(), Team { gold: 100 });
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // t = 500: still fresh, fetcher untouched.
    tokio::time::advance(ms(500)).await;
    assert_eq!(controller.fetch().await.unwrap(), Team { gold: 100 });
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // t = 1500: stale value published before the fetcher resolves.
    tokio::time::advance(ms(1_000)).await;
    let pending = controller.fetch();
    let state = controller.state();
    assert_eq!(state.data, Some(Team { gold: 100 }));
    assert!(state.is_stale);
    assert!(state.loading);

    assert_eq!(pending.await.unwrap(), Team { gold: 150 });
    let state = controller.state();
    assert_eq!(state.data, Some(Team { gold: 150 }));
    assert!(!state.is_stale);
    assert!(!state.loading);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn expiry_at_exact_ttl_refetches() {
    let store = CacheStore::new();
    let (calls, fetcher) = scripted(vec![1u32, 2]);
    let controller =
        FetchController::new(store, "k", fetcher, CacheOptions::new().with_ttl_ms(1_000));

    controller.fetch().await.unwrap();
    tokio::time::advance(ms(1_000)).await;

    assert_eq!(controller.fetch().await.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn controllers_share_fresh_entries() {
    let store = CacheStore::new();
    let (first_calls, first) = scripted(vec![Team { gold: 10 }]);
    let (second_calls, second) = scripted(vec![Team { gold: 99 }]);

    let a = FetchController::new(store.clone(), "team:1", first, CacheOptions::new());
    let b = FetchController::new(store.clone(), "team:1", second, CacheOptions::new());

    a.fetch().await.unwrap();
    assert_eq!(b.fetch().await.unwrap(), Team { gold: 10 });
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Eviction
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn sweep_after_fetch_keeps_newest_two() {
    let store = CacheStore::new();
    let options = CacheOptions::new().with_max_items(2);

    for key in ["a", "b", "c"] {
        let (_, fetcher) = scripted(vec![key.to_string()]);
        let controller = FetchController::new(store.clone(), key, fetcher, options.clone());
        controller.fetch().await.unwrap();
        tokio::time::advance(ms(1)).await;
    }

    let mut keys = store.keys();
    keys.sort();
    assert_eq!(keys, vec!["b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn small_capacity_evicts_other_controllers_entries() {
    let store = CacheStore::new();

    for i in 0..5u32 {
        let (_, fetcher) = scripted(vec![i]);
        let controller =
            FetchController::new(store.clone(), format!("shop:{i}"), fetcher, CacheOptions::new());
        controller.fetch().await.unwrap();
    }
    assert_eq!(store.size(), 5);

    let (_, fetcher) = scripted(vec![0u32]);
    let tight = FetchController::new(
        store.clone(),
        "trade:1",
        fetcher,
        CacheOptions::new().with_max_items(1),
    );
    tight.fetch().await.unwrap();

    assert_eq!(store.keys(), vec!["trade:1"]);
}

#[tokio::test(start_paused = true)]
async fn store_size_bounded_after_every_fetch() {
    let store = CacheStore::new();
    let options = CacheOptions::new().with_max_items(3);

    for i in 0..20u32 {
        let (_, fetcher) = scripted(vec![i]);
        let controller =
            FetchController::new(store.clone(), format!("k{i}"), fetcher, options.clone());
        controller.fetch().await.unwrap();
        assert!(store.size() <= 3);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation
// ─────────────────────────────────────────────────────────────────────────────

/// First call resolves after `first_delay`, every later call after `later_delay`.
fn delayed(
    first_delay: Duration,
    later_delay: Duration,
) -> impl Fn(CancellationToken) -> BoxFuture<'static, Result<String, BoxError>> + Send + Sync + 'static
{
    let calls = Arc::new(AtomicUsize::new(0));
    move |_token: CancellationToken| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        let delay = if n == 0 { first_delay } else { later_delay };
        async move {
            tokio::time::sleep(delay).await;
            Ok::<_, BoxError>(format!("response-{}", n + 1))
        }
        .boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn superseded_slow_request_is_never_published() {
    let store = CacheStore::new();
    let controller = FetchController::new(
        store.clone(),
        "k",
        delayed(ms(100), ms(10)),
        CacheOptions::new(),
    );

    let first = controller.refetch(false);
    let second = controller.refetch(false);

    assert_eq!(second.await.unwrap(), "response-2");
    assert!(matches!(first.await, Err(Error::Cancelled { .. })));

    let state = controller.state();
    assert_eq!(state.data.as_deref(), Some("response-2"));
    assert!(state.error.is_none());

    let cached = store.get("k").unwrap().downcast::<String>().unwrap();
    assert_eq!(cached.data.as_str(), "response-2");
}

#[tokio::test(start_paused = true)]
async fn superseded_fast_request_is_never_published() {
    let store = CacheStore::new();
    let controller =
        FetchController::new(store.clone(), "k", delayed(ms(10), ms(100)), CacheOptions::new());
    let mut rx = controller.subscribe();

    let first = controller.refetch(false);
    let second = controller.refetch(false);

    // The first request finishes first in wall-clock time but is discarded.
    assert!(matches!(first.await, Err(Error::Cancelled { .. })));
    assert_eq!(controller.state().data, None);
    assert!(controller.state().loading);
    assert!(!store.contains("k"));

    assert_eq!(second.await.unwrap(), "response-2");
    let seen = rx.wait_for(|state| !state.loading).await.unwrap().clone();
    assert_eq!(seen.data.as_deref(), Some("response-2"));
}

#[tokio::test(start_paused = true)]
async fn fetcher_can_observe_cancellation() {
    let observed = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&observed);
    let controller = FetchController::new(
        CacheStore::new(),
        "k",
        move |token: CancellationToken| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        flag.fetch_add(1, Ordering::SeqCst);
                        Err::<u32, BoxError>("cancelled".into())
                    }
                    _ = tokio::time::sleep(Duration::from_millis(50)) => Ok(7),
                }
            }
        },
        CacheOptions::new(),
    );

    let first = controller.refetch(false);
    let second = controller.refetch(false);

    assert!(first.await.unwrap_err().is_cancelled());
    assert_eq!(second.await.unwrap(), 7);
    assert_eq!(observed.load(Ordering::SeqCst), 1);
    // The cancelled request's error never reaches published state.
    assert!(controller.state().error.is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failure_with_stale_data_degrades_softly() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let controller = FetchController::new(
        store,
        "team:42",
        move |_token| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(Team { gold: 100 })
                } else {
                    Err(std::io::Error::other("503 from backend"))
                }
            }
        },
        CacheOptions::new().with_ttl_ms(100),
    );

    controller.fetch().await.unwrap();
    tokio::time::advance(ms(200)).await;

    let err = controller.fetch().await.unwrap_err();
    assert!(matches!(err, Error::FetchFailed { .. }));

    let state = controller.state();
    assert_eq!(state.data, Some(Team { gold: 100 }));
    assert!(state.is_stale);
    assert!(!state.loading);
    assert!(state.error.is_some());
    assert_eq!(state.phase(), FetchPhase::Failed);
}

#[tokio::test(start_paused = true)]
async fn failure_on_strict_refetch_clears_data() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let controller = FetchController::new(
        store,
        "k",
        move |_token| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(1u32)
                } else {
                    Err(std::io::Error::other("timeout"))
                }
            }
        },
        CacheOptions::new().with_ttl_ms(100),
    );

    controller.fetch().await.unwrap();
    tokio::time::advance(ms(200)).await;

    assert!(controller.refetch(false).await.is_err());
    let state = controller.state();
    assert_eq!(state.data, None);
    assert!(!state.is_stale);
}

#[tokio::test(start_paused = true)]
async fn new_request_clears_previous_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let controller = FetchController::new(
        CacheStore::new(),
        "k",
        move |_token| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if n == 0 {
                    Err(std::io::Error::other("flaky"))
                } else {
                    Ok(3u32)
                }
            }
        },
        CacheOptions::new(),
    );

    assert!(controller.fetch().await.is_err());
    assert!(controller.state().error.is_some());

    let pending = controller.fetch();
    assert!(controller.state().error.is_none());
    assert_eq!(pending.await.unwrap(), 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// Mutation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn mutate_is_optimistic_then_reconciles() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let controller = FetchController::new(
        store.clone(),
        "team:42",
        move |_token| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                // The server applies the purchase with a fee.
                Ok::<_, BoxError>(if n == 0 {
                    Team { gold: 100 }
                } else {
                    Team { gold: 140 }
                })
            }
        },
        CacheOptions::new(),
    );
    let mut rx = controller.subscribe();

    controller.fetch().await.unwrap();

    controller.mutate(
        |team| Team {
            gold: team.map_or(0, |t| t.gold) + 50,
        },
        true,
    );

    // Visible immediately, before any revalidation ran.
    assert_eq!(controller.state().data, Some(Team { gold: 150 }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let cached = store.get("team:42").unwrap().downcast::<Team>().unwrap();
    assert_eq!(*cached.data, Team { gold: 150 });

    let reconciled = rx
        .wait_for(|state| state.data == Some(Team { gold: 140 }))
        .await
        .unwrap()
        .clone();
    assert!(!reconciled.loading);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn mutate_value_without_revalidate_is_local() {
    let store = CacheStore::new();
    let (calls, fetcher) = scripted(vec![Team { gold: 1 }]);
    let controller = FetchController::new(store.clone(), "team:9", fetcher, CacheOptions::new());

    controller.mutate_value(Team { gold: 5 }, false);
    tokio::time::sleep(ms(10)).await;

    assert_eq!(controller.state().data, Some(Team { gold: 5 }));
    assert!(!store.contains("team:9"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Consumer handle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn handle_refresh_and_invalidate() {
    let store = CacheStore::new();
    let (calls, fetcher) = scripted(vec![1u32, 2, 3]);
    let handle = use_cache_in(&store, "plots", fetcher, CacheOptions::new());

    assert_eq!(handle.settled().await.data, Some(1));

    assert_eq!(handle.refresh().await.unwrap(), 2);
    assert_eq!(handle.data(), Some(2));

    handle.invalidate();
    handle.invalidate();
    assert_eq!(handle.data(), None);
    assert!(!handle.is_stale());
    assert!(handle.error().is_none());
    assert!(!store.contains("plots"));

    assert_eq!(handle.refetch(true).await.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn disabled_handle_waits_for_enable() {
    let store = CacheStore::new();
    let (calls, fetcher) = scripted(vec![1u32]);
    let handle = use_cache_in(
        &store,
        "orders",
        fetcher,
        CacheOptions::new().with_enabled(false),
    );

    tokio::time::sleep(ms(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(matches!(handle.refetch(true).await, Err(Error::Disabled { .. })));

    handle.set_enabled(true);
    assert_eq!(handle.settled().await.data, Some(1));
}
