//! Get command - read a resource through the cache.

use std::time::Duration;

use anyhow::Result;
use bizsim_cache::{CacheOptions, CancellationToken, FetchPhase, FetchState, global_store, use_cache};
use clap::Args;
use console::Style;
use serde_json::Value;

use super::Context;
use crate::client::ApiClient;

/// Arguments for the get command.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Resource path relative to the API base URL (e.g. teams/42)
    pub path: String,

    /// Number of reads to perform
    #[arg(short = 'n', long, default_value_t = 1)]
    pub repeat: u32,

    /// Delay between reads in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,

    /// Override the configured TTL in milliseconds
    #[arg(long)]
    pub ttl_ms: Option<u64>,

    /// Hide expired data while refetching
    #[arg(long)]
    pub no_stale: bool,
}

impl GetArgs {
    /// Cache options from config defaults plus command-line overrides.
    fn cache_options(&self, ctx: &Context) -> CacheOptions {
        let cache = ctx.config().cache();
        CacheOptions::new()
            .with_ttl_ms(self.ttl_ms.unwrap_or(cache.ttl_ms))
            .with_max_items(cache.max_items)
            .with_stale_while_revalidate(cache.stale_while_revalidate && !self.no_stale)
    }
}

/// Run the get command.
pub async fn run(args: GetArgs, ctx: &Context) -> Result<()> {
    let options = args.cache_options(ctx);
    let client = ApiClient::new(&ctx.api_url, ctx.config().api().timeout())?;

    let cache = ctx.config().cache();
    let sweeper = cache
        .sweep_interval()
        .map(|interval| global_store().spawn_sweeper(interval, cache.max_items));

    let path = args.path.clone();
    let handle = use_cache(
        args.path.clone(),
        move |token: CancellationToken| {
            let client = client.clone();
            let path = path.clone();
            async move {
                tokio::select! {
                    _ = token.cancelled() => Err(anyhow::anyhow!("request for '{}' cancelled", path)),
                    result = client.get_json(&path) => result,
                }
            }
        },
        options,
    );

    let mut state = handle.settled().await;
    print_round(1, &state, ctx);

    for round in 2..=args.repeat.max(1) {
        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;

        let pending = handle.fetch();
        let published = handle.state();
        if published.loading && published.data.is_some() {
            // Stale data shown while the request runs.
            print_round(round, &published, ctx);
        }
        if let Err(e) = pending.await {
            tracing::debug!(error = %e, round, "read did not complete");
        }

        state = handle.state();
        print_round(round, &state, ctx);
    }

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    match (state.data, state.error) {
        (None, Some(e)) => Err(anyhow::Error::new(e).context(format!("failed to read '{}'", args.path))),
        _ => Ok(()),
    }
}

/// Print one line per observed state: time, round, phase, value.
fn print_round(round: u32, state: &FetchState<Value>, ctx: &Context) {
    let dim = Style::new().dim();
    let phase = state.phase();
    let styled = phase_style(phase).apply_to(phase_label(state));
    let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");

    let value = match &state.data {
        Some(data) if ctx.verbose => {
            serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
        }
        Some(data) => data.to_string(),
        None => "-".to_string(),
    };

    println!(
        "{} {} {:<10} {}",
        dim.apply_to(timestamp),
        dim.apply_to(format!("#{}", round)),
        styled,
        value
    );

    if let Some(ref e) = state.error {
        eprintln!("  {} {}", Style::new().red().apply_to("error:"), e);
    }
}

/// Label shown for a state; a revalidating read with stale data reads as `stale`.
fn phase_label(state: &FetchState<Value>) -> &'static str {
    match state.phase() {
        FetchPhase::Fetching if state.is_stale => "stale",
        FetchPhase::Fetching => "fetching",
        FetchPhase::Fresh => "fresh",
        FetchPhase::Stale => "stale",
        FetchPhase::Failed if state.data.is_some() => "error+stale",
        FetchPhase::Failed => "error",
        FetchPhase::Idle => "idle",
    }
}

fn phase_style(phase: FetchPhase) -> Style {
    match phase {
        FetchPhase::Fresh => Style::new().green(),
        FetchPhase::Stale | FetchPhase::Fetching => Style::new().yellow(),
        FetchPhase::Failed => Style::new().red(),
        FetchPhase::Idle => Style::new().dim(),
    }
}
