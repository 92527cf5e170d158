//! # FX Rate Service
//!
//! Keeps the USD/KRW rate warm in memory and serves it over a one-line TCP
//! protocol (`GET_RATE`, `STATS`, `SHUTDOWN`).
//!
//! ## Functionality:
//! - **Fetch chain**: the public quote page first, the exchange-rate API as
//!   fallback, every value checked against the plausibility band.
//! - **Rate cache**: serves the last sample for the TTL and refreshes inline
//!   when it expires; concurrent callers share one refresh.
//! - **Periodic refresher**: jittered background refresh keeping the cache
//!   and the state file warm for the watchdog.
//! - **Graceful shutdown**: SIGINT, SIGTERM or the `SHUTDOWN` command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_graceful::Shutdown;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lib_common::core::{spawn_refresher, RateCache, RequestServer, ServerOptions};
use lib_common::loggers::init_tracing;
use lib_common::markets::fx::{ExchangeRateApiFetcher, FetchChain, InvestingPageFetcher, RateFetcher};
use lib_common::persist::StateWriter;

mod fx_logic;
use fx_logic::config;

#[tokio::main]
async fn main() -> Result<()> {
    fx_logic::load_dotenv();
    let settings = config::load_service_settings()?;
    let _guard = init_tracing("server_fx", &settings.log_dir, &settings.log_level)
        .context("failed to initialize logging")?;
    info!(?settings, "configuration loaded");

    // 1. Sources in priority order
    let fetchers: Vec<Arc<dyn RateFetcher>> = vec![
        Arc::new(InvestingPageFetcher::new(settings.page.clone()).context("invalid page url")?),
        Arc::new(ExchangeRateApiFetcher::new(settings.api.clone()).context("invalid api url")?),
    ];
    let chain = FetchChain::new(fetchers, settings.band);
    info!(sources = ?chain.sources(), band = ?settings.band, "fetch chain ready");

    // 2. Cache mirrored to the state file
    let cache = Arc::new(
        RateCache::new(chain, settings.ttl).with_state_writer(StateWriter::new(&settings.state_file)),
    );

    // 3. Listener
    let listener = TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen_addr))?;

    // 4. Signals and the SHUTDOWN command share one token
    let token = CancellationToken::new();
    let signal_token = token.clone();
    let shutdown = Shutdown::new(async move {
        tokio::select! {
            _ = fx_logic::shutdown_signal() => {}
            _ = signal_token.cancelled() => info!("shutdown requested over the protocol"),
        }
        signal_token.cancel();
    });

    let refresher = spawn_refresher(Arc::clone(&cache), settings.refresh, token.clone());
    shutdown.spawn_task_fn(move |guard| async move {
        let _guard = guard;
        if let Err(e) = refresher.await {
            error!("refresher task failed: {}", e);
        }
    });

    let server = RequestServer::new(Arc::clone(&cache), token.clone(), ServerOptions::default());
    let server_token = token.clone();
    shutdown.spawn_task_fn(move |guard| async move {
        let _guard = guard;
        if let Err(e) = server.serve(listener).await {
            error!("request server failed: {}", e);
            server_token.cancel();
        }
    });

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            info!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    let stats = cache.stats();
    info!(
        requests = stats.requests,
        success = stats.success,
        errors = stats.errors,
        uptime = stats.uptime,
        "Bye!"
    );
    Ok(())
}
