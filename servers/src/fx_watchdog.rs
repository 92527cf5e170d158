//! # FX Rate Watchdog
//!
//! Independent supervisor for `server_fx`. Every check interval it looks for
//! the producer in the process table and reads the age of the state file it
//! publishes; a dead producer, or data stale for several checks in a row,
//! gets the producer killed and relaunched.
//!
//! Stopping the watchdog leaves the producer running.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use lib_common::loggers::init_tracing;
use lib_common::watchdog::{ScriptProcess, WatchdogSupervisor};

mod fx_logic;
use fx_logic::config;

#[tokio::main]
async fn main() -> Result<()> {
    fx_logic::load_dotenv();
    let settings = config::load_watchdog_settings()?;
    let _guard = init_tracing("fx_watchdog", &settings.log_dir, &settings.log_level)
        .context("failed to initialize logging")?;
    info!(?settings, "configuration loaded");

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        fx_logic::shutdown_signal().await;
        signal_token.cancel();
    });

    let process = ScriptProcess::new(settings.producer);
    let mut supervisor = WatchdogSupervisor::new(settings.watchdog, process);
    supervisor.run(token).await;

    info!(
        phase = ?supervisor.state().phase,
        failed_restarts = supervisor.state().failed_restarts,
        "Bye!"
    );
    Ok(())
}
