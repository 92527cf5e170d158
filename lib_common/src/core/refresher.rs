//! # Periodic Refresher
//!
//! Keeps the cache warm between lookups. Refreshes go through
//! [`RateCache::refresh_now`] and therefore take the same lock as
//! request-triggered refreshes; the two can never fetch at the same time.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::rate_cache::RateCache;

/// Bounds of the jittered sleep between refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSchedule {
    /// Shortest pause.
    pub min: Duration,
    /// Longest pause.
    pub max: Duration,
}

impl Default for RefreshSchedule {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(8),
            max: Duration::from_secs(13),
        }
    }
}

impl RefreshSchedule {
    /// A uniformly random pause in `[min, max]`.
    pub fn next_delay(&self) -> Duration {
        let lo = self.min.as_millis() as u64;
        let hi = (self.max.as_millis() as u64).max(lo);
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }
}

/// Spawns the refresh loop. It refreshes immediately, then after every
/// jittered pause, until `shutdown` is cancelled.
pub fn spawn_refresher(
    cache: Arc<RateCache>,
    schedule: RefreshSchedule,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(min = ?schedule.min, max = ?schedule.max, "periodic refresher started");
        loop {
            // An in-flight refresh is never interrupted.
            match cache.refresh_now().await {
                Ok(sample) => debug!(source = %sample.source, rate = sample.rate, "periodic refresh ok"),
                Err(e) => warn!(error = %e, "periodic refresh failed"),
            }

            let delay = schedule.next_delay();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("periodic refresher stopped");
    })
}
