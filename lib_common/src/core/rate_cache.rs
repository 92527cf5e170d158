//! # Rate Cache
//!
//! Holds the most recent [`RateSample`] and refreshes it through the
//! [`FetchChain`] when it is older than the TTL.
//!
//! The cache mutex is held for the whole lookup, including a live fetch. Any
//! callers arriving while a refresh is in flight queue on the lock and then
//! reuse the outcome of that refresh, so a burst of lookups against a stale
//! cache costs exactly one chain invocation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::markets::fx::chain::{AllSourcesFailed, FetchChain};
use crate::markets::fx::sample::RateSample;
use crate::persist::state_file::StateWriter;

/// Default time a sample is served without refreshing.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

/// Lookup failures visible to callers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CacheError {
    /// No sample has ever been fetched and the refresh just failed.
    #[error("No rate available: {0}")]
    NoRateAvailable(#[from] AllSourcesFailed),
}

/// Result of a successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLookup {
    /// The served sample.
    pub sample: RateSample,
    /// `true` when the refresh attempted for this lookup failed and the
    /// previous sample is being served instead.
    pub stale: bool,
}

/// Counter snapshot returned by [`RateCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// `get_rate` calls, hit or miss.
    pub requests: u64,
    /// Successful refreshes.
    pub success: u64,
    /// Refreshes that exhausted every source.
    pub errors: u64,
    /// Whole seconds since the cache was created.
    pub uptime: u64,
}

/// State guarded by the cache mutex. Fields are always updated together.
#[derive(Debug, Default)]
struct CacheEntry {
    current: Option<RateSample>,
    last_refresh_at: Option<Instant>,
    last_failure: Option<AllSourcesFailed>,
}

impl CacheEntry {
    fn fresh(&self, ttl: Duration) -> Option<&RateSample> {
        match (&self.current, self.last_refresh_at) {
            (Some(sample), Some(at)) if at.elapsed() < ttl => Some(sample),
            _ => None,
        }
    }

    /// Outcome of the most recent refresh, as a lookup result.
    fn outcome(&self) -> Result<RateLookup, CacheError> {
        match (&self.current, &self.last_failure) {
            (Some(sample), failure) => Ok(RateLookup {
                sample: sample.clone(),
                stale: failure.is_some(),
            }),
            (None, Some(failure)) => Err(CacheError::NoRateAvailable(failure.clone())),
            (None, None) => Err(CacheError::NoRateAvailable(AllSourcesFailed { failures: vec![] })),
        }
    }
}

/// # Rate Cache
///
/// Shared between the request server and the periodic refresher, typically
/// behind an `Arc`.
pub struct RateCache {
    chain: FetchChain,
    ttl: Duration,
    writer: Option<StateWriter>,
    entry: Mutex<CacheEntry>,
    attempts: AtomicU64,
    requests: AtomicU64,
    success: AtomicU64,
    errors: AtomicU64,
    started_at: Instant,
}

impl RateCache {
    /// Creates an empty cache. The first lookup triggers a fetch.
    pub fn new(chain: FetchChain, ttl: Duration) -> Self {
        Self {
            chain,
            ttl,
            writer: None,
            entry: Mutex::new(CacheEntry::default()),
            attempts: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            success: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Mirrors every successful refresh to `writer`.
    pub fn with_state_writer(mut self, writer: StateWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// The configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached sample if it is younger than the TTL, otherwise
    /// refreshes it while holding the cache lock.
    ///
    /// When the refresh fails the previous sample is returned with
    /// `stale = true`; an error is returned only if there is no previous sample.
    pub async fn get_rate(&self) -> Result<RateLookup, CacheError> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let seen = self.attempts.load(Ordering::Acquire);
        let mut entry = self.entry.lock().await;

        if let Some(sample) = entry.fresh(self.ttl) {
            return Ok(RateLookup {
                sample: sample.clone(),
                stale: false,
            });
        }

        // A refresh finished while we waited for the lock: share its outcome.
        if self.attempts.load(Ordering::Acquire) != seen {
            return entry.outcome();
        }

        self.refresh_locked(&mut entry).await;
        entry.outcome()
    }

    /// Unconditionally refreshes the cache. Does not count as a request.
    pub async fn refresh_now(&self) -> Result<RateSample, AllSourcesFailed> {
        let mut entry = self.entry.lock().await;
        self.refresh_locked(&mut entry).await;
        match (&entry.last_failure, &entry.current) {
            (Some(failure), _) => Err(failure.clone()),
            (None, Some(sample)) => Ok(sample.clone()),
            (None, None) => Err(AllSourcesFailed { failures: vec![] }),
        }
    }

    /// Counter snapshot. Never takes the cache lock.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            requests: self.requests.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed().as_secs(),
        }
    }

    async fn refresh_locked(&self, entry: &mut CacheEntry) {
        match self.chain.fetch().await {
            Ok(sample) => {
                entry.current = Some(sample.clone());
                entry.last_refresh_at = Some(Instant::now());
                entry.last_failure = None;
                self.success.fetch_add(1, Ordering::Relaxed);
                info!(source = %sample.source, rate = sample.rate, "rate refreshed");

                // File I/O runs on the blocking pool; awaiting it under the lock
                // keeps publishes in refresh order.
                if let Some(writer) = self.writer.clone() {
                    match tokio::task::spawn_blocking(move || writer.publish(&sample)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(error = %e, "failed to publish rate state"),
                        Err(e) => warn!(error = %e, "publish task failed"),
                    }
                }
            }
            Err(failure) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    error = %failure,
                    has_prior = entry.current.is_some(),
                    "rate refresh failed"
                );
                entry.last_failure = Some(failure);
            }
        }
        self.attempts.fetch_add(1, Ordering::Release);
    }
}
