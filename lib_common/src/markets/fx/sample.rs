//! # Rate Samples and Plausibility Bands
//!
//! A [`RateSample`] is the only unit of data that flows through the FX
//! pipeline. It is produced by a successful fetch, copied out of the cache,
//! mirrored to disk and served over the lookup protocol, but never edited:
//! a newer sample supersedes an older one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed exchange rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSample {
    /// Quote currency units per one unit of base currency (e.g. KRW per USD).
    pub rate: f64,
    /// Provenance tag of the fetcher that produced the value.
    pub source: String,
    /// Wall-clock time the value was observed.
    pub observed_at: DateTime<Utc>,
}

impl RateSample {
    /// Builds a sample observed right now.
    pub fn now(rate: f64, source: impl Into<String>) -> Self {
        Self {
            rate,
            source: source.into(),
            observed_at: Utc::now(),
        }
    }

    /// Age of the sample relative to `now`; future timestamps count as zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.observed_at).max(chrono::Duration::zero())
    }
}

/// # Rate Band
///
/// The open interval `(min, max)` a fetched value must fall in to be
/// accepted. Anything outside it, including the bounds themselves, is
/// treated as an extraction error rather than a real quote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateBand {
    /// Exclusive lower bound.
    pub min: f64,
    /// Exclusive upper bound.
    pub max: f64,
}

impl RateBand {
    /// Creates a band; `None` when the bounds are not finite or `min >= max`.
    pub fn new(min: f64, max: f64) -> Option<Self> {
        (min.is_finite() && max.is_finite() && min < max).then_some(Self { min, max })
    }

    /// `true` when `rate` is a finite number strictly inside the band.
    pub fn contains(&self, rate: f64) -> bool {
        rate.is_finite() && rate > self.min && rate < self.max
    }
}

impl Default for RateBand {
    /// The USD/KRW band.
    fn default() -> Self {
        Self { min: 1000.0, max: 2000.0 }
    }
}
