//! # Fetch Chain
//!
//! An ordered list of [`RateFetcher`]s tried strictly in sequence. The first
//! fetcher that returns a value inside the [`RateBand`] wins; every other
//! outcome (error, timeout, implausible value) is logged and the chain moves
//! on. Later fetchers are never started once one has succeeded.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::markets::fx::fetcher::{FetchError, RateFetcher};
use crate::markets::fx::sample::{RateBand, RateSample};

/// One fetcher's failure, as recorded by the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFailure {
    /// Provenance tag of the failed fetcher.
    pub source: String,
    /// What went wrong.
    pub error: FetchError,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.error)
    }
}

/// Every fetcher in the chain failed (or the chain is empty).
#[derive(Debug, Clone, Error, PartialEq)]
#[error("all rate sources failed: [{}]", join_failures(.failures))]
pub struct AllSourcesFailed {
    /// Failures in the order the fetchers were tried.
    pub failures: Vec<SourceFailure>,
}

fn join_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// # Fetch Chain
///
/// Holds the fetchers in priority order together with the band used to
/// reject garbage values.
#[derive(Clone)]
pub struct FetchChain {
    fetchers: Vec<Arc<dyn RateFetcher>>,
    band: RateBand,
}

impl FetchChain {
    /// Creates a chain trying `fetchers` in the given order.
    pub fn new(fetchers: Vec<Arc<dyn RateFetcher>>, band: RateBand) -> Self {
        Self { fetchers, band }
    }

    /// The plausibility band applied to every fetched value.
    pub fn band(&self) -> RateBand {
        self.band
    }

    /// Provenance tags in priority order.
    pub fn sources(&self) -> Vec<String> {
        self.fetchers.iter().map(|f| f.source().to_string()).collect()
    }

    /// Runs the fetchers in order and returns the first plausible sample.
    pub async fn fetch(&self) -> Result<RateSample, AllSourcesFailed> {
        let mut failures = Vec::with_capacity(self.fetchers.len());

        for fetcher in &self.fetchers {
            let source = fetcher.source().to_string();
            let budget = fetcher.timeout();

            let outcome = match tokio::time::timeout(budget, fetcher.fetch()).await {
                Ok(Ok(sample)) if self.band.contains(sample.rate) => Ok(sample),
                Ok(Ok(sample)) => Err(FetchError::Implausible {
                    rate: sample.rate,
                    min: self.band.min,
                    max: self.band.max,
                }),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(FetchError::Timeout(budget)),
            };

            match outcome {
                Ok(sample) => {
                    debug!(source = %source, rate = sample.rate, "rate fetched");
                    return Ok(sample);
                }
                Err(error) => {
                    warn!(source = %source, error = %error, "rate source failed, trying next");
                    failures.push(SourceFailure { source, error });
                }
            }
        }

        Err(AllSourcesFailed { failures })
    }
}
