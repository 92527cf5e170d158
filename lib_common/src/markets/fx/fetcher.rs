//! # Rate Fetcher Capability
//!
//! Every source of exchange rates, whether it scrapes a page or calls a JSON
//! API, is exposed to the rest of the system through [`RateFetcher`]. The
//! chain only ever sees this trait, so adding a source means adding an
//! implementation and registering it, never touching the chain's control flow.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::markets::fx::sample::RateSample;
use crate::retrieve::ky_http::RetrieveError;

/// Why a single fetcher failed to produce a usable sample.
///
/// Always recoverable: the chain logs it and moves on to the next fetcher.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// Transport-level failure (DNS, TLS, connection reset, ...).
    #[error("http error: {0}")]
    Http(String),

    /// The source answered with a non-2xx status.
    #[error("unexpected http status {0}")]
    Status(u16),

    /// The fetcher did not finish within its time budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The response arrived but no rate could be read from it.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A number was read but it is outside the plausible band.
    #[error("implausible rate {rate} (expected {min} < rate < {max})")]
    Implausible {
        /// The rejected value.
        rate: f64,
        /// Band lower bound.
        min: f64,
        /// Band upper bound.
        max: f64,
    },
}

impl From<RetrieveError> for FetchError {
    fn from(err: RetrieveError) -> Self {
        match err {
            RetrieveError::Body(e) => FetchError::Extraction(e.to_string()),
            other => FetchError::Http(other.to_string()),
        }
    }
}

/// The result every fetcher returns.
pub type FetchResult = Result<RateSample, FetchError>;

/// # Rate Fetcher
///
/// A single, independent source of exchange rates. Implementations hold no
/// state shared with other fetchers and each call is self-contained.
#[async_trait]
pub trait RateFetcher: Send + Sync {
    /// Provenance tag stamped on produced samples and used in diagnostics.
    fn source(&self) -> &str;

    /// Upper bound on how long one `fetch` may take.
    fn timeout(&self) -> Duration;

    /// Performs one fetch attempt.
    async fn fetch(&self) -> FetchResult;
}
