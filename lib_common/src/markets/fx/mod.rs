//! # Foreign Exchange Rates
//!
//! Sources and data types for a single currency pair (USD/KRW by default).
//!
//! - **`sample`**: the [`RateSample`] value and the plausibility [`RateBand`].
//! - **`fetcher`**: the [`RateFetcher`] capability and [`FetchError`].
//! - **`investing`**: primary source, scrapes the public quote page.
//! - **`exchangerate_api`**: fallback source, a public JSON rates API.
//! - **`chain`**: [`FetchChain`], ordered fallback across fetchers.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Ordered fallback across fetchers.
pub mod chain;
/// Fallback JSON API source.
pub mod exchangerate_api;
/// The fetcher capability.
pub mod fetcher;
/// Primary quote page source.
pub mod investing;
/// Rate samples and bands.
pub mod sample;

pub use chain::{AllSourcesFailed, FetchChain, SourceFailure};
pub use exchangerate_api::{ApiFetcherConfig, ExchangeRateApiFetcher, EXCHANGERATE_API_SOURCE};
pub use fetcher::{FetchError, FetchResult, RateFetcher};
pub use investing::{InvestingPageFetcher, PageFetcherConfig, INVESTING_SOURCE};
pub use sample::{RateBand, RateSample};
