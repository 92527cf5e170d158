//! # Exchange Rate API Fetcher
//!
//! Fallback source: a public JSON API that publishes a table of rates against
//! one base currency. Less timely than the quote page but far more reliable.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;

use crate::markets::fx::fetcher::{FetchError, FetchResult, RateFetcher};
use crate::markets::fx::sample::RateSample;
use crate::retrieve::ky_http::{ApiClient, ApiClientOptions, RetrieveError};

/// Provenance tag of samples read from the fallback API.
pub const EXCHANGERATE_API_SOURCE: &str = "exchangerate-api";

const DEFAULT_API_URL: &str = "https://api.exchangerate-api.com/v4/";

/// Settings for [`ExchangeRateApiFetcher`].
#[derive(Debug, Clone)]
pub struct ApiFetcherConfig {
    /// Base URL of the API; `latest/<base>` is joined onto it.
    pub base_url: String,
    /// Base currency (e.g. `USD`).
    pub base_currency: String,
    /// Quote currency looked up in the `rates` table (e.g. `KRW`).
    pub quote_currency: String,
    /// Time budget for one fetch, including retries.
    pub timeout: Duration,
}

impl Default for ApiFetcherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            base_currency: "USD".to_string(),
            quote_currency: "KRW".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// The subset of the `latest/<base>` payload we read.
#[derive(Debug, Deserialize)]
pub struct LatestRates {
    /// Quote currency code -> units per one base unit.
    pub rates: HashMap<String, f64>,
}

impl LatestRates {
    /// Looks up one quote currency in the table.
    pub fn rate_for(&self, quote: &str) -> Result<f64, FetchError> {
        self.rates
            .get(quote)
            .copied()
            .ok_or_else(|| FetchError::Extraction(format!("no {} entry in rates table", quote)))
    }
}

/// Reads one cross rate from the public exchange-rate API.
pub struct ExchangeRateApiFetcher {
    client: ApiClient,
    path: String,
    quote: String,
    timeout: Duration,
}

impl ExchangeRateApiFetcher {
    /// Builds the fetcher; fails only if the base URL is invalid.
    pub fn new(config: ApiFetcherConfig) -> Result<Self, RetrieveError> {
        let client = ApiClient::with_options(
            &config.base_url,
            None,
            ApiClientOptions {
                // Leave room for one retry inside the fetcher's budget.
                timeout: config.timeout / 2,
                max_retries: 1,
                user_agent: Some(concat!("fx-rate-service/", env!("CARGO_PKG_VERSION")).to_string()),
            },
        )?;

        Ok(Self {
            client,
            path: format!("latest/{}", config.base_currency),
            quote: config.quote_currency,
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl RateFetcher for ExchangeRateApiFetcher {
    fn source(&self) -> &str {
        EXCHANGERATE_API_SOURCE
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self) -> FetchResult {
        let response = self
            .client
            .request::<LatestRates, ()>(Method::GET, &self.path, None, None)
            .await?;

        if !response.success {
            return Err(FetchError::Status(response.status));
        }

        let table = response
            .data
            .ok_or_else(|| FetchError::Extraction("empty response body".to_string()))?;
        let rate = table.rate_for(&self.quote)?;

        Ok(RateSample::now(rate, EXCHANGERATE_API_SOURCE))
    }
}
