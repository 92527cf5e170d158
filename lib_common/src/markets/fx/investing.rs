//! # Quote Page Fetcher
//!
//! Primary source: the public quote page of the currency pair. The page is
//! fetched with browser-mimicking headers and the last price is read from the
//! markup. Nothing here tries to defeat bot protection; a blocked or
//! restructured page is just a [`FetchError`] and the chain falls through to
//! the next source.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::markets::fx::fetcher::{FetchError, FetchResult, RateFetcher};
use crate::markets::fx::sample::RateSample;
use crate::retrieve::ky_http::{ApiClient, ApiClientOptions, RetrieveError};

/// Provenance tag of samples read from the quote page.
pub const INVESTING_SOURCE: &str = "investing.com";

const DEFAULT_PAGE_URL: &str = "https://www.investing.com/currencies/usd-krw";
const USD_KRW_INSTRUMENT_ID: u32 = 650;

/// Settings for [`InvestingPageFetcher`].
#[derive(Debug, Clone)]
pub struct PageFetcherConfig {
    /// Absolute URL of the quote page.
    pub url: String,
    /// Legacy numeric instrument id used in `pid-<id>-last` class names.
    pub instrument_id: Option<u32>,
    /// Time budget for one fetch, including retries.
    pub timeout: Duration,
}

impl Default for PageFetcherConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_PAGE_URL.to_string(),
            instrument_id: Some(USD_KRW_INSTRUMENT_ID),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Scrapes the last traded price off the quote page.
pub struct InvestingPageFetcher {
    client: ApiClient,
    patterns: Vec<Regex>,
    timeout: Duration,
}

impl InvestingPageFetcher {
    /// Builds the fetcher; fails only if the page URL is invalid.
    pub fn new(config: PageFetcherConfig) -> Result<Self, RetrieveError> {
        let client = ApiClient::with_options(
            &config.url,
            None,
            ApiClientOptions {
                timeout: config.timeout,
                // One page load per attempt; the chain and the refresher retry for us.
                max_retries: 0,
                user_agent: None,
            },
        )?;

        Ok(Self {
            client,
            patterns: price_patterns(config.instrument_id),
            timeout: config.timeout,
        })
    }

    /// Internal helper to construct the browser-mimic headers
    fn browser_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();

        let header_list = [
            ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
            ("accept-language", "en-US,en;q=0.9,ko;q=0.8"),
            ("cache-control", "no-cache"),
            ("pragma", "no-cache"),
            ("sec-ch-ua", "\"Google Chrome\";v=\"135\", \"Not-A.Brand\";v=\"8\", \"Chromium\";v=\"135\""),
            ("sec-ch-ua-mobile", "?0"),
            ("sec-ch-ua-platform", "\"Windows\""),
            ("sec-fetch-dest", "document"),
            ("sec-fetch-mode", "navigate"),
            ("sec-fetch-site", "none"),
            ("upgrade-insecure-requests", "1"),
            ("user-agent", "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36"),
        ];

        for (name, value) in header_list {
            if let (Ok(h_name), Ok(h_value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                headers.insert(h_name, h_value);
            }
        }

        headers
    }

    /// Reads the last price out of the page markup, trying each known
    /// element in order.
    pub fn extract_rate(&self, html: &str) -> Option<f64> {
        extract_with(&self.patterns, html)
    }
}

fn price_patterns(instrument_id: Option<u32>) -> Vec<Regex> {
    let number = r"([0-9][0-9,]*(?:\.[0-9]+)?)";
    let mut sources = vec![format!(
        r#"data-test="instrument-price-last"[^>]*>\s*{number}\s*<"#
    )];
    if let Some(id) = instrument_id {
        sources.push(format!(r#"class="[^"]*\bpid-{id}-last\b[^"]*"[^>]*>\s*{number}\s*<"#));
    }
    sources.iter().filter_map(|s| Regex::new(s).ok()).collect()
}

fn extract_with(patterns: &[Regex], html: &str) -> Option<f64> {
    patterns.iter().enumerate().find_map(|(idx, re)| {
        let raw = re.captures(html)?.get(1)?.as_str();
        let value = raw.replace(',', "").parse::<f64>().ok()?;
        debug!(pattern = idx, value, "page price extracted");
        Some(value)
    })
}

#[async_trait]
impl RateFetcher for InvestingPageFetcher {
    fn source(&self) -> &str {
        INVESTING_SOURCE
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self) -> FetchResult {
        let response = self.client.get_text("", Some(Self::browser_headers())).await?;
        if !response.success {
            return Err(FetchError::Status(response.status));
        }

        let html = response.data.unwrap_or_default();
        let rate = self.extract_rate(&html).ok_or_else(|| {
            FetchError::Extraction(format!("no price element in {} byte page", html.len()))
        })?;

        Ok(RateSample::now(rate, INVESTING_SOURCE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> InvestingPageFetcher {
        InvestingPageFetcher::new(PageFetcherConfig::default()).unwrap()
    }

    #[test]
    fn extracts_from_data_test_attribute() {
        let html = r#"<div><span class="text-5xl" data-test="instrument-price-last">1,385.20</span></div>"#;
        assert_eq!(fetcher().extract_rate(html), Some(1385.20));
    }

    #[test]
    fn falls_back_to_legacy_pid_class() {
        let html = r#"<span class="arial_26 inlineblock pid-650-last" id="last_last" dir="ltr">1,391.05</span>"#;
        assert_eq!(fetcher().extract_rate(html), Some(1391.05));
    }

    #[test]
    fn missing_element_yields_none() {
        let html = "<html><body>Access denied</body></html>";
        assert_eq!(fetcher().extract_rate(html), None);
    }

    #[test]
    fn whitespace_around_price_is_tolerated() {
        let html = "<span data-test=\"instrument-price-last\">\n  1,402 \n</span>";
        assert_eq!(fetcher().extract_rate(html), Some(1402.0));
    }
}
