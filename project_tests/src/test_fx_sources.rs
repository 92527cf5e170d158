//! # FX Sources Live Data Test
//!
//! Queries each rate source once, then the whole fallback chain, and prints
//! what came back. Needs network access; meant for manual checks after a
//! source changes its markup or payload.

use std::sync::Arc;

use lib_common::markets::fx::{
    ApiFetcherConfig, ExchangeRateApiFetcher, FetchChain, InvestingPageFetcher, PageFetcherConfig,
    RateBand, RateFetcher,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fetchers: Vec<Arc<dyn RateFetcher>> = vec![
        Arc::new(InvestingPageFetcher::new(PageFetcherConfig::default())?),
        Arc::new(ExchangeRateApiFetcher::new(ApiFetcherConfig::default())?),
    ];

    for fetcher in &fetchers {
        println!("[*] Requesting {} ...", fetcher.source());
        match tokio::time::timeout(fetcher.timeout(), fetcher.fetch()).await {
            Ok(Ok(sample)) => println!("[SUCCESS] {}", serde_json::to_string(&sample)?),
            Ok(Err(e)) => println!("[ERROR] {}", e),
            Err(_) => println!("[ERROR] timed out after {:?}", fetcher.timeout()),
        }
    }

    let chain = FetchChain::new(fetchers, RateBand::default());
    println!("\n[*] Running chain {:?} ...", chain.sources());
    match chain.fetch().await {
        Ok(sample) => {
            println!("-----------------------------------------------");
            println!("{}", serde_json::to_string_pretty(&sample)?);
            println!("-----------------------------------------------");
        }
        Err(e) => {
            eprintln!("\n[ERROR] Chain exhausted:");
            eprintln!(">>> {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
