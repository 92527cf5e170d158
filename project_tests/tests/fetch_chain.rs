//! Fallback chain behaviour: ordering, band validation, per-source timeouts.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::ScriptedFetcher;
use lib_common::markets::fx::{FetchChain, FetchError, RateBand, RateFetcher};

fn chain_of(fetchers: &[Arc<ScriptedFetcher>]) -> FetchChain {
    let list: Vec<Arc<dyn RateFetcher>> = fetchers
        .iter()
        .map(|f| Arc::clone(f) as Arc<dyn RateFetcher>)
        .collect();
    FetchChain::new(list, RateBand::default())
}

#[tokio::test]
async fn band_edges_are_rejected_and_chain_moves_on() {
    for rejected in [999.0, 1000.0, 2000.0, 2001.0, f64::NAN] {
        let primary = Arc::new(ScriptedFetcher::always("primary", rejected));
        let fallback = Arc::new(ScriptedFetcher::always("fallback", 1384.0));
        let sample = chain_of(&[primary.clone(), fallback.clone()]).fetch().await.unwrap();
        assert_eq!(sample.source, "fallback", "{rejected} should have been rejected");
        assert_eq!(fallback.calls(), 1);
    }
}

#[tokio::test]
async fn values_just_inside_the_band_are_accepted() {
    for accepted in [1000.01, 1999.99] {
        let primary = Arc::new(ScriptedFetcher::always("primary", accepted));
        let fallback = Arc::new(ScriptedFetcher::always("fallback", 1384.0));
        let sample = chain_of(&[primary, fallback.clone()]).fetch().await.unwrap();
        assert_eq!(sample.source, "primary");
        assert_eq!(sample.rate, accepted);
        assert_eq!(fallback.calls(), 0, "fallback must not run after a success");
    }
}

#[tokio::test]
async fn failing_primary_falls_back_with_fallback_tag() {
    let primary = Arc::new(ScriptedFetcher::new(
        "investing.com",
        vec![Err(FetchError::Extraction("no price element".into()))],
    ));
    let fallback = Arc::new(ScriptedFetcher::always("exchangerate-api", 1391.2));
    let sample = chain_of(&[primary.clone(), fallback]).fetch().await.unwrap();
    assert_eq!(sample.source, "exchangerate-api");
    assert_eq!(sample.rate, 1391.2);
    assert_eq!(primary.calls(), 1);
}

#[tokio::test]
async fn all_failures_are_reported_in_order() {
    let first = Arc::new(ScriptedFetcher::new("first", vec![Err(FetchError::Http("reset".into()))]));
    let second = Arc::new(ScriptedFetcher::always("second", 5.0));
    let err = chain_of(&[first, second]).fetch().await.unwrap_err();

    assert_eq!(err.failures.len(), 2);
    assert_eq!(err.failures[0].source, "first");
    assert_eq!(err.failures[0].error, FetchError::Http("reset".into()));
    assert_eq!(err.failures[1].source, "second");
    assert!(matches!(err.failures[1].error, FetchError::Implausible { rate, .. } if rate == 5.0));
}

#[tokio::test]
async fn hung_fetcher_costs_only_its_timeout() {
    let hung = Arc::new(
        ScriptedFetcher::always("hung", 1380.0)
            .with_delay(Duration::from_secs(30))
            .with_timeout(Duration::from_millis(50)),
    );
    let fallback = Arc::new(ScriptedFetcher::always("fallback", 1382.0));

    let started = std::time::Instant::now();
    let sample = chain_of(&[hung, fallback]).fetch().await.unwrap();
    assert_eq!(sample.source, "fallback");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn timeout_is_recorded_as_such() {
    let hung = Arc::new(
        ScriptedFetcher::always("hung", 1380.0)
            .with_delay(Duration::from_secs(30))
            .with_timeout(Duration::from_millis(20)),
    );
    let err = chain_of(&[hung]).fetch().await.unwrap_err();
    assert_eq!(err.failures[0].error, FetchError::Timeout(Duration::from_millis(20)));
}
