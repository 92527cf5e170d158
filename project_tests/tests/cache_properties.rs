//! Rate cache properties: single-flight refresh, freshness, stale serving,
//! mutual exclusion with the periodic refresher, state publishing.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::ScriptedFetcher;
use lib_common::core::{spawn_refresher, CacheError, RateCache, RefreshSchedule};
use lib_common::markets::fx::{FetchChain, FetchError, RateBand, RateFetcher};
use lib_common::persist::{read_state, StateWriter};
use tokio_util::sync::CancellationToken;

fn cache_over(fetchers: Vec<Arc<ScriptedFetcher>>, ttl: Duration) -> RateCache {
    let list: Vec<Arc<dyn RateFetcher>> = fetchers
        .into_iter()
        .map(|f| f as Arc<dyn RateFetcher>)
        .collect();
    RateCache::new(FetchChain::new(list, RateBand::default()), ttl)
}

#[tokio::test]
async fn concurrent_lookups_on_empty_cache_share_one_fetch() {
    let fetcher = Arc::new(ScriptedFetcher::always("primary", 1385.5).with_delay(Duration::from_millis(200)));
    let cache = Arc::new(cache_over(vec![fetcher.clone()], Duration::from_secs(10)));

    let lookups: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_rate().await })
        })
        .collect();

    let mut samples = Vec::new();
    for handle in lookups {
        samples.push(handle.await.unwrap().unwrap().sample);
    }

    assert_eq!(fetcher.calls(), 1);
    assert!(samples.iter().all(|s| *s == samples[0]));
    assert_eq!(cache.stats().requests, 16);
    assert_eq!(cache.stats().success, 1);
}

#[tokio::test]
async fn concurrent_lookups_share_one_failure() {
    let fetcher = Arc::new(ScriptedFetcher::failing("primary").with_delay(Duration::from_millis(200)));
    let cache = Arc::new(cache_over(vec![fetcher.clone()], Duration::from_secs(10)));

    let lookups: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_rate().await })
        })
        .collect();

    let mut errors = Vec::new();
    for handle in lookups {
        errors.push(handle.await.unwrap().unwrap_err());
    }

    assert_eq!(fetcher.calls(), 1);
    assert!(errors.iter().all(|e| *e == errors[0]));
    assert!(matches!(&errors[0], CacheError::NoRateAvailable(f) if f.failures.len() == 1));
    assert_eq!(cache.stats().errors, 1);
}

#[tokio::test]
async fn served_sample_age_stays_within_ttl_plus_fetch_latency() {
    let ttl = Duration::from_millis(100);
    let latency = Duration::from_millis(20);
    let fetcher = Arc::new(ScriptedFetcher::always("primary", 1380.0).with_delay(latency));
    let cache = cache_over(vec![fetcher.clone()], ttl);

    for _ in 0..15 {
        let lookup = cache.get_rate().await.unwrap();
        let age = lookup.sample.age_at(chrono::Utc::now()).to_std().unwrap();
        assert!(age <= ttl + latency + Duration::from_millis(50), "age {age:?}");
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    assert!(fetcher.calls() >= 3, "expired entries must be refreshed");
}

#[tokio::test]
async fn fallback_result_is_what_the_cache_serves() {
    let primary = Arc::new(ScriptedFetcher::new(
        "investing.com",
        vec![Err(FetchError::Extraction("blocked".into()))],
    ));
    let fallback = Arc::new(ScriptedFetcher::always("exchangerate-api", 1388.0));
    let cache = cache_over(vec![primary, fallback], Duration::from_secs(10));

    let lookup = cache.get_rate().await.unwrap();
    assert_eq!(lookup.sample.source, "exchangerate-api");
    assert_eq!(lookup.sample.rate, 1388.0);
    assert!(!lookup.stale);
}

#[tokio::test]
async fn failed_refresh_serves_previous_value_marked_stale() {
    let fetcher = Arc::new(ScriptedFetcher::new(
        "primary",
        vec![Ok(1384.0), Err(FetchError::Timeout(Duration::from_secs(15)))],
    ));
    let cache = cache_over(vec![fetcher.clone()], Duration::from_millis(10));

    let first = cache.get_rate().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = cache.get_rate().await.unwrap();

    assert!(second.stale);
    assert_eq!(second.sample, first.sample);
    assert_eq!(cache.stats().errors, 1);

    // Still stale: every expired lookup retries and fails again.
    let third = cache.get_rate().await.unwrap();
    assert!(third.stale);
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test]
async fn refresher_and_lookups_never_fetch_concurrently() {
    let fetcher = Arc::new(ScriptedFetcher::always("primary", 1380.0).with_delay(Duration::from_millis(15)));
    let ttl = Duration::from_millis(5);
    let cache = Arc::new(cache_over(vec![fetcher.clone()], ttl));
    let token = CancellationToken::new();
    let schedule = RefreshSchedule {
        min: Duration::from_millis(1),
        max: Duration::from_millis(3),
    };
    let refresher = spawn_refresher(Arc::clone(&cache), schedule, token.clone());

    // Every lookup waits out the TTL first, so lookups keep triggering their
    // own refreshes while the refresher is ticking.
    let lookups: Vec<_> = (0..6)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for _ in 0..5 {
                    tokio::time::sleep(ttl * 2).await;
                    cache.get_rate().await.unwrap();
                }
            })
        })
        .collect();
    for handle in lookups {
        handle.await.unwrap();
    }

    token.cancel();
    refresher.await.unwrap();

    assert!(fetcher.calls() >= 2, "calls = {}", fetcher.calls());
    assert_eq!(fetcher.max_in_flight(), 1);
    assert_eq!(cache.stats().success as usize, fetcher.calls());
    assert_eq!(cache.stats().requests, 30);
}

#[tokio::test]
async fn refresher_warms_cache_immediately_and_stops_on_cancel() {
    let fetcher = Arc::new(ScriptedFetcher::always("primary", 1380.0));
    let cache = Arc::new(cache_over(vec![fetcher.clone()], Duration::from_secs(60)));
    let token = CancellationToken::new();
    let refresher = spawn_refresher(Arc::clone(&cache), RefreshSchedule::default(), token.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(cache.stats().requests, 0);

    // Served from the warm cache.
    cache.get_rate().await.unwrap();
    assert_eq!(fetcher.calls(), 1);

    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), refresher)
        .await
        .expect("refresher must stop promptly")
        .unwrap();
}

#[tokio::test]
async fn successful_refresh_is_published() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("usdkrw_rate.json");
    let fetcher = Arc::new(ScriptedFetcher::always("exchangerate-api", 1386.75));
    let cache = cache_over(vec![fetcher], Duration::from_secs(10)).with_state_writer(StateWriter::new(&path));

    let lookup = cache.get_rate().await.unwrap();
    let state = read_state(&path).unwrap().expect("state file written");
    assert_eq!(state.rate, lookup.sample.rate);
    assert_eq!(state.source, "exchangerate-api");
}

#[tokio::test]
async fn publish_failure_does_not_fail_the_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing-dir").join("rate.json");
    let fetcher = Arc::new(ScriptedFetcher::always("primary", 1380.0));
    let cache = cache_over(vec![fetcher], Duration::from_secs(10)).with_state_writer(StateWriter::new(&path));

    assert!(cache.get_rate().await.is_ok());
    assert!(!path.exists());
}

#[tokio::test]
async fn back_to_back_refreshes_leave_the_latest_sample_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("usdkrw_rate.json");
    let fetcher = Arc::new(ScriptedFetcher::new(
        "primary",
        vec![Ok(1381.0), Ok(1382.0), Ok(1383.0)],
    ));
    let cache = cache_over(vec![fetcher], Duration::from_secs(10)).with_state_writer(StateWriter::new(&path));

    for expected in [1381.0, 1382.0, 1383.0] {
        let sample = cache.refresh_now().await.unwrap();
        assert_eq!(sample.rate, expected);
        // Published before refresh_now returns.
        assert_eq!(read_state(&path).unwrap().unwrap().rate, expected);
    }
}
