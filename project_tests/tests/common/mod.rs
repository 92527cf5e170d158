//! Scripted fetchers and fake processes shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lib_common::markets::fx::{FetchError, FetchResult, RateFetcher, RateSample};
use lib_common::persist::PersistedState;
use lib_common::watchdog::ProcessHandle;

/// A fetcher that replays a script of outcomes. The last step repeats once
/// the script is exhausted.
pub struct ScriptedFetcher {
    name: String,
    timeout: Duration,
    delay: Duration,
    steps: Mutex<VecDeque<Result<f64, FetchError>>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(name: &str, steps: Vec<Result<f64, FetchError>>) -> Self {
        Self {
            name: name.to_string(),
            timeout: Duration::from_secs(5),
            delay: Duration::ZERO,
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn always(name: &str, rate: f64) -> Self {
        Self::new(name, vec![Ok(rate)])
    }

    pub fn failing(name: &str) -> Self {
        Self::new(name, vec![Err(FetchError::Status(503))])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Result<f64, FetchError> {
        let mut steps = self.steps.lock().unwrap();
        let step = if steps.len() > 1 { steps.pop_front() } else { steps.front().cloned() };
        step.unwrap_or_else(|| Err(FetchError::Http("empty script".into())))
    }
}

#[async_trait]
impl RateFetcher for ScriptedFetcher {
    fn source(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self) -> FetchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let step = self.next_step();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        step.map(|rate| RateSample::now(rate, self.name.clone()))
    }
}

/// Observable state of a [`FakeProcess`].
#[derive(Debug, Default)]
pub struct FakeProcessState {
    pub alive: bool,
    /// Whether a spawned producer stays up.
    pub spawn_succeeds: bool,
    pub spawns: usize,
    pub terminations: usize,
}

/// In-memory [`ProcessHandle`]; clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeProcess(pub Arc<Mutex<FakeProcessState>>);

impl FakeProcess {
    pub fn new(alive: bool, spawn_succeeds: bool) -> Self {
        Self(Arc::new(Mutex::new(FakeProcessState {
            alive,
            spawn_succeeds,
            ..Default::default()
        })))
    }

    pub fn spawns(&self) -> usize {
        self.0.lock().unwrap().spawns
    }

    pub fn terminations(&self) -> usize {
        self.0.lock().unwrap().terminations
    }

    pub fn set_alive(&self, alive: bool) {
        self.0.lock().unwrap().alive = alive;
    }
}

impl ProcessHandle for FakeProcess {
    fn is_alive(&mut self) -> bool {
        self.0.lock().unwrap().alive
    }

    fn terminate(&mut self) -> usize {
        let mut state = self.0.lock().unwrap();
        state.terminations += 1;
        let killed = usize::from(state.alive);
        state.alive = false;
        killed
    }

    fn spawn(&mut self) -> io::Result<()> {
        let mut state = self.0.lock().unwrap();
        state.spawns += 1;
        state.alive = state.spawn_succeeds;
        Ok(())
    }
}

/// Writes a state document observed `age` ago.
pub fn write_state_with_age(path: &Path, age: Duration) {
    let observed = chrono::Utc::now() - chrono::Duration::from_std(age).unwrap();
    let state = PersistedState {
        rate: 1385.0,
        source: "investing.com".to_string(),
        timestamp: observed.to_rfc3339(),
        timestamp_unix: observed.timestamp_micros() as f64 / 1_000_000.0,
    };
    std::fs::write(path, serde_json::to_vec(&state).unwrap()).unwrap();
}
