//! # Watchdog Supervisor
//!
//! Periodically checks that the producer is running and that the state file
//! it publishes is recent, and restarts the producer when either is not the
//! case.
//!
//! A dead producer is restarted at once. Stale data is only acted on after
//! `stale_threshold` consecutive stale checks, so one slow page load does not
//! cost a restart. Restarts that leave the producer dead push the next
//! attempt out with an exponential cooldown.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::persist::state_file::read_state;
use crate::watchdog::process::ProcessHandle;

/// Phase of the supervision state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogPhase {
    /// Producer alive, data fresh.
    Healthy,
    /// Something is off but no restart is due yet (or it is deferred).
    Degraded,
    /// A restart is being carried out.
    Restarting,
}

/// What the state file says about data age.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Freshness {
    /// Age within the limit.
    Fresh(Duration),
    /// Age beyond the limit.
    Stale(Duration),
    /// No readable state file.
    Missing,
}

/// A fault observed by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SupervisorFault {
    /// No producer process was found.
    #[error("producer process is not running")]
    ProducerDead,

    /// The data stayed stale for `checks` consecutive checks.
    #[error("data stale for {checks} consecutive checks (age {age:?})")]
    DataStale {
        /// Consecutive stale checks observed.
        checks: u32,
        /// Last observed age; `None` when the state file was missing.
        age: Option<Duration>,
    },
}

/// Outcome of assessing one check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Nothing to do.
    Healthy,
    /// Stale, below the restart threshold.
    Degraded {
        /// Consecutive stale checks so far.
        checks: u32,
    },
    /// A restart is due.
    Restart(SupervisorFault),
    /// A restart is due but held back by the cooldown.
    Deferred {
        /// The fault that would have triggered it.
        fault: SupervisorFault,
        /// Time left on the cooldown.
        remaining: Duration,
    },
}

/// Process-local supervision state.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchdogState {
    /// Stale observations in a row while the producer was alive.
    pub consecutive_stale_checks: u32,
    /// Result of the last liveness query.
    pub last_known_producer_alive: bool,
    /// Current phase.
    pub phase: WatchdogPhase,
    /// Restarts in a row that left the producer dead.
    pub failed_restarts: u32,
    /// No restart before this instant.
    pub cooldown_until: Option<Instant>,
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self {
            consecutive_stale_checks: 0,
            last_known_producer_alive: false,
            phase: WatchdogPhase::Healthy,
            failed_restarts: 0,
            cooldown_until: None,
        }
    }
}

/// Cooldown applied after failed restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Cooldown after the first failed restart.
    pub backoff_base: Duration,
    /// Cooldown ceiling.
    pub backoff_max: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(10),
            backoff_max: Duration::from_secs(300),
        }
    }
}

impl RestartPolicy {
    /// Cooldown after `failed` consecutive failed restarts (`failed >= 1`).
    pub fn cooldown(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(20);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// State file published by the producer.
    pub state_file: PathBuf,
    /// Oldest acceptable data.
    pub max_age: Duration,
    /// Pause between checks.
    pub check_interval: Duration,
    /// Consecutive stale checks that trigger a restart.
    pub stale_threshold: u32,
    /// Pause between terminate and spawn.
    pub settle: Duration,
    /// Pause between spawn and the liveness re-check.
    pub startup_grace: Duration,
    /// Cooldown after failed restarts.
    pub policy: RestartPolicy,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from(crate::persist::state_file::DEFAULT_STATE_FILE),
            max_age: Duration::from_secs(30),
            check_interval: Duration::from_secs(10),
            stale_threshold: 3,
            settle: Duration::from_secs(2),
            startup_grace: Duration::from_secs(5),
            policy: RestartPolicy::default(),
        }
    }
}

/// # Watchdog Supervisor
///
/// Sequential by construction: one check at a time, restarts included.
pub struct WatchdogSupervisor<P: ProcessHandle> {
    config: WatchdogConfig,
    process: P,
    state: WatchdogState,
}

impl<P: ProcessHandle> WatchdogSupervisor<P> {
    /// Creates a supervisor in the `Healthy` phase.
    pub fn new(config: WatchdogConfig, process: P) -> Self {
        Self {
            config,
            process,
            state: WatchdogState::default(),
        }
    }

    /// Current supervision state.
    pub fn state(&self) -> &WatchdogState {
        &self.state
    }

    /// The supervised process handle.
    pub fn process(&self) -> &P {
        &self.process
    }

    /// Reads the state file and classifies its age.
    pub fn observe_freshness(&self) -> Freshness {
        match read_state(&self.config.state_file) {
            Ok(Some(state)) => {
                let age = Duration::try_from_secs_f64(state.age(Utc::now())).unwrap_or(Duration::MAX);
                if age <= self.config.max_age {
                    Freshness::Fresh(age)
                } else {
                    Freshness::Stale(age)
                }
            }
            Ok(None) => Freshness::Missing,
            Err(e) => {
                warn!(error = %e, "state file unreadable");
                Freshness::Missing
            }
        }
    }

    /// Applies one observation to the state machine. Performs no I/O.
    pub fn assess(&mut self, alive: bool, freshness: Freshness) -> Verdict {
        let state = &mut self.state;
        state.last_known_producer_alive = alive;

        let fault = if !alive {
            SupervisorFault::ProducerDead
        } else {
            let age = match freshness {
                Freshness::Fresh(_) => {
                    state.consecutive_stale_checks = 0;
                    state.failed_restarts = 0;
                    state.cooldown_until = None;
                    state.phase = WatchdogPhase::Healthy;
                    return Verdict::Healthy;
                }
                Freshness::Stale(age) => Some(age),
                Freshness::Missing => None,
            };

            state.consecutive_stale_checks += 1;
            let checks = state.consecutive_stale_checks;
            if checks < self.config.stale_threshold {
                state.phase = WatchdogPhase::Degraded;
                return Verdict::Degraded { checks };
            }
            SupervisorFault::DataStale { checks, age }
        };

        if let Some(until) = state.cooldown_until {
            let now = Instant::now();
            if now < until {
                state.phase = WatchdogPhase::Degraded;
                return Verdict::Deferred {
                    fault,
                    remaining: until - now,
                };
            }
        }

        state.phase = WatchdogPhase::Restarting;
        Verdict::Restart(fault)
    }

    /// One supervision cycle: observe, assess, and restart if due.
    pub async fn check_once(&mut self) -> Verdict {
        let alive = self.process.is_alive();
        let freshness = self.observe_freshness();
        let verdict = self.assess(alive, freshness);

        match verdict {
            Verdict::Healthy => debug!(?freshness, "producer healthy"),
            Verdict::Degraded { checks } => warn!(
                checks,
                threshold = self.config.stale_threshold,
                ?freshness,
                "data stale, waiting for more evidence"
            ),
            Verdict::Deferred { fault, remaining } => warn!(
                %fault,
                ?remaining,
                failed_restarts = self.state.failed_restarts,
                "restart suppressed by cooldown"
            ),
            Verdict::Restart(fault) => {
                warn!(%fault, "restarting producer");
                self.restart().await;
            }
        }
        verdict
    }

    /// Terminate, settle, spawn, wait, re-check.
    async fn restart(&mut self) {
        // 1. Stop whatever is left of the old producer
        let killed = self.process.terminate();
        tokio::time::sleep(self.config.settle).await;

        // 2. Launch and give it time to come up
        let spawned = self.process.spawn();
        if let Err(e) = &spawned {
            error!(error = %e, "failed to launch producer");
        }
        tokio::time::sleep(self.config.startup_grace).await;

        // 3. Verify
        let alive = spawned.is_ok() && self.process.is_alive();
        self.state.last_known_producer_alive = alive;
        self.state.consecutive_stale_checks = 0;
        self.state.phase = WatchdogPhase::Degraded;

        if alive {
            self.state.failed_restarts = 0;
            self.state.cooldown_until = None;
            info!(killed, "producer restarted");
        } else {
            self.state.failed_restarts += 1;
            let cooldown = self.config.policy.cooldown(self.state.failed_restarts);
            self.state.cooldown_until = Some(Instant::now() + cooldown);
            error!(
                killed,
                failed_restarts = self.state.failed_restarts,
                ?cooldown,
                "producer not running after restart"
            );
        }
    }

    /// Checks every `check_interval` until `shutdown` is cancelled. The
    /// producer is left running on exit.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            state_file = %self.config.state_file.display(),
            max_age = ?self.config.max_age,
            interval = ?self.config.check_interval,
            threshold = self.config.stale_threshold,
            "watchdog started"
        );
        loop {
            self.check_once().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.check_interval) => {}
            }
        }
        info!("watchdog stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert;

    impl ProcessHandle for Inert {
        fn is_alive(&mut self) -> bool {
            true
        }
        fn terminate(&mut self) -> usize {
            0
        }
        fn spawn(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn supervisor() -> WatchdogSupervisor<Inert> {
        WatchdogSupervisor::new(WatchdogConfig::default(), Inert)
    }

    #[test]
    fn cooldown_doubles_and_caps() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.cooldown(1), Duration::from_secs(10));
        assert_eq!(policy.cooldown(2), Duration::from_secs(20));
        assert_eq!(policy.cooldown(3), Duration::from_secs(40));
        assert_eq!(policy.cooldown(6), Duration::from_secs(300));
        assert_eq!(policy.cooldown(60), Duration::from_secs(300));
    }

    #[test]
    fn dead_producer_restarts_without_hysteresis() {
        let mut sup = supervisor();
        let verdict = sup.assess(false, Freshness::Fresh(Duration::from_secs(1)));
        assert_eq!(verdict, Verdict::Restart(SupervisorFault::ProducerDead));
        assert_eq!(sup.state().phase, WatchdogPhase::Restarting);
    }

    #[test]
    fn missing_file_counts_as_stale() {
        let mut sup = supervisor();
        assert_eq!(sup.assess(true, Freshness::Missing), Verdict::Degraded { checks: 1 });
        assert_eq!(sup.assess(true, Freshness::Missing), Verdict::Degraded { checks: 2 });
        assert_eq!(
            sup.assess(true, Freshness::Missing),
            Verdict::Restart(SupervisorFault::DataStale { checks: 3, age: None })
        );
    }

    #[test]
    fn fresh_observation_resets_counter() {
        let mut sup = supervisor();
        sup.assess(true, Freshness::Stale(Duration::from_secs(45)));
        sup.assess(true, Freshness::Stale(Duration::from_secs(55)));
        assert_eq!(sup.assess(true, Freshness::Fresh(Duration::from_secs(3))), Verdict::Healthy);
        assert_eq!(sup.state().consecutive_stale_checks, 0);
        assert_eq!(
            sup.assess(true, Freshness::Stale(Duration::from_secs(40))),
            Verdict::Degraded { checks: 1 }
        );
    }
}
