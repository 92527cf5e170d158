//! # Watchdog Module
//!
//! Out-of-process supervision of the rate producer.
//!
//! - **`process`**: the [`ProcessHandle`] capability and [`ScriptProcess`],
//!   its implementation over the OS process table.
//! - **`supervisor`**: [`WatchdogSupervisor`], the check loop and restart
//!   state machine with stale-check hysteresis and failed-restart cooldown.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Producer process control.
pub mod process;
/// Supervision state machine.
pub mod supervisor;

pub use process::{ProcessHandle, ProducerSpec, ScriptProcess};
pub use supervisor::{
    Freshness, RestartPolicy, SupervisorFault, Verdict, WatchdogConfig, WatchdogPhase, WatchdogState,
    WatchdogSupervisor,
};
