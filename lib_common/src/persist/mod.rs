//! # Persistence Module
//!
//! Durable, crash-safe publication of the latest rate sample for readers in
//! other processes (the watchdog and ad-hoc local tools).
//!
//! ## Contained Modules:
//!
//! - **`state_file`**: the [`PersistedState`] JSON document, the
//!   [`StateWriter`] that replaces it atomically, and [`read_state`].

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Atomic JSON state file shared between processes.
pub mod state_file;

pub use state_file::{read_state, PersistedState, PersistenceError, StateWriter, DEFAULT_STATE_FILE};
