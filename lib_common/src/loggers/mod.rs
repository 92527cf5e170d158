/// Shared `tracing` subscriber setup and log-file housekeeping.
pub mod tracing_setup;

pub use tracing_setup::{cleanup_old_logs, init_tracing};
