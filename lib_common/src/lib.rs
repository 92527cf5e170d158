//! # lib_common
//!
//! Shared building blocks of the FX rate service workspace. Every top-level
//! folder is a module behind a Cargo feature of the same name, so a binary
//! only compiles what it uses (`full` enables everything).
//!
//! - **`retrieve`**: HTTP client with retries and timeouts.
//! - **`markets`**: exchange-rate fetchers and the fallback chain.
//! - **`persist`**: the atomic state file.
//! - **`core`**: rate cache, refresher, lookup protocol server and client.
//! - **`watchdog`**: producer supervision.
//! - **`loggers`**: `tracing` setup.

#![forbid(unsafe_code)]

/// HTTP retrieval utilities.
#[cfg(feature = "retrieve")]
pub mod retrieve;

/// Market data sources.
#[cfg(feature = "markets")]
pub mod markets;

/// Cross-process state file.
#[cfg(feature = "persist")]
pub mod persist;

/// Rate cache and lookup service.
#[cfg(feature = "core")]
pub mod core;

/// Producer supervision.
#[cfg(feature = "watchdog")]
pub mod watchdog;

/// Logging setup.
#[cfg(feature = "loggers")]
pub mod loggers;
