//! # Core Service Module
//!
//! The rate service engine: a cache with serialized refresh, the periodic
//! warm-up task, and the small TCP lookup protocol in front of them.
//!
//! ## Core Components:
//!
//! - **`rate_cache`**: [`RateCache`] owns the latest sample. One mutex is held
//!   across lookups and refreshes, so concurrent callers against a stale cache
//!   trigger a single fetch and share its outcome.
//!
//! - **`refresher`**: a background task calling [`RateCache::refresh_now`] on
//!   a jittered schedule to keep the cache and the state file warm.
//!
//! - **`protocol`**: request parsing ([`Command`]) and the JSON [`Reply`].
//!
//! - **`request_server`**: the accept loop and per-connection handlers.
//!
//! - **`client`**: [`FxServiceClient`], used by the CLI and by consumers.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Protocol client.
pub mod client;
/// Request parsing and reply documents.
pub mod protocol;
/// The serialized rate cache.
pub mod rate_cache;
/// Periodic warm-up task.
pub mod refresher;
/// TCP accept loop and connection handling.
pub mod request_server;

// --- Public API Re-exports ---
pub use client::{ClientError, FxServiceClient};
pub use protocol::{Command, Reply, ReplyStatus, DEFAULT_PORT};
pub use rate_cache::{CacheError, CacheStats, RateCache, RateLookup, DEFAULT_TTL};
pub use refresher::{spawn_refresher, RefreshSchedule};
pub use request_server::{RequestServer, ServerOptions};
