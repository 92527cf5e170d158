//! # Data Retrieval Module
//!
//! This module provides a centralized location for generic data retrieval
//! clients and utilities, primarily focused on HTTP-based interactions.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: A generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, featuring automatic retries with exponential
//!   backoff and a hard per-request timeout. The FX fetchers in
//!   `markets::fx` are built on it.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiClientOptions, ApiResponse, RetrieveError};
