//! # Financial Market Data Module
//!
//! This module groups the logic for fetching market data from external
//! providers and normalizing it for the rest of the system.
//!
//! ## Contained Modules:
//!
//! - **`fx`**: Exchange-rate sources (a scraped quote page and a public JSON
//!   API), the plausibility band applied to their output, and the ordered
//!   fallback chain that combines them.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Exchange-rate samples, fetchers and the fallback chain.
pub mod fx;
