//! # Lookup Protocol
//!
//! One request line in, one JSON document plus `\n` out, then the connection
//! is closed. Unknown input is answered with an error document, never by
//! dropping the connection.

use std::fmt;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::core::rate_cache::{CacheError, CacheStats, RateLookup};

/// Default TCP port of the lookup service.
pub const DEFAULT_PORT: u16 = 9516;

/// Largest request the server reads.
pub const MAX_REQUEST_BYTES: usize = 1024;

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `GET_RATE`
    GetRate,
    /// `STATS`
    Stats,
    /// `SHUTDOWN`
    Shutdown,
    /// Anything else, trimmed.
    Unknown(String),
}

impl Command {
    /// Parses one request. Surrounding whitespace is ignored; matching is case-sensitive.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "GET_RATE" => Command::GetRate,
            "STATS" => Command::Stats,
            "SHUTDOWN" => Command::Shutdown,
            other => Command::Unknown(other.to_string()),
        }
    }

    /// `false` only for [`Command::Unknown`].
    pub fn is_known(&self) -> bool {
        !matches!(self, Command::Unknown(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::GetRate => f.write_str("GET_RATE"),
            Command::Stats => f.write_str("STATS"),
            Command::Shutdown => f.write_str("SHUTDOWN"),
            Command::Unknown(s) => f.write_str(s),
        }
    }
}

/// Reply status tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    /// The request was served.
    Success,
    /// The request could not be served.
    Error,
}

/// The reply document. Only the fields relevant to the request are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// `success` or `error`.
    pub status: ReplyStatus,
    /// `GET_RATE`: the rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    /// `GET_RATE`: provenance tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// `GET_RATE`: observation time, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// `GET_RATE`: whether a failed refresh left an older value in place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale: Option<bool>,
    /// `STATS`: counter snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<CacheStats>,
    /// Human-readable message (errors and `SHUTDOWN`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Reply {
    fn empty(status: ReplyStatus) -> Self {
        Self {
            status,
            rate: None,
            source: None,
            timestamp: None,
            stale: None,
            stats: None,
            message: None,
        }
    }

    /// Reply to a successful lookup.
    pub fn rate(lookup: &RateLookup) -> Self {
        Self {
            rate: Some(lookup.sample.rate),
            source: Some(lookup.sample.source.clone()),
            timestamp: Some(lookup.sample.observed_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            stale: Some(lookup.stale),
            ..Self::empty(ReplyStatus::Success)
        }
    }

    /// Reply to a failed lookup.
    pub fn lookup_failed(err: &CacheError) -> Self {
        Self::error(err.to_string())
    }

    /// Reply to `STATS`.
    pub fn stats(stats: CacheStats) -> Self {
        Self {
            stats: Some(stats),
            ..Self::empty(ReplyStatus::Success)
        }
    }

    /// Reply to `SHUTDOWN`.
    pub fn shutting_down() -> Self {
        Self {
            message: Some("Shutting down".to_string()),
            ..Self::empty(ReplyStatus::Success)
        }
    }

    /// Reply to unrecognized input.
    pub fn unknown(input: &str) -> Self {
        Self::error(format!("Unknown command: {}", input))
    }

    /// Generic error reply.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::empty(ReplyStatus::Error)
        }
    }

    /// `true` for `status: "success"`.
    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Success
    }

    /// Serialized form, newline terminated.
    pub fn to_line(&self) -> String {
        // Serializing this struct cannot fail: every field is a plain value.
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"status":"error","message":"internal encoding error"}"#.to_string()
        });
        line.push('\n');
        line
    }
}
