//! # Persisted Rate State
//!
//! The file is rewritten on every successful refresh. Writers never touch the
//! final path directly: the document goes to a temporary sibling which is
//! synced and then renamed over the target, so a reader sees either the old
//! document or the new one, never a torn write.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::markets::fx::sample::RateSample;

/// Well-known location of the state file.
pub const DEFAULT_STATE_FILE: &str = "/tmp/usdkrw_rate.json";

/// Failures while writing or reading the state file.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem failure (temp file creation, write, sync, rename, read).
    #[error("state file i/o error at {path}: {source}")]
    Io {
        /// Path being written or read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The document could not be serialized.
    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),

    /// The file exists but does not hold a valid document.
    #[error("corrupt state file {path}: {reason}")]
    Corrupt {
        /// Path that was read.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },
}

/// On-disk mirror of the latest [`RateSample`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// The rate.
    pub rate: f64,
    /// Provenance tag.
    pub source: String,
    /// Observation time, RFC 3339.
    pub timestamp: String,
    /// Observation time, seconds since the Unix epoch.
    pub timestamp_unix: f64,
}

impl PersistedState {
    /// Seconds between the observation and `now`, never negative.
    pub fn age(&self, now: DateTime<Utc>) -> f64 {
        let now_unix = now.timestamp_micros() as f64 / 1_000_000.0;
        (now_unix - self.timestamp_unix).max(0.0)
    }
}

impl From<&RateSample> for PersistedState {
    fn from(sample: &RateSample) -> Self {
        Self {
            rate: sample.rate,
            source: sample.source.clone(),
            timestamp: sample.observed_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            timestamp_unix: sample.observed_at.timestamp_micros() as f64 / 1_000_000.0,
        }
    }
}

/// Publishes samples to one state file with atomic replace semantics.
#[derive(Debug, Clone)]
pub struct StateWriter {
    path: PathBuf,
}

impl StateWriter {
    /// Creates a writer targeting `path`. Nothing is touched until the first publish.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The target path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replaces the state file with `sample`.
    ///
    /// On failure the temporary file is removed and the previous document,
    /// if any, is left in place.
    pub fn publish(&self, sample: &RateSample) -> Result<(), PersistenceError> {
        let body = serde_json::to_vec_pretty(&PersistedState::from(sample))?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source: io::Error| PersistenceError::Io {
            path: self.path.clone(),
            source,
        };

        // 1. Temp file in the same directory so the rename stays on one filesystem
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;

        // 2. Full write, flushed and synced before it becomes visible
        tmp.write_all(&body).map_err(io_err)?;
        tmp.flush().map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;

        // 3. Atomic rename over the target; on error the temp file is dropped and deleted
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        debug!(path = %self.path.display(), rate = sample.rate, "state file published");
        Ok(())
    }
}

/// Reads the state file.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn read_state(path: &Path) -> Result<Option<PersistedState>, PersistenceError> {
    let raw = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| PersistenceError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rate.json");
        let writer = StateWriter::new(&path);

        let sample = RateSample::now(1384.5, "exchangerate-api");
        writer.publish(&sample).unwrap();

        let state = read_state(&path).unwrap().unwrap();
        assert_eq!(state.rate, 1384.5);
        assert_eq!(state.source, "exchangerate-api");
        assert!(DateTime::parse_from_rfc3339(&state.timestamp).is_ok());
        assert!(state.age(Utc::now()) < 5.0);
    }

    #[test]
    fn publish_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StateWriter::new(dir.path().join("rate.json"));
        writer.publish(&RateSample::now(1380.0, "a")).unwrap();
        writer.publish(&RateSample::now(1381.0, "b")).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_state(&dir.path().join("absent.json")).unwrap().is_none());
    }

    #[test]
    fn truncated_document_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rate.json");
        std::fs::write(&path, br#"{"rate": 1384.5, "sou"#).unwrap();
        assert!(matches!(read_state(&path), Err(PersistenceError::Corrupt { .. })));
    }

    #[test]
    fn age_clamps_future_timestamps() {
        let mut state = PersistedState::from(&RateSample::now(1380.0, "t"));
        state.timestamp_unix += 60.0;
        assert_eq!(state.age(Utc::now()), 0.0);
    }
}
