//! Durable run state: the watermark file and the download retry list.
//!
//! The watermark is the all-or-nothing checkpoint of the sync loop. It holds
//! a single UTC instant — the start time of the last run that completed in
//! full — and is only ever written after every folder batch has been staged,
//! processed, and published. Any unhandled failure leaves the file untouched,
//! so the next run re-evaluates everything since the last good checkpoint
//! (at-least-once, never at-most-once).
//!
//! The retry list is a JSON sidecar covering the one gap a pure watermark
//! rule leaves open: a file whose download fails while it still satisfies
//! the change filter would become permanently invisible once the watermark
//! advances past its modification time. Failed downloads are recorded here
//! and re-attempted on the next run regardless of the watermark; an entry
//! leaves the list once the file has been staged.
//!
//! ## Storage
//!
//! - Watermark: a single RFC 3339 line, e.g. `2026-08-27T09:14:02Z`.
//!   Overwritten atomically (write to a temp file, then rename).
//! - Retry list: pretty-printed JSON array of `{path, modified}` records.
//!   A missing or unparsable file loads as an empty list — losing retry
//!   entries degrades to plain watermark behavior, never to a crash.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatermarkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid watermark timestamp {text:?}: {source}")]
    Parse {
        text: String,
        source: chrono::ParseError,
    },
}

/// Persists the last-successful-run instant.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the watermark. `Ok(None)` when no run has completed yet.
    ///
    /// An unparsable file is an error, not an empty watermark: silently
    /// treating garbage as "no watermark" would re-stage the entire remote
    /// namespace.
    pub fn load(&self) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let trimmed = text.trim();
        let parsed = DateTime::parse_from_rfc3339(trimmed).map_err(|source| {
            WatermarkError::Parse {
                text: trimmed.to_string(),
                source,
            }
        })?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    /// Advance the watermark. Write-to-temp-then-rename so a crash mid-write
    /// cannot leave a truncated timestamp behind.
    pub fn save(&self, instant: DateTime<Utc>) -> Result<(), WatermarkError> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(
            &tmp,
            instant.to_rfc3339_opts(SecondsFormat::Secs, true),
        )?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// A remote file whose download failed while it still qualified for staging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEntry {
    /// Root-relative remote path, e.g. `/A-1/a-01.jpg`.
    pub path: String,
    /// Server-side modification instant, when the listing provided one.
    pub modified: Option<DateTime<Utc>>,
}

/// JSON sidecar of downloads to re-attempt independent of the watermark.
#[derive(Debug, Clone)]
pub struct RetryList {
    path: PathBuf,
}

impl RetryList {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the pending entries. Missing or corrupt files load as empty.
    pub fn load(&self) -> Vec<RetryEntry> {
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        serde_json::from_str(&text).unwrap_or_default()
    }

    pub fn save(&self, entries: &[RetryEntry]) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
    }
}

/// Default watermark filename within the state directory.
pub const WATERMARK_FILENAME: &str = ".last-run";
/// Default retry-list filename within the state directory.
pub const RETRY_FILENAME: &str = ".retry.json";

/// Convenience constructors rooted in a state directory.
pub fn stores_in(dir: &Path) -> (WatermarkStore, RetryList) {
    (
        WatermarkStore::new(dir.join(WATERMARK_FILENAME)),
        RetryList::new(dir.join(RETRY_FILENAME)),
    )
}
