//! Persisted sync cursor
//!
//! A single UTC instant per installation: pull and push anything modified
//! strictly after it. Stored as an RFC 3339 string in a small file.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// File-backed store for the last successful sync time
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored cursor.
    ///
    /// A missing, unreadable or unparsable file means "never synced".
    pub fn load(&self) -> Option<DateTime<Utc>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read sync cursor {}: {}", self.path.display(), e);
                return None;
            }
        };

        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(at) => Some(at.with_timezone(&Utc)),
            Err(e) => {
                warn!(
                    "Ignoring corrupt sync cursor {} ({:?}): {}",
                    self.path.display(),
                    raw.trim(),
                    e
                );
                None
            }
        }
    }

    /// Overwrite the stored cursor
    pub fn save(&self, at: DateTime<Utc>) -> Result<()> {
        let value = at.to_rfc3339_opts(SecondsFormat::Micros, true);
        config::write_atomic(&self.path, value.as_bytes())
            .with_context(|| format!("Failed to save sync cursor to {}", self.path.display()))?;
        debug!("Saved sync cursor {}", value);
        Ok(())
    }

    /// Forget the cursor so the next round is a full resync
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove sync cursor {}", self.path.display())),
        }
    }
}

/// The cursor a round actually uses.
///
/// The epoch (full resync) when the tenant has no local records or nothing
/// was stored; otherwise the stored cursor. Guards against a cursor that
/// survived a local data wipe.
pub fn effective_cursor(
    tenant_is_locally_empty: bool,
    stored: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    match stored {
        Some(at) if !tenant_is_locally_empty => at,
        _ => DateTime::<Utc>::UNIX_EPOCH,
    }
}
