//! Round modes, results and status

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

use crate::error::SyncError;

/// Which phases a round runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Pull, migrate assets, push, save the cursor
    Full,
    PullOnly,
    /// Migrate assets, then push records modified after the cursor
    PushOnly,
    /// Migrate assets, then push every local record of the tenant
    ForceUploadAll,
}

impl SyncMode {
    pub fn pulls(&self) -> bool {
        matches!(self, SyncMode::Full | SyncMode::PullOnly)
    }

    pub fn pushes(&self) -> bool {
        !matches!(self, SyncMode::PullOnly)
    }

    /// Only a round that reconciled both directions may move the cursor
    pub fn saves_cursor(&self) -> bool {
        matches!(self, SyncMode::Full)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncMode::Full => "full sync",
            SyncMode::PullOnly => "pull",
            SyncMode::PushOnly => "push",
            SyncMode::ForceUploadAll => "force upload",
        };
        f.write_str(label)
    }
}

/// Aggregated outcome of one round
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    pub mode: SyncMode,
    pub success: bool,
    /// Records sent to the remote
    pub uploaded: usize,
    /// Records inserted or overwritten locally
    pub downloaded: usize,
    pub assets_migrated: usize,
    /// Assets whose upload failed and will be retried
    pub assets_failed: usize,
    /// Malformed or unreadable records left out
    pub skipped: usize,
    pub duration: Duration,
    pub error: Option<SyncError>,
}

impl SyncResult {
    pub(crate) fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            success: false,
            uploaded: 0,
            downloaded: 0,
            assets_migrated: 0,
            assets_failed: 0,
            skipped: 0,
            duration: Duration::ZERO,
            error: None,
        }
    }

    /// The user-facing failure message, if the round failed
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} uploaded, {} downloaded, {} assets migrated in {:.1}s",
            self.mode,
            if self.success { "succeeded" } else { "failed" },
            self.uploaded,
            self.downloaded,
            self.assets_migrated,
            self.duration.as_secs_f64()
        )?;
        if let Some(error) = &self.error {
            write!(f, " ({})", error)?;
        }
        Ok(())
    }
}

/// Read-only view of the sync state for the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Stored cursor; `None` if never synced
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Local records modified after the cursor
    pub pending_uploads: usize,
    /// Records still referencing a local file
    pub pending_assets: usize,
    pub local_records: usize,
}
