//! Push phase: upload local deltas in bulk

use chrono::{DateTime, Utc};
use log::{debug, warn};

use super::cancel::CancelFlag;
use super::conflict::stored_precision;
use super::fetch::Confirmed;
use crate::error::SyncError;
use crate::models::{EntityKind, Record, SyncableRecord, TenantId};
use crate::remote::RemoteStore;
use crate::storage::LocalStore;

/// Statistics from pushing one kind
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushStats {
    /// Records sent in the bulk upsert
    pub uploaded: usize,
    /// Records already confirmed identical with the remote this round
    pub unchanged: usize,
    /// Records that could not be encoded
    pub skipped: usize,
}

/// Selects local records and upserts them remotely, keyed by id
///
/// Upserts overwrite unconditionally, so pushing the same window twice is
/// harmless.
pub struct DeltaPusher<'a> {
    remote: &'a dyn RemoteStore,
    local: &'a dyn LocalStore,
    confirmed: Option<&'a Confirmed>,
    cancel: Option<&'a CancelFlag>,
}

impl<'a> DeltaPusher<'a> {
    pub fn new(remote: &'a dyn RemoteStore, local: &'a dyn LocalStore) -> Self {
        Self {
            remote,
            local,
            confirmed: None,
            cancel: None,
        }
    }

    /// Leave out records the pull phase found identical on both sides, unless
    /// they changed again since
    pub fn skipping(mut self, confirmed: &'a Confirmed) -> Self {
        self.confirmed = Some(confirmed);
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Push every local record of `kind` for `tenant` modified after `cursor`
    pub fn push_since(
        &self,
        kind: EntityKind,
        tenant: &TenantId,
        cursor: DateTime<Utc>,
    ) -> Result<PushStats, SyncError> {
        let records = self.local.list_modified_since(kind, tenant, cursor)?;
        self.push(kind, records)
    }

    /// Push every local record of `kind` for `tenant`, ignoring any cursor
    pub fn push_all(&self, kind: EntityKind, tenant: &TenantId) -> Result<PushStats, SyncError> {
        let records = self.local.list_all(kind, tenant)?;
        self.push(kind, records)
    }

    fn push(&self, kind: EntityKind, records: Vec<Record>) -> Result<PushStats, SyncError> {
        let mut stats = PushStats::default();
        let mut rows = Vec::with_capacity(records.len());

        for record in records {
            if let Some(cancel) = self.cancel {
                cancel.check()?;
            }

            if self.is_confirmed(&record) {
                stats.unchanged += 1;
                continue;
            }

            match record.to_wire() {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!("Skipping {} {}: cannot encode: {}", kind.as_str(), record.id(), e);
                    stats.skipped += 1;
                }
            }
        }

        if rows.is_empty() {
            debug!("Nothing to push for {}", kind.table());
            return Ok(stats);
        }

        self.remote.upsert(kind, &rows)?;
        stats.uploaded = rows.len();
        debug!("Pushed {} {}", stats.uploaded, kind.table());
        Ok(stats)
    }

    fn is_confirmed(&self, record: &Record) -> bool {
        self.confirmed
            .and_then(|confirmed| confirmed.get(record.id()))
            .is_some_and(|at| stored_precision(*at) == stored_precision(record.modified_at()))
    }
}
