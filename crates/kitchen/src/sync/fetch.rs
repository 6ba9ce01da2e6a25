//! Pull phase: fetch remote deltas and merge them into the local store

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashMap;

use super::cancel::CancelFlag;
use super::conflict::{ConflictDecision, resolve};
use crate::error::SyncError;
use crate::models::{EntityKind, Record, RecordId, SyncableRecord, TenantId};
use crate::remote::RemoteStore;
use crate::storage::LocalStore;

/// Records whose local copy matched the remote one after the pull, with the
/// modification time they matched at
pub type Confirmed = HashMap<RecordId, DateTime<Utc>>;

/// Decoded remote records of one kind
#[derive(Debug, Default)]
pub struct Fetched {
    pub records: Vec<Record>,
    /// Rows that could not be decoded or belonged to another tenant
    pub skipped: usize,
}

/// Statistics from pulling one kind
#[derive(Debug, Default, Clone)]
pub struct PullStats {
    /// Remote rows received
    pub fetched: usize,
    /// Records first seen from the remote
    pub inserted: usize,
    /// Local records overwritten by a newer remote version
    pub updated: usize,
    /// Local version newer; left for the push phase
    pub deferred: usize,
    /// Identical modification times
    pub unchanged: usize,
    /// Malformed rows or unreadable local copies
    pub skipped: usize,
    pub confirmed: Confirmed,
}

impl PullStats {
    /// Records written locally
    pub fn downloaded(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Retrieves remote records modified after a cursor and merges them locally
pub struct DeltaFetcher<'a> {
    remote: &'a dyn RemoteStore,
    local: &'a dyn LocalStore,
    cancel: Option<&'a CancelFlag>,
}

impl<'a> DeltaFetcher<'a> {
    pub fn new(remote: &'a dyn RemoteStore, local: &'a dyn LocalStore) -> Self {
        Self {
            remote,
            local,
            cancel: None,
        }
    }

    /// Stop between records once `cancel` is raised
    pub fn with_cancel(mut self, cancel: &'a CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn check_cancel(&self) -> Result<(), SyncError> {
        self.cancel.map_or(Ok(()), CancelFlag::check)
    }

    /// All records of `kind` for `tenant` modified strictly after `cursor`.
    ///
    /// Rows that fail to decode are skipped and counted; they never fail the
    /// batch.
    pub fn fetch_since(
        &self,
        kind: EntityKind,
        tenant: &TenantId,
        cursor: DateTime<Utc>,
    ) -> Result<Fetched, SyncError> {
        let rows = self.remote.fetch_since(kind, tenant, cursor)?;
        let mut fetched = Fetched::default();

        for row in rows {
            match Record::from_wire(kind, row) {
                Ok(record) if record.tenant_id() != tenant => {
                    warn!(
                        "Skipping {} {} from another location ({})",
                        kind.as_str(),
                        record.id(),
                        record.tenant_id()
                    );
                    fetched.skipped += 1;
                }
                Ok(record) => fetched.records.push(record),
                Err(e) => {
                    warn!("Skipping malformed remote {} row: {}", kind.as_str(), e);
                    fetched.skipped += 1;
                }
            }
        }

        Ok(fetched)
    }

    /// Fetch the deltas of one kind and merge each record into the local store
    pub fn pull(
        &self,
        kind: EntityKind,
        tenant: &TenantId,
        cursor: DateTime<Utc>,
    ) -> Result<PullStats, SyncError> {
        let fetched = self.fetch_since(kind, tenant, cursor)?;
        let mut stats = PullStats {
            fetched: fetched.records.len() + fetched.skipped,
            skipped: fetched.skipped,
            ..Default::default()
        };

        for remote in fetched.records {
            self.check_cancel()?;
            self.merge(remote, &mut stats)?;
        }

        debug!(
            "Pulled {}: {} inserted, {} updated, {} deferred, {} unchanged, {} skipped",
            kind.table(),
            stats.inserted,
            stats.updated,
            stats.deferred,
            stats.unchanged,
            stats.skipped
        );
        Ok(stats)
    }

    /// Apply one remote record to the local store.
    ///
    /// Only a failed local write is returned as an error; an unreadable local
    /// copy skips the record.
    fn merge(&self, remote: Record, stats: &mut PullStats) -> Result<(), SyncError> {
        let kind = remote.kind();
        let local = match self.local.get(kind, remote.id()) {
            Ok(local) => local,
            Err(e) => {
                warn!("Skipping {} {}: local copy unreadable: {:#}", kind.as_str(), remote.id(), e);
                stats.skipped += 1;
                return Ok(());
            }
        };

        match resolve(local.as_ref(), &remote) {
            ConflictDecision::AdoptRemote => {
                let adopted = match &local {
                    Some(current) => current.adopt(remote.clone()),
                    None => remote.clone(),
                };

                // A kept asset URL still has to reach the remote
                if adopted == remote {
                    stats.confirmed.insert(remote.id().clone(), remote.modified_at());
                }

                debug!("Adopting remote {} {}", kind.as_str(), remote.id());
                if local.is_some() {
                    stats.updated += 1;
                } else {
                    stats.inserted += 1;
                }
                self.local.upsert(adopted)?;
            }
            ConflictDecision::DeferToNextPush => {
                debug!("Local {} {} is newer, deferring to push", kind.as_str(), remote.id());
                stats.deferred += 1;
            }
            ConflictDecision::Equal => {
                // Same timestamp but different fields: the local copy goes out with the push
                if local.as_ref().is_some_and(|current| current.same_content(&remote)) {
                    stats.confirmed.insert(remote.id().clone(), remote.modified_at());
                } else {
                    debug!(
                        "Local {} {} ties with remote but differs, deferring to push",
                        kind.as_str(),
                        remote.id()
                    );
                }
                stats.unchanged += 1;
            }
        }

        Ok(())
    }
}
