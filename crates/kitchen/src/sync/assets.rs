//! Asset migration: upload locally referenced files and rewrite the field
//!
//! Migration is one-directional. A field that holds a remote URL is never
//! touched again, and a failed upload leaves the local path for a retry on
//! the next round.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::path::Path;

use super::cancel::CancelFlag;
use crate::error::SyncError;
use crate::models::{AssetReference, EntityKind, Record, RecordId, SyncableRecord, TenantId};
use crate::remote::ObjectStorage;
use crate::storage::LocalStore;

/// Statistics from one migration pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationStats {
    /// Uploaded and rewritten
    pub migrated: usize,
    /// Upload failed; left for the next round
    pub failed: usize,
    /// Local path that no longer exists on disk
    pub missing: usize,
}

/// Object-storage path for an asset: `{entityKind}/{entityId}/{filename}`
pub fn logical_path(kind: EntityKind, id: &RecordId, file_name: &str) -> String {
    format!("{}/{}/{}", kind.as_str(), id, file_name)
}

/// Number of records of `tenant` whose asset field still holds a local path
pub fn pending_assets(local: &dyn LocalStore, tenant: &TenantId) -> Result<usize> {
    let mut pending = 0;
    for kind in EntityKind::ALL.into_iter().filter(EntityKind::has_assets) {
        pending += local
            .list_all(kind, tenant)?
            .iter()
            .filter(|r| r.asset().and_then(AssetReference::local_path).is_some())
            .count();
    }
    Ok(pending)
}

/// Uploads local asset files and rewrites the referencing records
pub struct AssetMigrator<'a> {
    storage: &'a dyn ObjectStorage,
    local: &'a dyn LocalStore,
    cancel: Option<&'a CancelFlag>,
}

impl<'a> AssetMigrator<'a> {
    pub fn new(storage: &'a dyn ObjectStorage, local: &'a dyn LocalStore) -> Self {
        Self {
            storage,
            local,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: &'a CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Migrate every pending asset of `tenant`.
    ///
    /// Per-asset upload failures are logged and counted. Only a lost session,
    /// cancellation or a failed local write abort the pass.
    pub fn migrate_pending_assets(&self, tenant: &TenantId) -> Result<MigrationStats, SyncError> {
        let mut stats = MigrationStats::default();

        for kind in EntityKind::ALL.into_iter().filter(EntityKind::has_assets) {
            for record in self.local.list_all(kind, tenant)? {
                if let Some(cancel) = self.cancel {
                    cancel.check()?;
                }
                self.migrate(record, &mut stats)?;
            }
        }

        if stats != MigrationStats::default() {
            info!(
                "Asset migration: {} migrated, {} failed, {} missing",
                stats.migrated, stats.failed, stats.missing
            );
        }
        Ok(stats)
    }

    fn migrate(&self, record: Record, stats: &mut MigrationStats) -> Result<(), SyncError> {
        let kind = record.kind();
        let Some(path) = record.asset().and_then(AssetReference::local_path) else {
            return Ok(());
        };

        let Some(file_name) = existing_file_name(path) else {
            debug!(
                "Asset for {} {} not found at {}",
                kind.as_str(),
                record.id(),
                path.display()
            );
            stats.missing += 1;
            return Ok(());
        };

        let logical = logical_path(kind, record.id(), &file_name);
        match self.storage.upload(path, &logical) {
            Ok(url) => {
                let mut migrated = record.clone();
                migrated.set_asset(AssetReference::remote(url), rewrite_stamp(record.modified_at()));
                self.local.upsert(migrated)?;
                debug!("Migrated asset {}", logical);
                stats.migrated += 1;
            }
            Err(SyncError::NotAuthenticated) => return Err(SyncError::NotAuthenticated),
            Err(e) => {
                warn!("Failed to upload asset {}: {}", logical, e);
                stats.failed += 1;
            }
        }

        Ok(())
    }
}

/// Modification time for a rewritten record, always after its previous one
fn rewrite_stamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(previous + Duration::microseconds(1))
}

fn existing_file_name(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}
