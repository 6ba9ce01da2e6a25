//! Sync round sequencing
//!
//! `Idle -> Syncing -> Idle`, one round per process at a time. Pull is
//! finished for every kind before any push starts, and kinds run in
//! dependency order (ingredients, recipes, entrees).

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::time::Instant;

use super::assets::{AssetMigrator, pending_assets};
use super::cancel::CancelFlag;
use super::cursor::{CursorStore, effective_cursor};
use super::events::{SyncEvent, SyncEvents};
use super::fetch::{Confirmed, DeltaFetcher};
use super::push::DeltaPusher;
use super::result::{SyncMode, SyncResult, SyncStatus};
use crate::error::SyncError;
use crate::models::{EntityKind, TenantId};
use crate::remote::{ObjectStorage, RemoteStore};
use crate::storage::{LocalStore, LocalStoreFactory};

/// One step of a round; progress is reported after each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pull(EntityKind),
    MigrateAssets,
    Push(EntityKind),
    PushAll(EntityKind),
    SaveCursor,
}

impl Phase {
    fn plan(mode: SyncMode) -> Vec<Phase> {
        let mut phases = Vec::new();
        if mode.pulls() {
            phases.extend(EntityKind::ALL.map(Phase::Pull));
        }
        if mode.pushes() {
            phases.push(Phase::MigrateAssets);
            if mode == SyncMode::ForceUploadAll {
                phases.extend(EntityKind::ALL.map(Phase::PushAll));
            } else {
                phases.extend(EntityKind::ALL.map(Phase::Push));
            }
        }
        if mode.saves_cursor() {
            phases.push(Phase::SaveCursor);
        }
        phases
    }

    fn label(&self) -> String {
        match self {
            Phase::Pull(kind) => format!("Pulling {}", kind.table()),
            Phase::MigrateAssets => "Migrating assets".to_string(),
            Phase::Push(kind) | Phase::PushAll(kind) => format!("Pushing {}", kind.table()),
            Phase::SaveCursor => "Saving sync cursor".to_string(),
        }
    }
}

/// Clears the busy flag when the round ends, however it ends
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Kind-scoped failures collected during a round
#[derive(Default)]
struct Failures {
    kinds: HashSet<EntityKind>,
    errors: Vec<SyncError>,
}

impl Failures {
    /// Keep going after a failure scoped to one kind; give up on anything else
    fn absorb(&mut self, kind: EntityKind, phase: &str, e: SyncError) -> Result<(), SyncError> {
        if e.is_terminal() {
            return Err(e);
        }
        warn!("{} of {} failed, continuing with other kinds: {}", phase, kind.table(), e);
        self.kinds.insert(kind);
        self.errors.push(e);
        Ok(())
    }
}

/// Runs sync rounds between the local store and the remote
pub struct SyncOrchestrator {
    remote: Arc<dyn RemoteStore>,
    storage: Arc<dyn ObjectStorage>,
    stores: Arc<dyn LocalStoreFactory>,
    cursor: CursorStore,
    events: SyncEvents,
    cancel: CancelFlag,
    syncing: AtomicBool,
}

impl SyncOrchestrator {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        storage: Arc<dyn ObjectStorage>,
        stores: Arc<dyn LocalStoreFactory>,
        cursor: CursorStore,
    ) -> Self {
        Self {
            remote,
            storage,
            stores,
            cursor,
            events: SyncEvents::new(),
            cancel: CancelFlag::new(),
            syncing: AtomicBool::new(false),
        }
    }

    pub fn events(&self) -> &SyncEvents {
        &self.events
    }

    /// Shorthand for `events().subscribe()`
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn cursor(&self) -> &CursorStore {
        &self.cursor
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Ask the round in flight to stop at the next phase or record boundary
    pub fn cancel(&self) {
        if self.is_syncing() {
            info!("Cancelling sync");
        }
        self.cancel.cancel();
    }

    /// Pull, migrate assets, push, then advance the cursor
    pub fn full_sync(&self, tenant: &TenantId) -> Result<SyncResult, SyncError> {
        self.run(SyncMode::Full, tenant)
    }

    pub fn pull_only(&self, tenant: &TenantId) -> Result<SyncResult, SyncError> {
        self.run(SyncMode::PullOnly, tenant)
    }

    pub fn push_only(&self, tenant: &TenantId) -> Result<SyncResult, SyncError> {
        self.run(SyncMode::PushOnly, tenant)
    }

    /// Push every local record regardless of the cursor (operator recovery)
    pub fn force_upload_all(&self, tenant: &TenantId) -> Result<SyncResult, SyncError> {
        self.run(SyncMode::ForceUploadAll, tenant)
    }

    /// Run one round.
    ///
    /// Returns `Err(Busy)` without side effects when a round is already in
    /// flight. Every other outcome, failed or not, is an `Ok` result that is
    /// also published as [`SyncEvent::Completed`].
    pub fn run(&self, mode: SyncMode, tenant: &TenantId) -> Result<SyncResult, SyncError> {
        let result = {
            let Some(_guard) = BusyGuard::acquire(&self.syncing) else {
                warn!("Ignoring {} request: sync already in progress", mode);
                return Err(SyncError::Busy);
            };
            self.cancel.reset();

            let started = Instant::now();
            info!("Starting {} for location {}", mode, tenant);

            let mut result = SyncResult::new(mode);
            if let Err(e) = self.execute(mode, tenant, &mut result) {
                error!("{} failed: {}", mode, e);
                result.error = Some(e);
            }
            result.success = result.error.is_none();
            result.duration = started.elapsed();
            result
        };

        info!("{}", result);
        self.events.emit(SyncEvent::Completed(result.clone()));
        Ok(result)
    }

    fn execute(
        &self,
        mode: SyncMode,
        tenant: &TenantId,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        if tenant.is_blank() {
            return Err(SyncError::NoTenantSelected);
        }
        if !self.remote.is_authenticated() {
            return Err(SyncError::NotAuthenticated);
        }

        let started_at = Utc::now();
        let local = self.stores.open()?;
        let local: &dyn LocalStore = local.as_ref();

        let stored = self.cursor.load();
        let locally_empty = local.count_for_tenant(tenant)? == 0;
        if locally_empty && stored.is_some() {
            info!("No local records for location {}, resyncing from scratch", tenant);
        }
        let cursor = effective_cursor(locally_empty, stored);
        debug!("Sync cursor: {}", cursor);

        let phases = Phase::plan(mode);
        let mut confirmed = Confirmed::new();
        let mut failures = Failures::default();

        for (index, phase) in phases.iter().enumerate() {
            self.cancel.check()?;

            match *phase {
                Phase::Pull(kind) => {
                    let pulled = DeltaFetcher::new(self.remote.as_ref(), local)
                        .with_cancel(&self.cancel)
                        .pull(kind, tenant, cursor);
                    match pulled {
                        Ok(stats) => {
                            result.downloaded += stats.downloaded();
                            result.skipped += stats.skipped;
                            confirmed.extend(stats.confirmed);
                        }
                        Err(e) => failures.absorb(kind, "Pull", e)?,
                    }
                }
                Phase::MigrateAssets => {
                    let stats = AssetMigrator::new(self.storage.as_ref(), local)
                        .with_cancel(&self.cancel)
                        .migrate_pending_assets(tenant)?;
                    result.assets_migrated += stats.migrated;
                    result.assets_failed += stats.failed;
                }
                Phase::Push(kind) | Phase::PushAll(kind) => {
                    if failures.kinds.contains(&kind) {
                        warn!("Not pushing {}: pull failed this round", kind.table());
                    } else {
                        let pusher = DeltaPusher::new(self.remote.as_ref(), local)
                            .skipping(&confirmed)
                            .with_cancel(&self.cancel);
                        let pushed = match phase {
                            Phase::PushAll(_) => pusher.push_all(kind, tenant),
                            _ => pusher.push_since(kind, tenant, cursor),
                        };
                        match pushed {
                            Ok(stats) => {
                                result.uploaded += stats.uploaded;
                                result.skipped += stats.skipped;
                            }
                            Err(e) => failures.absorb(kind, "Push", e)?,
                        }
                    }
                }
                Phase::SaveCursor => {
                    if failures.errors.is_empty() {
                        self.advance_cursor(stored, started_at);
                    } else {
                        info!("Keeping sync cursor: {} kind(s) failed", failures.kinds.len());
                    }
                }
            }

            let percent = ((index + 1) * 100 / phases.len()) as u8;
            self.events.progress(phase.label(), percent);
        }

        match failures.errors.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }

    /// Persist the round's start as the new cursor, never moving backwards.
    ///
    /// A failed write is logged only; the next round redoes the overlap.
    fn advance_cursor(&self, stored: Option<DateTime<Utc>>, started_at: DateTime<Utc>) {
        let next = stored.map_or(started_at, |previous| previous.max(started_at));
        if let Err(e) = self.cursor.save(next) {
            warn!("{:#}", e);
        }
    }

    /// Counts for the operator, without touching the remote
    pub fn status(&self, tenant: &TenantId) -> Result<SyncStatus, SyncError> {
        let local = self.stores.open()?;
        let last_synced_at = self.cursor.load();
        let since = effective_cursor(false, last_synced_at);

        let mut pending_uploads = 0;
        for kind in EntityKind::ALL {
            pending_uploads += local.list_modified_since(kind, tenant, since)?.len();
        }

        Ok(SyncStatus {
            last_synced_at,
            pending_uploads,
            pending_assets: pending_assets(local.as_ref(), tenant)?,
            local_records: local.count_for_tenant(tenant)?,
        })
    }
}
