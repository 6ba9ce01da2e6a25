//! Integration tests for the kitchen crate
//!
//! These tests run complete sync rounds against the in-memory remote and
//! both local store backends.

use chrono::{DateTime, Duration, Utc};
use kitchen::models::{AssetReference, EntityKind, Entree, Ingredient, Recipe, Record, RecordId, TenantId};
use kitchen::remote::{InMemoryRemote, RemoteStore};
use kitchen::storage::{InMemoryLocalStore, LocalStore, LocalStoreFactory, SqliteLocalStore};
use kitchen::sync::{CursorStore, SyncEvent, SyncMode, SyncOrchestrator};
use kitchen::SyncError;
use serde_json::{Value, json};
use std::fs;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::TempDir;

const LOCATION: &str = "loc-1";

fn tenant() -> TenantId {
    TenantId::new(LOCATION)
}

fn ago(secs: i64) -> DateTime<Utc> {
    Utc::now() - Duration::seconds(secs)
}

fn ingredient(id: &str, name: &str, modified_at: DateTime<Utc>) -> Ingredient {
    let mut ingredient = Ingredient::new(id, LOCATION, name);
    ingredient.modified_at = modified_at;
    ingredient
}

fn entree_with_photo(id: &str, photo: AssetReference, modified_at: DateTime<Utc>) -> Entree {
    let mut entree = Entree::new(id, LOCATION, "Plat du jour");
    entree.photo = photo;
    entree.modified_at = modified_at;
    entree
}

fn name_of(record: Option<Record>) -> String {
    match record {
        Some(Record::Ingredient(i)) => i.name,
        Some(Record::Recipe(r)) => r.name,
        Some(Record::Entree(e)) => e.name,
        None => panic!("record missing"),
    }
}

/// Engine wired to an in-memory local store and remote
struct Harness {
    dir: TempDir,
    local: InMemoryLocalStore,
    remote: InMemoryRemote,
    engine: Arc<SyncOrchestrator>,
}

impl Harness {
    fn new() -> Self {
        let local = InMemoryLocalStore::new();
        let remote = InMemoryRemote::new();
        Self::with_remote(local, remote.clone(), Arc::new(remote))
    }

    fn with_remote(
        local: InMemoryLocalStore,
        remote: InMemoryRemote,
        store: Arc<dyn RemoteStore>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let engine = SyncOrchestrator::new(
            store,
            Arc::new(remote.clone()),
            Arc::new(local.factory()),
            CursorStore::new(dir.path().join("sync-cursor")),
        );
        Self {
            dir,
            local,
            remote,
            engine: Arc::new(engine),
        }
    }

    fn cursor(&self) -> Option<DateTime<Utc>> {
        self.engine.cursor().load()
    }

    fn photo(&self, name: &str) -> AssetReference {
        let path = self.dir.path().join(name);
        fs::write(&path, name.as_bytes()).unwrap();
        AssetReference::local(path)
    }
}

/// Remote whose first fetch blocks until the test releases it
struct GatedRemote {
    inner: InMemoryRemote,
    entered: Mutex<Option<Sender<()>>>,
    release: Mutex<Receiver<()>>,
}

impl GatedRemote {
    fn new(inner: InMemoryRemote) -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let remote = Self {
            inner,
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
        };
        (remote, entered_rx, release_tx)
    }
}

impl RemoteStore for GatedRemote {
    fn is_authenticated(&self) -> bool {
        self.inner.is_authenticated()
    }

    fn fetch_since(
        &self,
        kind: EntityKind,
        tenant: &TenantId,
        after: DateTime<Utc>,
    ) -> Result<Vec<Value>, SyncError> {
        let entered = self.entered.lock().unwrap().take();
        if let Some(entered) = entered {
            entered.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        self.inner.fetch_since(kind, tenant, after)
    }

    fn upsert(&self, kind: EntityKind, rows: &[Value]) -> Result<(), SyncError> {
        self.inner.upsert(kind, rows)
    }
}

#[test]
fn test_end_to_end_newer_remote_wins_and_nothing_is_pushed() {
    let h = Harness::new();
    let t0 = ago(60);

    h.local.upsert(ingredient("A", "Butter", t0).into()).unwrap();
    h.remote.insert(ingredient("A", "Cultured butter", t0 + Duration::seconds(5)));
    h.remote.insert(ingredient("B", "Crème fraîche", t0 + Duration::seconds(1)));

    let result = h.engine.full_sync(&tenant()).unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.uploaded, 0);
    assert_eq!(result.downloaded, 2);

    let a = RecordId::new("A");
    let b = RecordId::new("B");
    assert_eq!(name_of(h.local.get(EntityKind::Ingredient, &a).unwrap()), "Cultured butter");
    assert_eq!(name_of(h.local.get(EntityKind::Ingredient, &b).unwrap()), "Crème fraîche");
    assert_eq!(name_of(h.remote.get(EntityKind::Ingredient, &a)), "Cultured butter");
    assert_eq!(h.remote.upserted_rows(), 0);
    assert!(h.cursor().is_some());
}

#[test]
fn test_second_round_is_a_no_op() {
    let h = Harness::new();
    h.local.upsert(ingredient("A", "Butter", ago(60)).into()).unwrap();
    h.local.upsert(Recipe::new("R", LOCATION, "Beurre blanc").into()).unwrap();
    h.remote.insert(ingredient("B", "Shallots", ago(30)));

    let first = h.engine.full_sync(&tenant()).unwrap();
    assert!(first.success);
    assert_eq!(first.uploaded, 2);
    assert_eq!(first.downloaded, 1);

    let second = h.engine.full_sync(&tenant()).unwrap();
    assert!(second.success);
    assert_eq!(second.uploaded, 0);
    assert_eq!(second.downloaded, 0);
}

#[test]
fn test_newer_local_change_is_pushed() {
    let h = Harness::new();
    h.remote.insert(ingredient("A", "Butter", ago(60)));
    h.local.upsert(ingredient("A", "Salted butter", ago(10)).into()).unwrap();

    let result = h.engine.full_sync(&tenant()).unwrap();

    assert!(result.success);
    assert_eq!(result.downloaded, 0);
    assert_eq!(result.uploaded, 1);
    assert_eq!(
        name_of(h.remote.get(EntityKind::Ingredient, &RecordId::new("A"))),
        "Salted butter"
    );
}

#[test]
fn test_tie_with_different_fields_pushes_local_copy() {
    let h = Harness::new();
    let at = ago(60);
    h.local.upsert(ingredient("A", "Butter", at).into()).unwrap();
    h.remote.insert(ingredient("A", "Cultured butter", at));

    let result = h.engine.full_sync(&tenant()).unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.downloaded, 0);
    assert_eq!(result.uploaded, 1);
    let a = RecordId::new("A");
    assert_eq!(name_of(h.local.get(EntityKind::Ingredient, &a).unwrap()), "Butter");
    assert_eq!(name_of(h.remote.get(EntityKind::Ingredient, &a)), "Butter");
}

#[test]
fn test_identical_tie_is_not_pushed() {
    let h = Harness::new();
    let at = ago(60);
    h.local.upsert(ingredient("A", "Butter", at).into()).unwrap();
    h.remote.insert(ingredient("A", "Butter", at));

    let result = h.engine.full_sync(&tenant()).unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.uploaded, 0);
    assert_eq!(h.remote.upserted_rows(), 0);
}

#[test]
fn test_failed_upload_is_isolated_and_retried() {
    let h = Harness::new();
    h.remote.fail_upload("x.jpg");
    let x_photo = h.photo("x.jpg");
    let x = entree_with_photo("X", x_photo.clone(), ago(60));
    let y = entree_with_photo("Y", h.photo("y.jpg"), ago(60));
    h.local.upsert(x.into()).unwrap();
    h.local.upsert(y.into()).unwrap();

    let result = h.engine.full_sync(&tenant()).unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.assets_migrated, 1);
    assert_eq!(result.assets_failed, 1);

    let y_url = AssetReference::remote(InMemoryRemote::object_url("entree/Y/y.jpg"));
    let local_y = h.local.get(EntityKind::Entree, &RecordId::new("Y")).unwrap().unwrap();
    assert_eq!(local_y.asset(), Some(&y_url));
    let remote_y = h.remote.get(EntityKind::Entree, &RecordId::new("Y")).unwrap();
    assert_eq!(remote_y.asset(), Some(&y_url));

    let local_x = h.local.get(EntityKind::Entree, &RecordId::new("X")).unwrap().unwrap();
    assert_eq!(local_x.asset(), Some(&x_photo));

    // The next round retries only the failed asset
    h.remote.heal();
    let calls = h.remote.upload_calls();
    let retry = h.engine.full_sync(&tenant()).unwrap();
    assert_eq!(retry.assets_migrated, 1);
    assert_eq!(h.remote.upload_calls(), calls + 1);
}

#[test]
fn test_migrated_asset_is_never_uploaded_again() {
    let h = Harness::new();
    h.local
        .upsert(entree_with_photo("E", h.photo("duck.jpg"), ago(60)).into())
        .unwrap();

    let first = h.engine.full_sync(&tenant()).unwrap();
    assert_eq!(first.assets_migrated, 1);
    assert_eq!(h.remote.upload_calls(), 1);

    let second = h.engine.full_sync(&tenant()).unwrap();
    assert!(second.success);
    assert_eq!(second.assets_migrated, 0);
    assert_eq!(second.uploaded, 0);
    assert_eq!(second.downloaded, 0);
    assert_eq!(h.remote.upload_calls(), 1);
}

#[test]
fn test_empty_tenant_ignores_stale_cursor() {
    let h = Harness::new();
    h.remote.insert(ingredient("A", "Butter", ago(3600)));
    h.remote.insert(ingredient("B", "Flour", ago(7200)));
    h.engine.cursor().save(ago(60)).unwrap();

    let result = h.engine.full_sync(&tenant()).unwrap();

    assert!(result.success);
    assert_eq!(result.downloaded, 2);
    assert_eq!(h.local.len(), 2);
}

#[test]
fn test_failing_kind_does_not_block_others_or_advance_cursor() {
    let h = Harness::new();
    h.remote.fail_fetch(EntityKind::Recipe);
    h.remote.insert(ingredient("I", "Butter", ago(60)));
    h.local.upsert(Recipe::new("R", LOCATION, "Local recipe").into()).unwrap();
    h.local
        .upsert(entree_with_photo("E", AssetReference::default(), ago(30)).into())
        .unwrap();

    let result = h.engine.full_sync(&tenant()).unwrap();

    assert!(!result.success);
    assert!(matches!(result.error, Some(SyncError::Network(_))));
    assert_eq!(result.downloaded, 1);
    assert_eq!(result.uploaded, 1);
    assert!(h.remote.get(EntityKind::Entree, &RecordId::new("E")).is_some());
    assert!(h.remote.get(EntityKind::Recipe, &RecordId::new("R")).is_none());
    assert!(h.cursor().is_none());

    h.remote.heal();
    let retry = h.engine.full_sync(&tenant()).unwrap();
    assert!(retry.success);
    assert!(h.remote.get(EntityKind::Recipe, &RecordId::new("R")).is_some());
    assert!(h.cursor().is_some());
}

#[test]
fn test_push_failure_fails_round() {
    let h = Harness::new();
    h.remote.fail_upsert(EntityKind::Ingredient);
    h.local.upsert(ingredient("A", "Butter", ago(60)).into()).unwrap();

    let result = h.engine.full_sync(&tenant()).unwrap();

    assert!(!result.success);
    assert!(result.error_message().unwrap().contains("upsert"));
    assert!(h.cursor().is_none());
}

#[test]
fn test_cursor_never_moves_backwards() {
    let h = Harness::new();
    h.local.upsert(ingredient("A", "Butter", ago(60)).into()).unwrap();
    h.engine.cursor().save(Utc::now() + Duration::days(1)).unwrap();
    let future = h.cursor();

    let result = h.engine.full_sync(&tenant()).unwrap();

    assert!(result.success);
    assert_eq!(h.cursor(), future);
}

#[test]
fn test_cursor_advances_to_round_start() {
    let h = Harness::new();
    h.local.upsert(ingredient("A", "Butter", ago(60)).into()).unwrap();
    let before = Utc::now();

    h.engine.full_sync(&tenant()).unwrap();

    let cursor = h.cursor().unwrap();
    assert!(cursor >= before - Duration::microseconds(1));
    assert!(cursor <= Utc::now());
}

#[test]
fn test_cleared_cursor_picks_up_backdated_remote_rows() {
    let h = Harness::new();
    h.local.upsert(ingredient("A", "Butter", ago(60)).into()).unwrap();
    assert!(h.engine.full_sync(&tenant()).unwrap().success);

    // Imported remotely with a timestamp older than the cursor
    h.remote.insert(ingredient("B", "Flour", ago(3600)));
    let missed = h.engine.full_sync(&tenant()).unwrap();
    assert_eq!(missed.downloaded, 0);

    h.engine.cursor().clear().unwrap();
    let resync = h.engine.full_sync(&tenant()).unwrap();

    assert!(resync.success);
    assert_eq!(resync.downloaded, 1);
    assert_eq!(resync.uploaded, 0);
    assert_eq!(name_of(h.local.get(EntityKind::Ingredient, &RecordId::new("B")).unwrap()), "Flour");
    assert!(h.cursor().is_some());
}

#[test]
fn test_unreadable_cursor_means_full_resync() {
    let h = Harness::new();
    h.local.upsert(ingredient("A", "Butter", ago(60)).into()).unwrap();
    h.remote.insert(ingredient("B", "Flour", ago(7200)));
    fs::write(h.engine.cursor().path(), "garbage").unwrap();

    let result = h.engine.full_sync(&tenant()).unwrap();

    assert!(result.success);
    assert_eq!(result.downloaded, 1);
    assert!(h.cursor().is_some());
}

#[test]
fn test_busy_round_is_rejected_immediately() {
    let remote = InMemoryRemote::new();
    let (gated, entered, release) = GatedRemote::new(remote.clone());
    let h = Harness::with_remote(InMemoryLocalStore::new(), remote, Arc::new(gated));
    let events = h.engine.subscribe();

    let engine = Arc::clone(&h.engine);
    let running = thread::spawn(move || engine.full_sync(&tenant()));

    entered.recv().unwrap();
    assert!(h.engine.is_syncing());
    assert_eq!(h.engine.full_sync(&tenant()), Err(SyncError::Busy));
    assert_eq!(h.engine.push_only(&tenant()), Err(SyncError::Busy));

    release.send(()).unwrap();
    let result = running.join().unwrap().unwrap();
    assert!(result.success);
    assert!(!h.engine.is_syncing());

    let completions = events
        .try_iter()
        .filter(|e| matches!(e, SyncEvent::Completed(_)))
        .count();
    assert_eq!(completions, 1);
}

#[test]
fn test_cancelled_round_stops_and_keeps_cursor() {
    let remote = InMemoryRemote::new();
    remote.insert(ingredient("A", "Butter", ago(60)));
    let local = InMemoryLocalStore::new();
    local.upsert(ingredient("Z", "Local only", ago(60)).into()).unwrap();
    let (gated, entered, release) = GatedRemote::new(remote.clone());
    let h = Harness::with_remote(local, remote, Arc::new(gated));

    let engine = Arc::clone(&h.engine);
    let running = thread::spawn(move || engine.full_sync(&tenant()));

    entered.recv().unwrap();
    h.engine.cancel();
    release.send(()).unwrap();

    let result = running.join().unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(result.error, Some(SyncError::Cancelled));
    assert_eq!(result.downloaded, 0);
    assert!(h.local.get(EntityKind::Ingredient, &RecordId::new("A")).unwrap().is_none());
    assert_eq!(h.remote.upserted_rows(), 0);
    assert!(h.cursor().is_none());

    // The flag does not leak into the next round
    let next = h.engine.full_sync(&tenant()).unwrap();
    assert!(next.success);
    assert_eq!(next.downloaded, 1);
}

#[test]
fn test_not_authenticated_fails_without_work() {
    let h = Harness::new();
    h.remote.set_authenticated(false);
    h.remote.insert(ingredient("A", "Butter", ago(60)));
    let events = h.engine.subscribe();

    let result = h.engine.full_sync(&tenant()).unwrap();

    assert!(!result.success);
    assert_eq!(result.error, Some(SyncError::NotAuthenticated));
    assert!(h.local.is_empty());

    let received: Vec<SyncEvent> = events.try_iter().collect();
    assert_eq!(received, vec![SyncEvent::Completed(result)]);
}

#[test]
fn test_revoked_session_aborts_round() {
    let h = Harness::new();
    h.remote.reject_auth(true);
    h.local.upsert(ingredient("A", "Butter", ago(60)).into()).unwrap();

    let result = h.engine.full_sync(&tenant()).unwrap();

    assert_eq!(result.error, Some(SyncError::NotAuthenticated));
    assert_eq!(result.uploaded, 0);
    assert!(h.cursor().is_none());
}

#[test]
fn test_no_tenant_selected() {
    let h = Harness::new();

    let result = h.engine.full_sync(&TenantId::new("  ")).unwrap();

    assert!(!result.success);
    assert_eq!(result.error, Some(SyncError::NoTenantSelected));
    assert_eq!(result.error_message().as_deref(), Some("No location selected"));
}

#[test]
fn test_malformed_remote_row_is_skipped() {
    let h = Harness::new();
    h.remote.insert(ingredient("A", "Butter", ago(60)));
    h.remote.insert_raw(
        EntityKind::Ingredient,
        json!({
            "id": "broken",
            "location_id": LOCATION,
            "name": ["not", "a", "name"],
            "modified_at": ago(30).to_rfc3339()
        }),
    );

    let result = h.engine.full_sync(&tenant()).unwrap();

    assert!(result.success);
    assert_eq!(result.downloaded, 1);
    assert_eq!(result.skipped, 1);
}

#[test]
fn test_other_locations_are_untouched() {
    let h = Harness::new();
    let mut foreign = ingredient("F", "Someone else's", ago(60));
    foreign.location_id = TenantId::new("loc-2");
    h.remote.insert(foreign.clone());
    h.local.upsert(ingredient("A", "Butter", ago(60)).into()).unwrap();

    let result = h.engine.full_sync(&tenant()).unwrap();

    assert!(result.success);
    assert_eq!(result.downloaded, 0);
    assert!(h.local.get(EntityKind::Ingredient, &foreign.id).unwrap().is_none());
}

#[test]
fn test_pull_only_neither_pushes_nor_saves_cursor() {
    let h = Harness::new();
    h.local.upsert(ingredient("A", "Butter", ago(60)).into()).unwrap();
    h.remote.insert(ingredient("B", "Flour", ago(60)));

    let result = h.engine.pull_only(&tenant()).unwrap();

    assert_eq!(result.mode, SyncMode::PullOnly);
    assert!(result.success);
    assert_eq!(result.downloaded, 1);
    assert_eq!(h.remote.upserted_rows(), 0);
    assert!(h.cursor().is_none());
}

#[test]
fn test_push_only_and_force_upload_all() {
    let h = Harness::new();
    h.local.upsert(ingredient("A", "Butter", ago(7200)).into()).unwrap();
    h.local.upsert(Recipe::new("R", LOCATION, "Beurre blanc").into()).unwrap();
    h.engine.cursor().save(ago(3600)).unwrap();
    let cursor = h.cursor();

    let pushed = h.engine.push_only(&tenant()).unwrap();
    assert!(pushed.success);
    assert_eq!(pushed.uploaded, 1);
    assert!(h.remote.get(EntityKind::Ingredient, &RecordId::new("A")).is_none());

    let forced = h.engine.force_upload_all(&tenant()).unwrap();
    assert_eq!(forced.mode, SyncMode::ForceUploadAll);
    assert!(forced.success);
    assert_eq!(forced.uploaded, 2);
    assert!(h.remote.get(EntityKind::Ingredient, &RecordId::new("A")).is_some());

    assert_eq!(h.cursor(), cursor);
}

#[test]
fn test_progress_is_monotonic_and_completion_is_last() {
    let h = Harness::new();
    h.local.upsert(ingredient("A", "Butter", ago(60)).into()).unwrap();
    let events = h.engine.subscribe();

    h.engine.full_sync(&tenant()).unwrap();

    let received: Vec<SyncEvent> = events.try_iter().collect();
    let percents: Vec<u8> = received
        .iter()
        .filter_map(|e| match e {
            SyncEvent::Progress { percent, .. } => Some(*percent),
            SyncEvent::Completed(_) => None,
        })
        .collect();

    assert_eq!(percents.len(), 8);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last(), Some(&100));
    assert!(matches!(received.last(), Some(SyncEvent::Completed(r)) if r.success));
    assert!(matches!(
        &received[0],
        SyncEvent::Progress { stage, .. } if stage == "Pulling ingredients"
    ));
}

#[test]
fn test_status_reports_pending_work() {
    let h = Harness::new();
    h.local.upsert(ingredient("A", "Butter", ago(60)).into()).unwrap();
    h.local
        .upsert(entree_with_photo("E", h.photo("duck.jpg"), ago(60)).into())
        .unwrap();

    let before = h.engine.status(&tenant()).unwrap();
    assert_eq!(before.last_synced_at, None);
    assert_eq!(before.local_records, 2);
    assert_eq!(before.pending_uploads, 2);
    assert_eq!(before.pending_assets, 1);

    h.engine.full_sync(&tenant()).unwrap();

    let after = h.engine.status(&tenant()).unwrap();
    assert!(after.last_synced_at.is_some());
    assert_eq!(after.pending_assets, 0);
    assert_eq!(after.local_records, 2);
}

#[test]
fn test_sqlite_backed_rounds() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("kitchen.sqlite");
    let remote = InMemoryRemote::new();
    let factory = SqliteLocalStore::factory(&db_path);
    let engine = SyncOrchestrator::new(
        Arc::new(remote.clone()),
        Arc::new(remote.clone()),
        Arc::new(SqliteLocalStore::factory(&db_path)),
        CursorStore::new(dir.path().join("sync-cursor")),
    );

    let t0 = ago(60);
    let photo = dir.path().join("stock.jpg");
    fs::write(&photo, b"jpeg").unwrap();
    {
        let local = factory.open().unwrap();
        local.upsert(ingredient("A", "Butter", t0).into()).unwrap();
        let mut recipe = Recipe::new("R", LOCATION, "Stock");
        recipe.photo = AssetReference::local(&photo);
        recipe.modified_at = t0;
        local.upsert(recipe.into()).unwrap();
    }
    remote.insert(ingredient("A", "Cultured butter", t0 + Duration::seconds(5)));
    remote.insert(ingredient("B", "Flour", t0 + Duration::seconds(1)));

    let first = engine.full_sync(&tenant()).unwrap();
    assert!(first.success, "{:?}", first.error);
    assert_eq!(first.downloaded, 2);
    assert_eq!(first.assets_migrated, 1);
    assert_eq!(first.uploaded, 1);

    let local = factory.open().unwrap();
    assert_eq!(name_of(local.get(EntityKind::Ingredient, &RecordId::new("A")).unwrap()), "Cultured butter");
    let recipe = local.get(EntityKind::Recipe, &RecordId::new("R")).unwrap().unwrap();
    assert!(recipe.asset().unwrap().is_remote());

    let second = engine.full_sync(&tenant()).unwrap();
    assert!(second.success);
    assert_eq!(second.uploaded, 0);
    assert_eq!(second.downloaded, 0);
}
