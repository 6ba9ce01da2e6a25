//! In-memory remote store and object storage for testing

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ObjectStorage, RemoteStore};
use crate::error::SyncError;
use crate::models::{EntityKind, Record, RecordId, SyncableRecord, TenantId};

/// Base of the URLs handed out for uploaded objects
const OBJECT_URL_BASE: &str = "https://objects.test";

#[derive(Default)]
struct RemoteState {
    signed_out: bool,
    tables: HashMap<EntityKind, BTreeMap<String, Value>>,
    objects: HashMap<String, Vec<u8>>,
    failing_fetch: HashSet<EntityKind>,
    failing_upsert: HashSet<EntityKind>,
    failing_uploads: HashSet<String>,
    rejecting_auth: bool,
    upserted_rows: usize,
    upload_calls: usize,
}

/// In-memory implementation of [`RemoteStore`] and [`ObjectStorage`]
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another. Failures can be injected per kind and per uploaded file.
#[derive(Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl InMemoryRemote {
    /// Create an empty remote with a signed-in session
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.lock().signed_out = !authenticated;
    }

    /// Answer every call as if the session had been revoked server-side
    pub fn reject_auth(&self, reject: bool) {
        self.lock().rejecting_auth = reject;
    }

    /// Store a record as a remote row
    pub fn insert(&self, record: impl Into<Record>) {
        let record = record.into();
        if let Ok(row) = record.to_wire() {
            self.insert_raw(record.kind(), row);
        }
    }

    /// Store an arbitrary row, keyed by its `id` field
    pub fn insert_raw(&self, kind: EntityKind, row: Value) {
        let id = row_id(&row).unwrap_or_default();
        self.lock().tables.entry(kind).or_default().insert(id, row);
    }

    pub fn get(&self, kind: EntityKind, id: &RecordId) -> Option<Record> {
        let row = self.lock().tables.get(&kind)?.get(id.as_str())?.clone();
        Record::from_wire(kind, row).ok()
    }

    /// Number of rows of `kind`, decodable or not
    pub fn row_count(&self, kind: EntityKind) -> usize {
        self.lock().tables.get(&kind).map_or(0, BTreeMap::len)
    }

    /// Rows written through [`RemoteStore::upsert`] so far
    pub fn upserted_rows(&self) -> usize {
        self.lock().upserted_rows
    }

    /// Upload attempts so far, failed ones included
    pub fn upload_calls(&self) -> usize {
        self.lock().upload_calls
    }

    pub fn object(&self, logical_path: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(logical_path).cloned()
    }

    pub fn object_url(logical_path: &str) -> String {
        format!("{}/{}", OBJECT_URL_BASE, logical_path)
    }

    pub fn fail_fetch(&self, kind: EntityKind) {
        self.lock().failing_fetch.insert(kind);
    }

    pub fn fail_upsert(&self, kind: EntityKind) {
        self.lock().failing_upsert.insert(kind);
    }

    /// Fail uploads of any file with this name
    pub fn fail_upload(&self, file_name: &str) {
        self.lock().failing_uploads.insert(file_name.to_string());
    }

    /// Remove all injected failures
    pub fn heal(&self) {
        let mut state = self.lock();
        state.failing_fetch.clear();
        state.failing_upsert.clear();
        state.failing_uploads.clear();
        state.rejecting_auth = false;
    }

    fn check_auth(state: &RemoteState) -> Result<(), SyncError> {
        if state.signed_out || state.rejecting_auth {
            return Err(SyncError::NotAuthenticated);
        }
        Ok(())
    }
}

impl RemoteStore for InMemoryRemote {
    fn is_authenticated(&self) -> bool {
        !self.lock().signed_out
    }

    fn fetch_since(
        &self,
        kind: EntityKind,
        tenant: &TenantId,
        after: DateTime<Utc>,
    ) -> Result<Vec<Value>, SyncError> {
        let state = self.lock();
        Self::check_auth(&state)?;
        if state.failing_fetch.contains(&kind) {
            return Err(SyncError::network(format!("simulated fetch failure for {}", kind)));
        }

        let mut rows: Vec<(DateTime<Utc>, Value)> = state
            .tables
            .get(&kind)
            .into_iter()
            .flat_map(|table| table.values())
            .filter(|row| row.get("location_id").and_then(Value::as_str) == Some(tenant.as_str()))
            .filter_map(|row| row_modified_at(row).map(|at| (at, row.clone())))
            .filter(|(at, _)| *at > after)
            .collect();

        rows.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| row_id(&a.1).cmp(&row_id(&b.1))));
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    fn upsert(&self, kind: EntityKind, rows: &[Value]) -> Result<(), SyncError> {
        let mut state = self.lock();
        Self::check_auth(&state)?;
        if state.failing_upsert.contains(&kind) {
            return Err(SyncError::network(format!("simulated upsert failure for {}", kind)));
        }

        for row in rows {
            let id = row_id(row).ok_or_else(|| {
                SyncError::network(format!("{} row without an id rejected", kind))
            })?;
            state.tables.entry(kind).or_default().insert(id, row.clone());
            state.upserted_rows += 1;
        }
        Ok(())
    }
}

impl ObjectStorage for InMemoryRemote {
    fn upload(&self, local_path: &Path, logical_path: &str) -> Result<String, SyncError> {
        let mut state = self.lock();
        Self::check_auth(&state)?;
        state.upload_calls += 1;

        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if state.failing_uploads.contains(file_name) {
            return Err(SyncError::network(format!("simulated upload failure for {}", file_name)));
        }

        let data = fs::read(local_path).map_err(|e| {
            SyncError::Storage(format!("Failed to read asset {}: {}", local_path.display(), e))
        })?;
        state.objects.insert(logical_path.to_string(), data);
        Ok(Self::object_url(logical_path))
    }

    fn download(&self, logical_path: &str) -> Result<Vec<u8>, SyncError> {
        let state = self.lock();
        Self::check_auth(&state)?;
        state
            .objects
            .get(logical_path)
            .cloned()
            .ok_or_else(|| SyncError::network(format!("{} not found", logical_path)))
    }

    fn delete(&self, logical_path: &str) -> Result<bool, SyncError> {
        let mut state = self.lock();
        Self::check_auth(&state)?;
        Ok(state.objects.remove(logical_path).is_some())
    }
}

fn row_id(row: &Value) -> Option<String> {
    row.get("id").and_then(Value::as_str).map(str::to_string)
}

fn row_modified_at(row: &Value) -> Option<DateTime<Utc>> {
    let raw = row.get("modified_at").and_then(Value::as_str)?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
