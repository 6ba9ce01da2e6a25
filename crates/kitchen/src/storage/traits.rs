//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{EntityKind, Record, RecordId, TenantId};

/// Local store operations needed by the sync engine
///
/// Entity CRUD and business validation live outside the engine; this trait
/// only covers what sync reads, compares and writes.
pub trait LocalStore: Send + Sync {
    /// Get a record by kind and id
    fn get(&self, kind: EntityKind, id: &RecordId) -> Result<Option<Record>>;

    /// Insert or overwrite a record, keyed by id
    fn upsert(&self, record: Record) -> Result<()>;

    /// Records of `kind` for `tenant` modified strictly after `after`,
    /// oldest first
    fn list_modified_since(
        &self,
        kind: EntityKind,
        tenant: &TenantId,
        after: DateTime<Utc>,
    ) -> Result<Vec<Record>>;

    /// Every record of `kind` for `tenant`, oldest first
    fn list_all(&self, kind: EntityKind, tenant: &TenantId) -> Result<Vec<Record>>;

    /// Number of records of any kind belonging to `tenant`
    fn count_for_tenant(&self, tenant: &TenantId) -> Result<usize>;
}

/// Opens a short-lived [`LocalStore`] handle for one sync round
pub trait LocalStoreFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn LocalStore>>;
}

impl<F> LocalStoreFactory for F
where
    F: Fn() -> Result<Box<dyn LocalStore>> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn LocalStore>> {
        self()
    }
}
