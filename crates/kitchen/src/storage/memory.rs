//! In-memory storage implementation
//!
//! Used by tests and by embedders that keep their own persistence. Clones
//! share the same underlying data.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{LocalStore, LocalStoreFactory};
use crate::models::{EntityKind, Record, RecordId, SyncableRecord, TenantId};

type RecordMap = HashMap<(EntityKind, RecordId), Record>;

/// In-memory implementation of [`LocalStore`]
#[derive(Clone, Default)]
pub struct InMemoryLocalStore {
    records: Arc<RwLock<RecordMap>>,
}

impl InMemoryLocalStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose handles all share this store's data
    pub fn factory(&self) -> impl LocalStoreFactory + 'static {
        let store = self.clone();
        move || -> Result<Box<dyn LocalStore>> { Ok(Box::new(store.clone()) as Box<dyn LocalStore>) }
    }

    /// Total number of records of every kind and tenant
    pub fn len(&self) -> usize {
        self.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RecordMap>> {
        self.records
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RecordMap>> {
        self.records
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn select<P>(&self, kind: EntityKind, tenant: &TenantId, keep: P) -> Result<Vec<Record>>
    where
        P: Fn(&Record) -> bool,
    {
        let records = self.read()?;
        let mut selected: Vec<Record> = records
            .iter()
            .filter(|((k, _), r)| *k == kind && r.tenant_id() == tenant && keep(r))
            .map(|(_, r)| r.clone())
            .collect();
        selected.sort_by(|a, b| {
            a.modified_at()
                .cmp(&b.modified_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(selected)
    }
}

impl LocalStore for InMemoryLocalStore {
    fn get(&self, kind: EntityKind, id: &RecordId) -> Result<Option<Record>> {
        Ok(self.read()?.get(&(kind, id.clone())).cloned())
    }

    fn upsert(&self, record: Record) -> Result<()> {
        let key = (record.kind(), record.id().clone());
        self.write()?.insert(key, record);
        Ok(())
    }

    fn list_modified_since(
        &self,
        kind: EntityKind,
        tenant: &TenantId,
        after: DateTime<Utc>,
    ) -> Result<Vec<Record>> {
        self.select(kind, tenant, |r| r.modified_at() > after)
    }

    fn list_all(&self, kind: EntityKind, tenant: &TenantId) -> Result<Vec<Record>> {
        self.select(kind, tenant, |_| true)
    }

    fn count_for_tenant(&self, tenant: &TenantId) -> Result<usize> {
        Ok(self
            .read()?
            .values()
            .filter(|r| r.tenant_id() == tenant)
            .count())
    }
}
