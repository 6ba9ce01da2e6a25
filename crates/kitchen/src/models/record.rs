//! The syncable-record capability and the record enum

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;

use super::{AssetReference, EntityKind, Entree, Ingredient, Recipe, RecordId, TenantId};

/// Capability shared by every entity kind the sync engine reconciles
pub trait SyncableRecord {
    /// Stable id, identical in the local and the remote store
    fn id(&self) -> &RecordId;

    /// Tenant (location) the record belongs to
    fn tenant_id(&self) -> &TenantId;

    /// Last modification time (UTC)
    fn modified_at(&self) -> DateTime<Utc>;

    fn kind(&self) -> EntityKind;
}

macro_rules! impl_syncable {
    ($ty:ty, $kind:expr) => {
        impl SyncableRecord for $ty {
            fn id(&self) -> &RecordId {
                &self.id
            }

            fn tenant_id(&self) -> &TenantId {
                &self.location_id
            }

            fn modified_at(&self) -> DateTime<Utc> {
                self.modified_at
            }

            fn kind(&self) -> EntityKind {
                $kind
            }
        }
    };
}

impl_syncable!(Ingredient, EntityKind::Ingredient);
impl_syncable!(Recipe, EntityKind::Recipe);
impl_syncable!(Entree, EntityKind::Entree);

/// A record of any kind
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Ingredient(Ingredient),
    Recipe(Recipe),
    Entree(Entree),
}

impl Record {
    /// Decode a remote wire row of the given kind
    pub fn from_wire(kind: EntityKind, row: Value) -> serde_json::Result<Self> {
        Ok(match kind {
            EntityKind::Ingredient => Record::Ingredient(serde_json::from_value(row)?),
            EntityKind::Recipe => Record::Recipe(serde_json::from_value(row)?),
            EntityKind::Entree => Record::Entree(serde_json::from_value(row)?),
        })
    }

    /// Encode into the remote wire representation
    pub fn to_wire(&self) -> serde_json::Result<Value> {
        match self {
            Record::Ingredient(r) => serde_json::to_value(r),
            Record::Recipe(r) => serde_json::to_value(r),
            Record::Entree(r) => serde_json::to_value(r),
        }
    }

    /// The asset field, for kinds that carry one
    pub fn asset(&self) -> Option<&AssetReference> {
        match self {
            Record::Ingredient(_) => None,
            Record::Recipe(r) => Some(&r.photo),
            Record::Entree(r) => Some(&r.photo),
        }
    }

    /// Replace the asset field and stamp the record as modified at `at`.
    ///
    /// No-op for kinds without assets.
    pub fn set_asset(&mut self, asset: AssetReference, at: DateTime<Utc>) {
        let slot = match self {
            Record::Ingredient(_) => return,
            Record::Recipe(r) => {
                r.modified_at = at;
                &mut r.photo
            }
            Record::Entree(r) => {
                r.modified_at = at;
                &mut r.photo
            }
        };
        *slot = asset;
    }

    /// Whether both records hold the same fields, comparing timestamps at
    /// the microsecond precision the stores keep
    pub fn same_content(&self, other: &Record) -> bool {
        self.at_stored_precision() == other.at_stored_precision()
    }

    fn at_stored_precision(&self) -> Record {
        let mut record = self.clone();
        let at = record.modified_at().trunc_subsecs(6);
        match &mut record {
            Record::Ingredient(r) => r.modified_at = at,
            Record::Recipe(r) => r.modified_at = at,
            Record::Entree(r) => r.modified_at = at,
        }
        record
    }

    /// Take `incoming`'s fields while keeping an already-migrated asset URL
    pub fn adopt(&self, incoming: Record) -> Record {
        let mut adopted = incoming;
        let kept = match (self.asset(), adopted.asset()) {
            (Some(current), Some(next)) => Some(current.keep_migrated(next.clone())),
            _ => None,
        };
        if let Some(kept) = kept {
            match &mut adopted {
                Record::Recipe(r) => r.photo = kept,
                Record::Entree(r) => r.photo = kept,
                Record::Ingredient(_) => {}
            }
        }
        adopted
    }
}

impl SyncableRecord for Record {
    fn id(&self) -> &RecordId {
        match self {
            Record::Ingredient(r) => r.id(),
            Record::Recipe(r) => r.id(),
            Record::Entree(r) => r.id(),
        }
    }

    fn tenant_id(&self) -> &TenantId {
        match self {
            Record::Ingredient(r) => r.tenant_id(),
            Record::Recipe(r) => r.tenant_id(),
            Record::Entree(r) => r.tenant_id(),
        }
    }

    fn modified_at(&self) -> DateTime<Utc> {
        match self {
            Record::Ingredient(r) => r.modified_at(),
            Record::Recipe(r) => r.modified_at(),
            Record::Entree(r) => r.modified_at(),
        }
    }

    fn kind(&self) -> EntityKind {
        match self {
            Record::Ingredient(_) => EntityKind::Ingredient,
            Record::Recipe(_) => EntityKind::Recipe,
            Record::Entree(_) => EntityKind::Entree,
        }
    }
}

impl From<Ingredient> for Record {
    fn from(r: Ingredient) -> Self {
        Record::Ingredient(r)
    }
}

impl From<Recipe> for Record {
    fn from(r: Recipe) -> Self {
        Record::Recipe(r)
    }
}

impl From<Entree> for Record {
    fn from(r: Entree) -> Self {
        Record::Entree(r)
    }
}
