//! Entree (menu item) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AssetReference, RecordId, TenantId};

/// A menu item composed of recipes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entree {
    pub id: RecordId,
    pub location_id: TenantId,
    pub name: String,
    #[serde(default)]
    pub recipe_ids: Vec<RecordId>,
    #[serde(default)]
    pub menu_price: f64,
    #[serde(default)]
    pub photo: AssetReference,
    pub modified_at: DateTime<Utc>,
}

impl Entree {
    pub fn new(id: impl Into<RecordId>, location_id: impl Into<TenantId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location_id: location_id.into(),
            name: name.into(),
            recipe_ids: Vec::new(),
            menu_price: 0.0,
            photo: AssetReference::Empty,
            modified_at: Utc::now(),
        }
    }
}
