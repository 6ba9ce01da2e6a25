//! Recipe model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AssetReference, RecordId, TenantId};

/// One ingredient line of a recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeLine {
    pub ingredient_id: RecordId,
    pub quantity: f64,
    #[serde(default)]
    pub unit: String,
}

/// A recipe built from ingredients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: RecordId,
    pub location_id: TenantId,
    pub name: String,
    #[serde(default)]
    pub lines: Vec<RecipeLine>,
    /// Number of portions one batch yields
    #[serde(default)]
    pub portions: u32,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub photo: AssetReference,
    pub modified_at: DateTime<Utc>,
}

impl Recipe {
    pub fn new(id: impl Into<RecordId>, location_id: impl Into<TenantId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location_id: location_id.into(),
            name: name.into(),
            lines: Vec::new(),
            portions: 1,
            instructions: String::new(),
            photo: AssetReference::Empty,
            modified_at: Utc::now(),
        }
    }
}
