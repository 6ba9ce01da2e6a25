//! Ingredient model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RecordId, TenantId};

/// A purchasable ingredient with its unit cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: RecordId,
    pub location_id: TenantId,
    pub name: String,
    /// Purchase unit (e.g. "kg", "case")
    #[serde(default)]
    pub unit: String,
    /// Cost per purchase unit
    #[serde(default)]
    pub unit_cost: f64,
    #[serde(default)]
    pub supplier: Option<String>,
    pub modified_at: DateTime<Utc>,
}

impl Ingredient {
    pub fn new(id: impl Into<RecordId>, location_id: impl Into<TenantId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location_id: location_id.into(),
            name: name.into(),
            unit: String::new(),
            unit_cost: 0.0,
            supplier: None,
            modified_at: Utc::now(),
        }
    }
}
