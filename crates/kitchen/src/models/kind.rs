//! Entity kinds that take part in sync

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of records the sync engine reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Ingredient,
    Recipe,
    Entree,
}

impl EntityKind {
    /// All kinds in dependency order.
    ///
    /// Recipes reference ingredients and entrees reference recipes, so pull
    /// and push always walk this order.
    pub const ALL: [EntityKind; 3] = [EntityKind::Ingredient, EntityKind::Recipe, EntityKind::Entree];

    /// Remote table (and local table) name
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Ingredient => "ingredients",
            EntityKind::Recipe => "recipes",
            EntityKind::Entree => "entrees",
        }
    }

    /// Prefix used for logical object-storage paths
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Ingredient => "ingredient",
            EntityKind::Recipe => "recipe",
            EntityKind::Entree => "entree",
        }
    }

    /// Whether records of this kind carry a binary asset (photo)
    pub fn has_assets(&self) -> bool {
        matches!(self, EntityKind::Recipe | EntityKind::Entree)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}
