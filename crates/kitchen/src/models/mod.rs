//! Domain models for kitchen entities
//!
//! Every entity kind that takes part in sync implements [`SyncableRecord`].
//! The [`Record`] enum carries any one of them through the sync engine.

mod asset;
mod entree;
mod ids;
mod ingredient;
mod kind;
mod recipe;
mod record;

pub use asset::AssetReference;
pub use entree::Entree;
pub use ids::{RecordId, TenantId};
pub use ingredient::Ingredient;
pub use kind::EntityKind;
pub use recipe::{Recipe, RecipeLine};
pub use record::{Record, SyncableRecord};
