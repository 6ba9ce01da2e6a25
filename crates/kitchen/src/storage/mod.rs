//! Local relational store
//!
//! The sync engine talks to the local store only through [`LocalStore`].
//! A [`LocalStoreFactory`] hands out a fresh handle for every sync round so
//! a round never shares a connection with the long-lived CRUD layer.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryLocalStore;
pub use sqlite::SqliteLocalStore;
pub use traits::{LocalStore, LocalStoreFactory};
