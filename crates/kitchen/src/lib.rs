//! Kitchen crate - Offline-first sync for kitchen data
//!
//! This crate reconciles a local SQLite store with a remote multi-tenant
//! store under intermittent connectivity:
//! - Domain models (Ingredient, Recipe, Entree) and asset references
//! - Local store trait with SQLite and in-memory backends
//! - Remote REST client, login session and object storage
//! - Delta sync engine with last-writer-wins conflict resolution
//!
//! Everything is blocking and runtime-agnostic; callers run rounds on a
//! thread of their choosing and observe them through channels.

pub mod error;
pub mod models;
pub mod remote;
pub mod settings;
pub mod storage;
pub mod sync;

pub use error::SyncError;
pub use models::{
    AssetReference, EntityKind, Entree, Ingredient, Recipe, RecipeLine, Record, RecordId,
    SyncableRecord, TenantId,
};
pub use remote::{InMemoryRemote, ObjectStorage, RemoteSession, RemoteStore, RestClient, StoredSession};
pub use settings::SyncSettings;
pub use storage::{InMemoryLocalStore, LocalStore, LocalStoreFactory, SqliteLocalStore};
pub use sync::{
    // Round execution
    SyncEvent, SyncEvents, SyncMode, SyncOrchestrator, SyncResult, SyncStatus, CancelFlag,
    // Engine components
    AssetMigrator, ConflictDecision, CursorStore, DeltaFetcher, DeltaPusher, resolve,
    effective_cursor,
    // Auto-sync cooldown
    cooldown_elapsed,
};
