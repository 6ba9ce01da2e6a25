//! Remote multi-tenant store and object storage
//!
//! This module provides:
//! - The [`RemoteStore`] and [`ObjectStorage`] seams the sync engine uses
//! - [`RestClient`], the HTTP implementation of both
//! - [`RemoteSession`], the explicit remote login session
//! - [`InMemoryRemote`], an in-process stand-in for tests

mod client;
mod memory;
mod objects;
mod session;

pub use client::RestClient;
pub use memory::InMemoryRemote;
pub use session::{RemoteSession, StoredSession};

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::Path;

use crate::error::SyncError;
use crate::models::{EntityKind, TenantId};

/// Delta reads and bulk upserts against the remote store
pub trait RemoteStore: Send + Sync {
    /// Whether a usable session exists (no network call)
    fn is_authenticated(&self) -> bool;

    /// All rows of `kind` belonging to `tenant` whose remote modification
    /// time is strictly after `after`, oldest first.
    ///
    /// Rows come back undecoded so one malformed row can be skipped without
    /// losing the rest of the batch.
    fn fetch_since(
        &self,
        kind: EntityKind,
        tenant: &TenantId,
        after: DateTime<Utc>,
    ) -> Result<Vec<Value>, SyncError>;

    /// Insert-or-overwrite `rows` of `kind`, keyed by id
    fn upsert(&self, kind: EntityKind, rows: &[Value]) -> Result<(), SyncError>;
}

/// Remote object storage for binary assets
///
/// Logical paths follow `{entityKind}/{entityId}/{filename}`.
pub trait ObjectStorage: Send + Sync {
    /// Upload the file at `local_path` and return its absolute remote URL
    fn upload(&self, local_path: &Path, logical_path: &str) -> Result<String, SyncError>;

    fn download(&self, logical_path: &str) -> Result<Vec<u8>, SyncError>;

    /// Returns false when nothing was stored under `logical_path`
    fn delete(&self, logical_path: &str) -> Result<bool, SyncError>;
}

/// Remote API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Token response from the auth endpoint
    #[derive(Debug, Deserialize)]
    pub struct TokenResponse {
        pub access_token: String,
        pub refresh_token: Option<String>,
        /// Lifetime in seconds
        pub expires_in: Option<u64>,
        pub user: Option<UserInfo>,
    }

    #[derive(Debug, Deserialize)]
    pub struct UserInfo {
        pub email: Option<String>,
    }

    /// Body of the refresh-token grant
    #[derive(Debug, Serialize)]
    pub struct RefreshRequest<'a> {
        pub refresh_token: &'a str,
    }

    /// Body of the password grant
    #[derive(Debug, Serialize)]
    pub struct PasswordRequest<'a> {
        pub email: &'a str,
        pub password: &'a str,
    }

    /// Response to an object upload
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct UploadResponse {
        pub key: Option<String>,
    }
}
