//! Sync error taxonomy

use thiserror::Error;

/// Failures surfaced by the sync engine and its remote collaborators
///
/// Cloneable so the terminal failure of a round can travel inside the
/// completion event to every observer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// No valid remote session
    #[error("Not authenticated with the remote store")]
    NotAuthenticated,

    /// No tenant/location has been selected
    #[error("No location selected")]
    NoTenantSelected,

    /// Another sync round is already running in this process
    #[error("Sync already in progress")]
    Busy,

    /// The round was cancelled between two steps
    #[error("Sync cancelled")]
    Cancelled,

    /// A single remote call failed
    #[error("Network error: {0}")]
    Network(String),

    /// A local or remote record could not be decoded or encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The local store or the cursor file failed
    #[error("Storage error: {0}")]
    Storage(String),
}

impl SyncError {
    pub fn network(message: impl Into<String>) -> Self {
        SyncError::Network(message.into())
    }

    /// Whether this failure stops the whole round.
    ///
    /// Network and serialization failures are scoped to one kind, record or
    /// asset; everything else leaves nothing useful to do.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncError::Network(_) | SyncError::Serialization(_))
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(e: anyhow::Error) -> Self {
        SyncError::Storage(format!("{:#}", e))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}
