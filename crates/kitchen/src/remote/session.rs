//! Remote login session
//!
//! Replaces a lazily created global connection: the composition root builds
//! one session, hands it to [`RestClient::connect`](super::RestClient::connect)
//! and signs in or out explicitly.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::api::TokenResponse;

/// Session filename in the Galley config directory
const SESSION_FILE: &str = "session.json";

/// Tokens are treated as expired this many seconds early
const EXPIRY_BUFFER_SECS: i64 = 300;

/// Stored token data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds)
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
}

impl StoredSession {
    /// Whether the access token can still be used as-is
    pub fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > Utc::now().timestamp() + EXPIRY_BUFFER_SECS,
            None => true,
        }
    }

    pub(crate) fn from_token(token: TokenResponse, previous_refresh: Option<&str>) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            expires_at: token
                .expires_in
                .map(|secs| Utc::now().timestamp() + secs as i64),
            email: token.user.and_then(|u| u.email),
        }
    }
}

/// The current remote session, optionally persisted to disk
pub struct RemoteSession {
    token_path: Option<PathBuf>,
    state: RwLock<Option<StoredSession>>,
}

impl RemoteSession {
    /// Load the session from the default location (`session.json` in the
    /// Galley config directory)
    pub fn load() -> Result<Self> {
        let path = config::config_path(SESSION_FILE).context("Could not determine config directory")?;
        Self::from_path(path)
    }

    /// Load the session persisted at `path`; a missing file means signed out
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            Some(read_session(&path)?)
        } else {
            None
        };
        Ok(Self {
            token_path: Some(path),
            state: RwLock::new(state),
        })
    }

    /// An in-memory session that is never written to disk
    pub fn with_token(session: StoredSession) -> Self {
        Self {
            token_path: None,
            state: RwLock::new(Some(session)),
        }
    }

    /// An in-memory session with nobody signed in
    pub fn signed_out() -> Self {
        Self {
            token_path: None,
            state: RwLock::new(None),
        }
    }

    /// Whether there is a fresh token or a refresh token to get one
    pub fn is_authenticated(&self) -> bool {
        self.current()
            .is_some_and(|s| s.is_fresh() || s.refresh_token.is_some())
    }

    /// Snapshot of the current tokens
    pub fn current(&self) -> Option<StoredSession> {
        self.state.read().ok().and_then(|s| s.clone())
    }

    /// Replace the tokens and persist them when backed by a file
    pub fn store(&self, session: StoredSession) -> Result<()> {
        if let Some(path) = &self.token_path {
            config::save_json_file(path, &session)?;
        }
        let mut state = self
            .state
            .write()
            .map_err(|_| anyhow!("session lock poisoned"))?;
        *state = Some(session);
        Ok(())
    }

    /// Forget the tokens (logout)
    pub fn sign_out(&self) -> Result<()> {
        if let Some(path) = &self.token_path
            && path.exists()
        {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove session file: {}", path.display()))?;
        }
        let mut state = self
            .state
            .write()
            .map_err(|_| anyhow!("session lock poisoned"))?;
        *state = None;
        Ok(())
    }
}

fn read_session(path: &Path) -> Result<StoredSession> {
    config::load_json_file(path)
}
