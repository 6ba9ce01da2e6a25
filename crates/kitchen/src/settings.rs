//! Sync settings for the composition root
//!
//! Loaded in order of priority (later sources override earlier ones):
//! 1. JSON file (`sync-settings.json` in the Galley config directory, or an
//!    explicit path)
//! 2. Environment variables (`GALLEY_REMOTE_URL`, `GALLEY_API_KEY`,
//!    `GALLEY_BUCKET`, `GALLEY_TENANT_ID`)

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::models::TenantId;

/// Settings filename in the Galley config directory
const SETTINGS_FILE: &str = "sync-settings.json";

/// Default local database filename in the Galley config directory
const DATABASE_FILE: &str = "kitchen.sqlite";

/// Default cursor filename in the Galley config directory
const CURSOR_FILE: &str = "sync-cursor";

/// Everything the sync engine's composition root needs to know
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Base URL of the remote backend (e.g. `https://project.example.co`)
    pub remote_url: String,
    /// Public API key sent with every request
    pub api_key: String,
    /// Object-storage bucket holding migrated assets
    pub bucket: String,
    /// Active location; `None` until the operator picks one
    pub tenant_id: Option<String>,
    /// Local SQLite database (defaults to the config directory)
    pub database_path: Option<PathBuf>,
    /// Cursor file (defaults to the config directory)
    pub cursor_path: Option<PathBuf>,
    /// Rows per delta-read page
    pub page_size: usize,
    /// Rows per bulk upsert request
    pub push_batch_size: usize,
    /// Attempts per idempotent remote call
    pub max_retries: u32,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Minimum seconds between automatic syncs
    pub auto_sync_cooldown_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            remote_url: String::new(),
            api_key: String::new(),
            bucket: "kitchen-assets".to_string(),
            tenant_id: None,
            database_path: None,
            cursor_path: None,
            page_size: 500,
            push_batch_size: 200,
            max_retries: 3,
            timeout_secs: 30,
            auto_sync_cooldown_secs: 300,
        }
    }
}

impl SyncSettings {
    /// Load settings from the config directory and the environment
    pub fn load() -> Result<Self> {
        let settings = if config::config_exists(SETTINGS_FILE) {
            config::load_json(SETTINGS_FILE)?
        } else {
            Self::default()
        };
        settings.with_env().validated()
    }

    /// Load settings from a specific JSON file, then apply the environment
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings: Self = config::load_json_file(path)?;
        settings.with_env().validated()
    }

    /// Parse settings from a JSON string (no environment overrides)
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(json).context("Failed to parse sync settings JSON")?;
        settings.validated()
    }

    fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup (the environment in production)
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("GALLEY_REMOTE_URL") {
            self.remote_url = url;
        }
        if let Some(key) = lookup("GALLEY_API_KEY") {
            self.api_key = key;
        }
        if let Some(bucket) = lookup("GALLEY_BUCKET") {
            self.bucket = bucket;
        }
        if let Some(tenant) = lookup("GALLEY_TENANT_ID") {
            self.tenant_id = Some(tenant);
        }
        self
    }

    /// Check the settings that have no usable default
    pub fn validated(self) -> Result<Self> {
        if self.remote_url.trim().is_empty() {
            bail!("remote_url is not configured (set it in {} or GALLEY_REMOTE_URL)", SETTINGS_FILE);
        }
        let url = Url::parse(&self.remote_url)
            .with_context(|| format!("Invalid remote_url: {}", self.remote_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("remote_url must be http or https, got {}", url.scheme());
        }
        if self.api_key.trim().is_empty() {
            bail!("api_key is not configured (set it in {} or GALLEY_API_KEY)", SETTINGS_FILE);
        }
        if self.page_size == 0 || self.push_batch_size == 0 {
            bail!("page_size and push_batch_size must be greater than zero");
        }
        Ok(self)
    }

    /// The selected tenant; blank when none is configured
    pub fn tenant(&self) -> TenantId {
        TenantId::new(self.tenant_id.clone().unwrap_or_default())
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => config::config_path(DATABASE_FILE).context("Could not determine config directory"),
        }
    }

    pub fn cursor_path(&self) -> Result<PathBuf> {
        match &self.cursor_path {
            Some(path) => Ok(path.clone()),
            None => config::config_path(CURSOR_FILE).context("Could not determine config directory"),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Default settings path (shown to the operator when nothing is configured)
    pub fn default_settings_path() -> Option<PathBuf> {
        config::config_path(SETTINGS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_minimal_settings() {
        let json = r#"{
            "remote_url": "https://kitchen.example.co",
            "api_key": "anon-key"
        }"#;

        let settings = SyncSettings::from_json(json).unwrap();
        assert_eq!(settings.remote_url, "https://kitchen.example.co");
        assert_eq!(settings.page_size, 500);
        assert_eq!(settings.push_batch_size, 200);
        assert_eq!(settings.max_retries, 3);
        assert!(settings.tenant().is_blank());
    }

    #[test]
    fn test_missing_remote_url_is_rejected() {
        let json = r#"{ "api_key": "anon-key" }"#;
        assert!(SyncSettings::from_json(json).is_err());
    }

    #[test]
    fn test_non_http_url_is_rejected() {
        let json = r#"{ "remote_url": "ftp://kitchen.example.co", "api_key": "k" }"#;
        assert!(SyncSettings::from_json(json).is_err());
    }

    #[test]
    fn test_overrides_win_over_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GALLEY_TENANT_ID", "loc-42"),
            ("GALLEY_BUCKET", "photos"),
        ]);

        let settings = SyncSettings {
            remote_url: "https://kitchen.example.co".to_string(),
            api_key: "k".to_string(),
            tenant_id: Some("loc-1".to_string()),
            ..SyncSettings::default()
        }
        .with_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.tenant().as_str(), "loc-42");
        assert_eq!(settings.bucket, "photos");
        assert_eq!(settings.api_key, "k");
    }

    #[test]
    fn test_explicit_paths_are_used() {
        let settings = SyncSettings {
            database_path: Some(PathBuf::from("/tmp/kitchen.sqlite")),
            cursor_path: Some(PathBuf::from("/tmp/cursor")),
            ..SyncSettings::default()
        };
        assert_eq!(settings.database_path().unwrap(), PathBuf::from("/tmp/kitchen.sqlite"));
        assert_eq!(settings.cursor_path().unwrap(), PathBuf::from("/tmp/cursor"));
    }
}
