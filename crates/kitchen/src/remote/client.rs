//! HTTP client for the remote store

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use ureq::Agent;
use url::Url;

use super::api::{PasswordRequest, RefreshRequest, TokenResponse};
use super::session::{RemoteSession, StoredSession};
use super::RemoteStore;
use crate::error::SyncError;
use crate::models::{EntityKind, TenantId};
use crate::settings::SyncSettings;

/// First retry delay; doubled after every failed attempt
const INITIAL_BACKOFF_MS: u64 = 200;

/// How a failed call should be handled by [`RestClient::with_retry`]
#[derive(Debug)]
pub(super) enum Failure {
    /// Transient; worth another attempt
    Retryable(SyncError),
    Fatal(SyncError),
}

/// Client for the remote REST, auth and object-storage endpoints
///
/// Every call is blocking; the sync engine runs it off the caller's thread.
pub struct RestClient {
    pub(super) agent: Agent,
    pub(super) base_url: String,
    pub(super) api_key: String,
    pub(super) bucket: String,
    session: RemoteSession,
    page_size: usize,
    batch_size: usize,
    max_retries: u32,
}

impl RestClient {
    /// Build a client from validated settings and an explicit session
    pub fn connect(settings: &SyncSettings, session: RemoteSession) -> Result<Self> {
        let base = Url::parse(&settings.remote_url)
            .with_context(|| format!("Invalid remote_url: {}", settings.remote_url))?;

        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(settings.timeout()))
            .build()
            .into();

        Ok(Self {
            agent,
            base_url: base.as_str().trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            bucket: settings.bucket.clone(),
            session,
            page_size: settings.page_size.max(1),
            batch_size: settings.push_batch_size.max(1),
            max_retries: settings.max_retries.max(1),
        })
    }

    pub fn session(&self) -> &RemoteSession {
        &self.session
    }

    /// Sign in with email and password, replacing any current session
    pub fn sign_in(&self, email: &str, password: &str) -> Result<StoredSession, SyncError> {
        let token = self.request_token("password", &PasswordRequest { email, password })?;
        let mut stored = StoredSession::from_token(token, None);
        if stored.email.is_none() {
            stored.email = Some(email.to_string());
        }
        self.session.store(stored.clone())?;
        info!("Signed in as {}", email);
        Ok(stored)
    }

    /// Forget the current session
    pub fn sign_out(&self) -> Result<(), SyncError> {
        self.session.sign_out()?;
        info!("Signed out");
        Ok(())
    }

    /// A usable access token, refreshing it when close to expiry
    pub(super) fn access_token(&self) -> Result<String, SyncError> {
        let current = self.session.current().ok_or(SyncError::NotAuthenticated)?;
        if current.is_fresh() {
            return Ok(current.access_token);
        }

        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or(SyncError::NotAuthenticated)?;

        debug!("Access token expired, refreshing");
        let token = self.request_token("refresh_token", &RefreshRequest { refresh_token })?;
        let mut stored = StoredSession::from_token(token, Some(refresh_token));
        if stored.email.is_none() {
            stored.email = current.email.clone();
        }

        let access_token = stored.access_token.clone();
        self.session.store(stored)?;
        Ok(access_token)
    }

    fn request_token<B: Serialize>(&self, grant: &str, body: &B) -> Result<TokenResponse, SyncError> {
        let mut response = self
            .agent
            .post(&self.token_url(grant))
            .header("apikey", &self.api_key)
            .send_json(body)
            .map_err(|e| match e {
                ureq::Error::StatusCode(400 | 401 | 403) => SyncError::NotAuthenticated,
                e => SyncError::network(format!("Token request failed: {}", e)),
            })?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| SyncError::Serialization(format!("Failed to parse token response: {}", e)))
    }

    /// Attach the API key and bearer token every data request carries
    pub(super) fn authorize<B>(
        &self,
        request: ureq::RequestBuilder<B>,
        token: &str,
    ) -> ureq::RequestBuilder<B> {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", &format!("Bearer {}", token))
    }

    /// Run an idempotent call with exponential backoff and jitter
    pub(super) fn with_retry<T, F>(&self, what: &str, mut call: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Result<T, Failure>,
    {
        let mut delay = Duration::from_millis(INITIAL_BACKOFF_MS);
        let mut attempt = 1;

        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(Failure::Retryable(e)) if attempt < self.max_retries => {
                    warn!("{} failed (attempt {}/{}): {}", what, attempt, self.max_retries, e);
                    let jitter = Duration::from_millis(rand_jitter());
                    std::thread::sleep(delay + jitter);
                    delay *= 2;
                    attempt += 1;
                }
                Err(Failure::Retryable(e)) | Err(Failure::Fatal(e)) => return Err(e),
            }
        }
    }

    fn fetch_page(
        &self,
        token: &str,
        kind: EntityKind,
        tenant: &TenantId,
        after: DateTime<Utc>,
        offset: usize,
    ) -> Result<Vec<Value>, Failure> {
        let url = self.delta_url(kind, tenant, after, offset);
        let mut response = self
            .authorize(self.agent.get(&url), token)
            .call()
            .map_err(|e| classify(e, "Fetch"))?;

        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| classify(e, "Read page"))?;

        serde_json::from_str(&body).map_err(|e| {
            Failure::Fatal(SyncError::Serialization(format!(
                "Failed to parse {} page: {}",
                kind.table(),
                e
            )))
        })
    }

    fn delta_url(
        &self,
        kind: EntityKind,
        tenant: &TenantId,
        after: DateTime<Utc>,
        offset: usize,
    ) -> String {
        let after = after.to_rfc3339_opts(SecondsFormat::Micros, true);
        format!(
            "{}/rest/v1/{}?location_id=eq.{}&modified_at=gt.{}&order=modified_at.asc,id.asc&limit={}&offset={}",
            self.base_url,
            kind.table(),
            urlencoding::encode(tenant.as_str()),
            urlencoding::encode(&after),
            self.page_size,
            offset
        )
    }

    fn upsert_url(&self, kind: EntityKind) -> String {
        format!("{}/rest/v1/{}?on_conflict=id", self.base_url, kind.table())
    }

    fn token_url(&self, grant: &str) -> String {
        format!("{}/auth/v1/token?grant_type={}", self.base_url, grant)
    }

    pub(super) fn object_url(&self, logical_path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            encode_path(logical_path)
        )
    }

    pub(super) fn public_url(&self, logical_path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.bucket,
            encode_path(logical_path)
        )
    }
}

impl RemoteStore for RestClient {
    fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    fn fetch_since(
        &self,
        kind: EntityKind,
        tenant: &TenantId,
        after: DateTime<Utc>,
    ) -> Result<Vec<Value>, SyncError> {
        let token = self.access_token()?;
        let mut rows = Vec::new();

        loop {
            let offset = rows.len();
            let page = self.with_retry("Fetch", || {
                self.fetch_page(&token, kind, tenant, after, offset)
            })?;
            let page_len = page.len();
            rows.extend(page);

            debug!("Fetched {} {} (total {})", page_len, kind.table(), rows.len());

            if page_len < self.page_size {
                break;
            }
        }

        Ok(rows)
    }

    fn upsert(&self, kind: EntityKind, rows: &[Value]) -> Result<(), SyncError> {
        if rows.is_empty() {
            return Ok(());
        }

        let token = self.access_token()?;
        let url = self.upsert_url(kind);

        for chunk in rows.chunks(self.batch_size) {
            self.with_retry("Upsert", || {
                self.authorize(self.agent.post(&url), &token)
                    .header("Prefer", "resolution=merge-duplicates,return=minimal")
                    .send_json(chunk)
                    .map(|_| ())
                    .map_err(|e| classify(e, "Upsert"))
            })?;
            debug!("Upserted {} {}", chunk.len(), kind.table());
        }

        Ok(())
    }
}

/// Map a transport or status failure onto the sync error taxonomy
pub(super) fn classify(err: ureq::Error, what: &str) -> Failure {
    match err {
        ureq::Error::StatusCode(401 | 403) => Failure::Fatal(SyncError::NotAuthenticated),
        ureq::Error::StatusCode(code @ (408 | 429)) => {
            Failure::Retryable(SyncError::network(format!("{} failed: HTTP {}", what, code)))
        }
        ureq::Error::StatusCode(code) if code >= 500 => {
            Failure::Retryable(SyncError::network(format!("{} failed: HTTP {}", what, code)))
        }
        ureq::Error::StatusCode(code) => {
            Failure::Fatal(SyncError::network(format!("{} failed: HTTP {}", what, code)))
        }
        ureq::Error::BadUri(uri) => {
            Failure::Fatal(SyncError::network(format!("{} failed: bad URI {}", what, uri)))
        }
        e => Failure::Retryable(SyncError::network(format!("{} failed: {}", what, e))),
    }
}

/// Percent-encode each segment of a logical object path
fn encode_path(logical_path: &str) -> String {
    logical_path
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}
