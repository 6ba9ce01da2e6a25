//! Object storage over HTTP

use log::debug;
use std::fs;
use std::path::Path;

use super::client::{Failure, RestClient, classify};
use super::ObjectStorage;
use crate::error::SyncError;

/// Largest asset body accepted on download
const MAX_ASSET_BYTES: u64 = 50 * 1024 * 1024;

impl ObjectStorage for RestClient {
    fn upload(&self, local_path: &Path, logical_path: &str) -> Result<String, SyncError> {
        let data = fs::read(local_path).map_err(|e| {
            SyncError::Storage(format!("Failed to read asset {}: {}", local_path.display(), e))
        })?;

        let token = self.access_token()?;
        let url = self.object_url(logical_path);
        let content_type = content_type_for(local_path);

        self.with_retry("Upload", || {
            self.authorize(self.agent.post(&url), &token)
                .header("Content-Type", content_type)
                .header("x-upsert", "true")
                .send(&data[..])
                .map(|_| ())
                .map_err(|e| classify(e, "Upload"))
        })?;

        debug!("Uploaded {} ({} bytes)", logical_path, data.len());
        Ok(self.public_url(logical_path))
    }

    fn download(&self, logical_path: &str) -> Result<Vec<u8>, SyncError> {
        let token = self.access_token()?;
        let url = self.object_url(logical_path);

        self.with_retry("Download", || {
            let mut response = self
                .authorize(self.agent.get(&url), &token)
                .call()
                .map_err(|e| classify(e, "Download"))?;
            response
                .body_mut()
                .with_config()
                .limit(MAX_ASSET_BYTES)
                .read_to_vec()
                .map_err(|e| classify(e, "Download"))
        })
    }

    fn delete(&self, logical_path: &str) -> Result<bool, SyncError> {
        let token = self.access_token()?;
        let url = self.object_url(logical_path);

        self.with_retry("Delete", || {
            match self.authorize(self.agent.delete(&url), &token).call() {
                Ok(_) => Ok(true),
                Err(ureq::Error::StatusCode(404)) => Ok(false),
                Err(e) => Err::<bool, Failure>(classify(e, "Delete")),
            }
        })
    }
}

/// Content type sent with an upload, from the file extension
fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteSession;
    use crate::settings::SyncSettings;
    use tempfile::tempdir;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("/a/duck.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("/a/duck.png")), "image/png");
        assert_eq!(content_type_for(Path::new("/a/menu")), "application/octet-stream");
    }

    #[test]
    fn test_upload_missing_file_fails_before_network() {
        let settings = SyncSettings::from_json(
            r#"{ "remote_url": "https://kitchen.example.co", "api_key": "anon-key" }"#,
        )
        .unwrap();
        let client = RestClient::connect(&settings, RemoteSession::signed_out()).unwrap();
        let dir = tempdir().unwrap();

        let result = client.upload(&dir.path().join("missing.jpg"), "recipe/r-1/missing.jpg");
        assert!(matches!(result, Err(SyncError::Storage(_))));
    }
}
