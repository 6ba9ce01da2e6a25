//! Asset references held by asset-bearing records

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A record field that points at a binary asset (a photo)
///
/// Stored and sent over the wire as a nullable string. Migration is
/// one-directional: once a field holds a remote URL it never goes back to a
/// local path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum AssetReference {
    #[default]
    Empty,
    /// A file on this machine's disk that has not been uploaded yet
    Local(PathBuf),
    /// An absolute URL into remote object storage
    Remote(String),
}

impl AssetReference {
    /// Classify a raw field value
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            AssetReference::Empty
        } else if is_remote_url(value) {
            AssetReference::Remote(value.to_string())
        } else if let Some(path) = value.strip_prefix("file://") {
            AssetReference::Local(PathBuf::from(path))
        } else {
            AssetReference::Local(PathBuf::from(value))
        }
    }

    pub fn local(path: impl AsRef<Path>) -> Self {
        AssetReference::Local(path.as_ref().to_path_buf())
    }

    pub fn remote(url: impl Into<String>) -> Self {
        AssetReference::Remote(url.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, AssetReference::Empty)
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, AssetReference::Remote(_))
    }

    /// The local path, if this reference still points at the local disk
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            AssetReference::Local(path) => Some(path),
            _ => None,
        }
    }

    /// Raw string form, `None` when empty
    pub fn to_value(&self) -> Option<String> {
        match self {
            AssetReference::Empty => None,
            AssetReference::Local(path) => Some(path.to_string_lossy().into_owned()),
            AssetReference::Remote(url) => Some(url.clone()),
        }
    }

    /// Pick the value to keep when a newer incoming version replaces `self`.
    ///
    /// A migrated URL is never replaced by a local path: the incoming path
    /// belongs to whichever machine wrote it and is meaningless here.
    pub fn keep_migrated(&self, incoming: AssetReference) -> AssetReference {
        match (self, &incoming) {
            (AssetReference::Remote(_), AssetReference::Local(_)) => self.clone(),
            _ => incoming,
        }
    }
}

/// Prefix check for remote asset URLs
pub(crate) fn is_remote_url(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}

impl From<Option<String>> for AssetReference {
    fn from(value: Option<String>) -> Self {
        value.as_deref().map(AssetReference::parse).unwrap_or_default()
    }
}

impl From<AssetReference> for Option<String> {
    fn from(value: AssetReference) -> Self {
        value.to_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_classifies_values() {
        assert_eq!(AssetReference::parse(""), AssetReference::Empty);
        assert_eq!(AssetReference::parse("  "), AssetReference::Empty);
        assert_eq!(
            AssetReference::parse("https://cdn.example.com/entree/1/a.jpg"),
            AssetReference::remote("https://cdn.example.com/entree/1/a.jpg")
        );
        assert_eq!(
            AssetReference::parse("/home/chef/photos/a.jpg"),
            AssetReference::local("/home/chef/photos/a.jpg")
        );
        assert_eq!(
            AssetReference::parse("file:///tmp/a.jpg"),
            AssetReference::local("/tmp/a.jpg")
        );
    }

    #[test]
    fn test_serde_as_nullable_string() {
        let json = serde_json::to_string(&AssetReference::remote("https://x/y.png")).unwrap();
        assert_eq!(json, "\"https://x/y.png\"");

        let empty: AssetReference = serde_json::from_str("null").unwrap();
        assert!(empty.is_empty());
        assert_eq!(serde_json::to_string(&AssetReference::Empty).unwrap(), "null");
    }

    #[test]
    fn test_keep_migrated_never_regresses_to_local_path() {
        let migrated = AssetReference::remote("https://x/entree/1/a.jpg");
        let incoming = AssetReference::local("/other/machine/a.jpg");
        assert_eq!(migrated.keep_migrated(incoming), migrated);

        let newer_url = AssetReference::remote("https://x/entree/1/b.jpg");
        assert_eq!(migrated.keep_migrated(newer_url.clone()), newer_url);

        let local = AssetReference::local("/tmp/a.jpg");
        assert_eq!(local.keep_migrated(AssetReference::Empty), AssetReference::Empty);
    }
}
