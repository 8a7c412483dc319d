//! Content-addressed object storage.
//!
//! Keys are `<category>/<segments>` with the category drawn from a fixed
//! allowlist. [`FsObjectStore`] keeps objects under a root directory and
//! writes each one atomically, so a put interrupted by a crash leaves either
//! the old object or the new one, never a torn file.
//!
//! Every category except `ocr` is write-once: a put with different bytes at an
//! occupied key fails with [`ObjectStoreError::Conflict`]. Engine output under
//! `ocr/` may be fetched again after a crash and is replaced.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::hashing::sha256_hex;
use crate::ids::{DocId, RunId, Sha256Hex};

const CATEGORIES: [&str; 5] = ["raw", "parse", "asset", "run", "ocr"];

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("size mismatch for {key}: wrote {expected} bytes, found {actual}")]
    SizeMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },
    #[error("object {key} already holds different content (stored {stored}, new {new})")]
    Conflict {
        key: String,
        stored: String,
        new: String,
    },
    #[error("object store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Validated object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn parse(value: &str) -> Result<Self, ObjectStoreError> {
        let invalid = || ObjectStoreError::InvalidKey(value.to_string());
        let mut segments = value.split('/');
        let category = segments.next().ok_or_else(invalid)?;
        if !CATEGORIES.contains(&category) {
            return Err(invalid());
        }
        let mut count = 0;
        for segment in segments {
            if !is_safe_segment(segment) {
                return Err(invalid());
            }
            count += 1;
        }
        if count == 0 {
            return Err(invalid());
        }
        Ok(Self(value.to_string()))
    }

    /// `raw/sha256/<sha>`
    pub fn raw(sha: &Sha256Hex) -> Self {
        Self(format!("raw/sha256/{}", sha))
    }

    /// `asset/sha256/<sha>`
    pub fn asset(sha: &Sha256Hex) -> Self {
        Self(format!("asset/sha256/{}", sha))
    }

    /// `parse/<doc>/<ver>/<file>`
    pub fn parse_output(doc: &DocId, version: i64, file: &str) -> Result<Self, ObjectStoreError> {
        Self::parse(&format!("parse/{}/{}/{}", doc, version, file))
    }

    /// `ocr/<doc>/<ver>/<file>`
    pub fn ocr_output(doc: &DocId, version: i64, file: &str) -> Result<Self, ObjectStoreError> {
        Self::parse(&format!("ocr/{}/{}/{}", doc, version, file))
    }

    /// `run/<run>/<rel>`; `rel` may span several segments.
    pub fn run_file(run: &RunId, rel: &str) -> Result<Self, ObjectStoreError> {
        Self::parse(&format!("run/{}/{}", run, rel))
    }

    /// `run/<run>/<doc>/<ver>/<file>`
    pub fn run_output(
        run: &RunId,
        doc: &DocId,
        version: i64,
        file: &str,
    ) -> Result<Self, ObjectStoreError> {
        Self::run_file(run, &format!("{}/{}/{}", doc, version, file))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn category(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    pub fn is_write_once(&self) -> bool {
        self.category() != "ocr"
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b':'))
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = ObjectStoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObjectKey> for String {
    fn from(key: ObjectKey) -> Self {
        key.0
    }
}

/// Result of a verified put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: ObjectKey,
    pub uri: String,
    /// SHA-256 of the stored bytes.
    pub etag: String,
    pub length: u64,
    pub content_type: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` and verify the stored length.
    async fn put(
        &self,
        key: &ObjectKey,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredObject, ObjectStoreError>;

    async fn get(&self, key: &ObjectKey) -> Result<Vec<u8>, ObjectStoreError>;

    /// Stored length, or `None` when absent.
    async fn head(&self, key: &ObjectKey) -> Result<Option<u64>, ObjectStoreError>;
}

/// Object store on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &ObjectKey) -> PathBuf {
        key.as_str()
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    pub fn uri_for(&self, key: &ObjectKey) -> String {
        format!("file://{}", self.path_for(key).display())
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        key: &ObjectKey,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredObject, ObjectStoreError> {
        let path = self.path_for(key);
        let etag = sha256_hex(bytes);
        let expected = bytes.len() as u64;

        let stored_etag = match tokio::fs::read(&path).await {
            Ok(existing) => Some(sha256_hex(&existing)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        match stored_etag {
            Some(stored) if stored == etag => debug!("Object {} already stored", key),
            Some(stored) if key.is_write_once() => {
                return Err(ObjectStoreError::Conflict {
                    key: key.to_string(),
                    stored,
                    new: etag,
                });
            }
            stored => {
                if stored.is_some() {
                    warn!("Replacing object {} with different content", key);
                }
                let data = bytes.to_vec();
                let target = path.clone();
                tokio::task::spawn_blocking(move || write_atomic(&target, &data))
                    .await
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
            }
        }

        let actual = self
            .head(key)
            .await?
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))?;
        if actual != expected {
            return Err(ObjectStoreError::SizeMismatch {
                key: key.to_string(),
                expected,
                actual,
            });
        }

        Ok(StoredObject {
            key: key.clone(),
            uri: self.uri_for(key),
            etag,
            length: actual,
            content_type: content_type.to_string(),
        })
    }

    async fn get(&self, key: &ObjectKey) -> Result<Vec<u8>, ObjectStoreError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn head(&self, key: &ObjectKey) -> Result<Option<u64>, ObjectStoreError> {
        match tokio::fs::metadata(self.path_for(key)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write to a temp file in the target directory, then rename over the target.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> DocId {
        DocId::from_raw_sha(&Sha256Hex::digest(b"doc"))
    }

    #[test]
    fn test_key_constructors() {
        let sha = Sha256Hex::digest(b"x");
        assert_eq!(ObjectKey::raw(&sha).as_str(), format!("raw/sha256/{}", sha));
        assert_eq!(ObjectKey::asset(&sha).category(), "asset");

        let key = ObjectKey::parse_output(&doc(), 2, "marker.json").unwrap();
        assert_eq!(key.as_str(), format!("parse/{}/2/marker.json", doc()));

        let run = RunId::parse("run-1").unwrap();
        let memo = ObjectKey::run_file(&run, "memo.md").unwrap();
        assert_eq!(memo.as_str(), "run/run-1/memo.md");
        assert!(ObjectKey::run_file(&run, "a/b.json").is_ok());

        let memo = ObjectKey::run_output(&run, &doc(), 3, "memo.md").unwrap();
        assert_eq!(memo.as_str(), format!("run/run-1/{}/3/memo.md", doc()));
        assert!(memo.is_write_once());
        assert!(!ObjectKey::ocr_output(&doc(), 1, "p0001.png").unwrap().is_write_once());
    }

    #[test]
    fn test_rejects_unsafe_keys() {
        for bad in [
            "tmp/x",
            "raw",
            "raw/",
            "raw//x",
            "raw/../etc",
            "raw/./x",
            "run/r/a\\b",
            "parse/doc/1/with space",
            "/raw/x",
        ] {
            assert!(ObjectKey::parse(bad).is_err(), "{bad} should be rejected");
        }
        let run = RunId::parse("run-1").unwrap();
        assert!(ObjectKey::run_file(&run, "../escape").is_err());
    }

    #[tokio::test]
    async fn test_put_get_head_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let key = ObjectKey::raw(&Sha256Hex::digest(b"hello"));

        assert_eq!(store.head(&key).await.unwrap(), None);
        assert!(matches!(
            store.get(&key).await,
            Err(ObjectStoreError::NotFound(_))
        ));

        let stored = store.put(&key, b"hello", "text/plain").await.unwrap();
        assert_eq!(stored.length, 5);
        assert_eq!(stored.etag, sha256_hex(b"hello"));
        assert!(stored.uri.starts_with("file://"));
        assert!(stored.uri.ends_with(key.as_str()));
        assert_eq!(store.get(&key).await.unwrap(), b"hello");
        assert_eq!(store.head(&key).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_identical_put_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let run = RunId::parse("r1").unwrap();
        let key = ObjectKey::run_file(&run, "memo.md").unwrap();

        store.put(&key, b"memo", "text/markdown").await.unwrap();
        let modified = std::fs::metadata(store.path_for(&key))
            .unwrap()
            .modified()
            .unwrap();
        let again = store.put(&key, b"memo", "text/markdown").await.unwrap();
        assert_eq!(again.length, 4);
        assert_eq!(
            std::fs::metadata(store.path_for(&key))
                .unwrap()
                .modified()
                .unwrap(),
            modified
        );

    }

    #[tokio::test]
    async fn test_write_once_key_refuses_new_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let run = RunId::parse("r1").unwrap();
        let key = ObjectKey::run_output(&run, &doc(), 1, "memo.md").unwrap();

        store.put(&key, b"memo", "text/markdown").await.unwrap();
        let err = store.put(&key, b"memo v2", "text/markdown").await.unwrap_err();
        match err {
            ObjectStoreError::Conflict { stored, new, .. } => {
                assert_eq!(stored, sha256_hex(b"memo"));
                assert_eq!(new, sha256_hex(b"memo v2"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(store.get(&key).await.unwrap(), b"memo");
    }

    #[tokio::test]
    async fn test_ocr_output_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let key = ObjectKey::ocr_output(&doc(), 1, "p0001.raw.json").unwrap();

        store.put(&key, b"{}", "application/json").await.unwrap();
        let stored = store
            .put(&key, b"{\"text\":1}", "application/json")
            .await
            .unwrap();
        assert_eq!(stored.etag, sha256_hex(b"{\"text\":1}"));
        assert_eq!(store.get(&key).await.unwrap(), b"{\"text\":1}");
    }
}
