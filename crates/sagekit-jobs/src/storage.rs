//! Object storage addressing and the [`ObjectStore`] seam.
//!
//! Inputs and outputs of remote jobs live under `s3://bucket/key` prefixes.
//! The store is treated as an opaque blob service with prefix listing.

use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use url::Url;
use walkdir::WalkDir;

/// Location of an object or prefix in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageUri {
    bucket: String,
    key: String,
}

impl StorageUri {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> JobResult<Self> {
        let bucket = bucket.into();
        if bucket.trim().is_empty() {
            return Err(JobError::SpecValidation("storage bucket must not be empty".to_string()));
        }
        let key = key.into().trim_start_matches('/').to_string();
        Ok(Self { bucket, key })
    }

    /// Parse an `s3://bucket/key` string.
    pub fn parse(raw: &str) -> JobResult<Self> {
        let url = Url::parse(raw)
            .map_err(|e| JobError::SpecValidation(format!("could not parse storage uri {raw}: {e}")))?;

        if url.scheme() != "s3" {
            return Err(JobError::SpecValidation(format!("storage uri must use the s3 scheme: {raw}")));
        }

        let bucket = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| JobError::SpecValidation(format!("storage uri has no bucket: {raw}")))?;

        // Take the key from the raw text so it is not percent-encoded.
        let key = raw
            .strip_prefix("s3://")
            .and_then(|rest| rest.split_once('/'))
            .map(|(_, key)| key)
            .unwrap_or_default();

        Self::new(bucket, key)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append a path segment, inserting a single `/` separator.
    #[must_use]
    pub fn join(&self, segment: &str) -> Self {
        let segment = segment.trim_start_matches('/');
        let key = if self.key.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{}", self.key.trim_end_matches('/'), segment)
        };
        Self { bucket: self.bucket.clone(), key }
    }

    /// Last non-empty segment of the key.
    pub fn file_name(&self) -> Option<&str> {
        self.key.trim_end_matches('/').rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// Key of `self` relative to `prefix`, if `self` lives under it.
    ///
    /// A uri equal to the prefix yields an empty string.
    pub fn relative_to(&self, prefix: &StorageUri) -> Option<String> {
        if self.bucket != prefix.bucket {
            return None;
        }
        let base = prefix.key.trim_end_matches('/');
        if base.is_empty() {
            return Some(self.key.clone());
        }
        let rest = self.key.strip_prefix(base)?;
        if rest.is_empty() {
            return Some(String::new());
        }
        rest.strip_prefix('/').map(ToString::to_string)
    }

    /// Whether `self` lies under `prefix` on a segment boundary.
    pub fn is_under(&self, prefix: &StorageUri) -> bool {
        self.relative_to(prefix).is_some()
    }
}

impl fmt::Display for StorageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

impl FromStr for StorageUri {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StorageUri {
    type Error = JobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StorageUri> for String {
    fn from(value: StorageUri) -> Self {
        value.to_string()
    }
}

/// Blob storage with prefix listing.
///
/// Implementors provide `put`, `get` and `list`; upload and download of
/// local trees are built on top of those.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, uri: &StorageUri, data: Bytes) -> JobResult<()>;

    async fn get(&self, uri: &StorageUri) -> JobResult<Bytes>;

    /// All objects under `prefix` (segment boundary), sorted by key.
    async fn list(&self, prefix: &StorageUri) -> JobResult<Vec<StorageUri>>;

    async fn exists(&self, uri: &StorageUri) -> JobResult<bool> {
        Ok(self.list(uri).await?.iter().any(|u| u == uri))
    }

    /// Upload a local file or directory tree under `dest`.
    ///
    /// A single file lands at `dest/<file name>` and that uri is returned;
    /// a directory keeps its relative layout and `dest` is returned.
    async fn upload(&self, local: &Path, dest: &StorageUri) -> JobResult<StorageUri> {
        if !local.exists() {
            return Err(JobError::SpecValidation(format!(
                "local path does not exist: {}",
                local.display()
            )));
        }

        if local.is_file() {
            let name = local
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| JobError::SpecValidation(format!("invalid file name: {}", local.display())))?;
            let target = dest.join(name);
            let data = tokio::fs::read(local).await?;
            self.put(&target, Bytes::from(data)).await?;
            debug!(local = %local.display(), target = %target, "uploaded file");
            return Ok(target);
        }

        for entry in WalkDir::new(local).sort_by_file_name() {
            let entry = entry.map_err(|e| JobError::Storage(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(local)
                .map_err(|e| JobError::Storage(e.to_string()))?;
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let target = dest.join(&rel);
            let data = tokio::fs::read(entry.path()).await?;
            self.put(&target, Bytes::from(data)).await?;
            debug!(local = %entry.path().display(), target = %target, "uploaded file");
        }

        Ok(dest.clone())
    }

    /// Fetch every object under `prefix` into `local_dir`, keeping relative paths.
    async fn download(&self, prefix: &StorageUri, local_dir: &Path) -> JobResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        for uri in self.list(prefix).await? {
            let rel = match uri.relative_to(prefix) {
                Some(rel) if !rel.is_empty() => rel,
                _ => uri.file_name().unwrap_or("object").to_string(),
            };
            let path = local_dir.join(&rel);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let data = self.get(&uri).await?;
            tokio::fs::write(&path, &data).await?;
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryObjectStore;
    use tempfile::TempDir;

    #[test]
    fn test_parse_bucket_and_key() {
        let uri = StorageUri::parse("s3://my-bucket/batch/input/part-1.csv").unwrap();
        assert_eq!(uri.bucket(), "my-bucket");
        assert_eq!(uri.key(), "batch/input/part-1.csv");
        assert_eq!(uri.file_name(), Some("part-1.csv"));
        assert_eq!(uri.to_string(), "s3://my-bucket/batch/input/part-1.csv");
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(StorageUri::parse("https://example.com/x").is_err());
        assert!(StorageUri::parse("not a uri").is_err());
    }

    #[test]
    fn test_relative_to_respects_segment_boundaries() {
        let prefix = StorageUri::parse("s3://b/batch").unwrap();
        let inside = StorageUri::parse("s3://b/batch/a.csv").unwrap();
        let sibling = StorageUri::parse("s3://b/batch2/a.csv").unwrap();

        assert_eq!(inside.relative_to(&prefix).as_deref(), Some("a.csv"));
        assert!(sibling.relative_to(&prefix).is_none());
        assert_eq!(prefix.relative_to(&prefix).as_deref(), Some(""));
    }

    #[test]
    fn test_join_normalizes_slashes() {
        let base = StorageUri::parse("s3://b/out/").unwrap();
        assert_eq!(base.join("/job-1").to_string(), "s3://b/out/job-1");
        let root = StorageUri::new("b", "").unwrap();
        assert_eq!(root.join("x").key(), "x");
    }

    #[tokio::test]
    async fn test_upload_and_download_tree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("a.csv"), "1,2\n").unwrap();
        std::fs::write(src.join("nested").join("b.csv"), "3,4\n").unwrap();

        let store = MemoryObjectStore::new();
        let dest = StorageUri::parse("s3://bucket/inputs").unwrap();
        store.upload(&src, &dest).await.unwrap();

        let listed = store.list(&dest).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(store.exists(&dest.join("nested/b.csv")).await.unwrap());

        let out = temp.path().join("out");
        let files = store.download(&dest, &out).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(std::fs::read_to_string(out.join("nested").join("b.csv")).unwrap(), "3,4\n");
    }

    #[tokio::test]
    async fn test_upload_missing_path_is_validation_error() {
        let temp = TempDir::new().unwrap();
        let store = MemoryObjectStore::new();
        let dest = StorageUri::parse("s3://bucket/x").unwrap();
        let err = store.upload(&temp.path().join("missing"), &dest).await.unwrap_err();
        assert!(matches!(err, JobError::SpecValidation(_)));
    }
}
