use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use axum::body::Bytes;
use dashmap::{DashMap, DashSet};
use tokio::fs;
use tracing::info;

use super::MediaStore;
use crate::errors::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct MediaObject {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Bucket names and object ids end up in paths and URLs. Leading dots are
/// reserved for the disk store's metadata files.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let safe = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));

    if safe {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

fn public_url(base_url: &str, bucket: &str, id: &str) -> String {
    format!("{}/media/{}/{}", base_url.trim_end_matches('/'), bucket, id)
}

/// Keeps objects in memory; buckets must be created before use.
pub struct MemoryMediaStore {
    base_url: String,
    buckets: DashSet<String>,
    objects: DashMap<(String, String), MediaObject>,
}

impl MemoryMediaStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            buckets: DashSet::new(),
            objects: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        validate_key(bucket)?;
        self.buckets.insert(bucket.to_string());
        Ok(())
    }

    async fn store(
        &self,
        bytes: Bytes,
        content_type: Option<String>,
        bucket: &str,
        id: &str,
    ) -> Result<String, StoreError> {
        validate_key(bucket)?;
        validate_key(id)?;
        if !self.buckets.contains(bucket) {
            return Err(StoreError::BucketMissing(bucket.to_string()));
        }

        self.objects.insert(
            (bucket.to_string(), id.to_string()),
            MediaObject {
                bytes,
                content_type,
            },
        );

        Ok(public_url(&self.base_url, bucket, id))
    }

    async fn fetch(&self, bucket: &str, id: &str) -> Result<Option<MediaObject>, StoreError> {
        Ok(self
            .objects
            .get(&(bucket.to_string(), id.to_string()))
            .map(|object| object.clone()))
    }

    async fn remove(&self, bucket: &str, id: &str) -> Result<(), StoreError> {
        self.objects.remove(&(bucket.to_string(), id.to_string()));
        Ok(())
    }
}

/// Stores each bucket as a directory under `root`, one file per object.
pub struct LocalMediaStore {
    root: PathBuf,
    base_url: String,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    fn bucket_path(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        validate_key(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, id: &str) -> Result<PathBuf, StoreError> {
        validate_key(id)?;
        Ok(self.bucket_path(bucket)?.join(id))
    }

    /// Sidecar holding the object's content type. Object ids never start
    /// with a dot, so it cannot collide with an object.
    fn content_type_path(&self, bucket: &str, id: &str) -> Result<PathBuf, StoreError> {
        validate_key(id)?;
        Ok(self.bucket_path(bucket)?.join(format!(".{id}.content-type")))
    }
}

async fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let path = self.bucket_path(bucket)?;
        fs::create_dir_all(&path).await?;
        info!("Media bucket ready at {}", path.display());
        Ok(())
    }

    async fn store(
        &self,
        bytes: Bytes,
        content_type: Option<String>,
        bucket: &str,
        id: &str,
    ) -> Result<String, StoreError> {
        let path = self.object_path(bucket, id)?;
        let type_path = self.content_type_path(bucket, id)?;
        if !is_dir(&self.bucket_path(bucket)?).await {
            return Err(StoreError::BucketMissing(bucket.to_string()));
        }

        match content_type {
            Some(content_type) => fs::write(&type_path, content_type).await?,
            None => remove_if_present(&type_path).await?,
        }
        fs::write(&path, &bytes).await?;

        Ok(public_url(&self.base_url, bucket, id))
    }

    async fn fetch(&self, bucket: &str, id: &str) -> Result<Option<MediaObject>, StoreError> {
        let path = self.object_path(bucket, id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let content_type = match fs::read_to_string(self.content_type_path(bucket, id)?).await {
            Ok(content_type) => Some(content_type),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Some(MediaObject {
            bytes,
            content_type,
        }))
    }

    async fn remove(&self, bucket: &str, id: &str) -> Result<(), StoreError> {
        remove_if_present(&self.object_path(bucket, id)?).await?;
        remove_if_present(&self.content_type_path(bucket, id)?).await
    }
}
