//! Backing stores behind the gateway.
//!
//! Each concern is a trait so the service can run entirely in process
//! (DashMap backends) or against external systems (Elasticsearch, Redis,
//! a media directory on disk).

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;

use crate::{errors::StoreError, filter::ContentFilter, geo::GeoQuery, models::Post};

pub mod archive;
pub mod cache;
pub mod credentials;
pub mod elastic;
pub mod media;
pub mod posts;

pub use archive::MemoryPostArchive;
pub use cache::{MemoryQueryCache, RedisQueryCache, search_key};
pub use credentials::MemoryCredentialStore;
pub use elastic::{ElasticCredentialStore, ElasticPostIndex};
pub use media::{LocalMediaStore, MediaObject, MemoryMediaStore};
pub use posts::MemoryPostIndex;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns `false` when the username is already taken.
    async fn add_user(&self, username: &str, password: &str) -> Result<bool, StoreError>;

    async fn check_user(&self, username: &str, password: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait PostIndex: Send + Sync {
    /// Creates the index with its geo mapping if it does not exist yet.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    async fn index(&self, post: &Post) -> Result<(), StoreError>;

    /// Posts within the query radius that pass `filter`, nearest first, at
    /// most `limit` of them. Filtered posts never take up a result slot.
    async fn search(
        &self,
        query: &GeoQuery,
        limit: usize,
        filter: &ContentFilter,
    ) -> Result<Vec<Post>, StoreError>;
}

/// Secondary write-only copy of every post, laid out as wide-column rows.
#[async_trait]
pub trait PostArchive: Send + Sync {
    async fn append(&self, post: &Post) -> Result<(), StoreError>;
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Persists the object and returns its public URL.
    async fn store(
        &self,
        bytes: Bytes,
        content_type: Option<String>,
        bucket: &str,
        id: &str,
    ) -> Result<String, StoreError>;

    async fn fetch(&self, bucket: &str, id: &str) -> Result<Option<MediaObject>, StoreError>;

    async fn remove(&self, bucket: &str, id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait QueryCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;
}
