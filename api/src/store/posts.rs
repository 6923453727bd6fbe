use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::PostIndex;
use crate::{
    errors::StoreError,
    filter::ContentFilter,
    geo::{GeoQuery, haversine_km},
    models::Post,
};

/// In-process post index. Search is a linear scan with haversine distance.
#[derive(Default)]
pub struct MemoryPostIndex {
    posts: DashMap<Uuid, Post>,
}

impl MemoryPostIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<Post> {
        self.posts.get(id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl PostIndex for MemoryPostIndex {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn index(&self, post: &Post) -> Result<(), StoreError> {
        self.posts.insert(post.id, post.clone());
        Ok(())
    }

    async fn search(
        &self,
        query: &GeoQuery,
        limit: usize,
        filter: &ContentFilter,
    ) -> Result<Vec<Post>, StoreError> {
        let mut hits: Vec<(f64, Post)> = self
            .posts
            .iter()
            .filter(|entry| !filter.is_filtered(&entry.message))
            .filter_map(|entry| {
                let distance = haversine_km(query.center, entry.location);
                (distance <= query.radius_km).then(|| (distance, entry.value().clone()))
            })
            .collect();

        // Nearest first; ties broken by id so results are stable.
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        hits.truncate(limit);

        Ok(hits.into_iter().map(|(_, post)| post).collect())
    }
}
