//! Elasticsearch-backed credential store and post index.

use std::sync::Arc;

use async_trait::async_trait;
use elasticsearch::{
    CreateParts, Elasticsearch, GetParts, IndexParts, SearchParts,
    http::{
        response::Response,
        transport::{SingleNodeConnectionPool, TransportBuilder},
    },
    indices::{IndicesCreateParts, IndicesExistsParts},
    params::Refresh,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use url::Url;

use super::{
    CredentialStore, PostIndex,
    credentials::{DecoyHash, hash_password, verify_password},
};
use crate::{
    errors::StoreError,
    filter::ContentFilter,
    geo::GeoQuery,
    models::{Post, User},
};

const NOT_FOUND: u16 = 404;
const CONFLICT: u16 = 409;
/// Default `index.max_result_window`; `from + size` may not exceed it.
const MAX_RESULT_WINDOW: usize = 10_000;

pub fn connect(url: &str) -> Result<Elasticsearch, StoreError> {
    let parsed = Url::parse(url)?;
    let pool = SingleNodeConnectionPool::new(parsed);
    let transport = TransportBuilder::new(pool).build()?;
    Ok(Elasticsearch::new(transport))
}

#[derive(Debug, Deserialize)]
struct SearchResponse<T> {
    hits: Hits<T>,
}

#[derive(Debug, Deserialize)]
struct Hits<T> {
    hits: Vec<Hit<T>>,
}

#[derive(Debug, Deserialize)]
struct Hit<T> {
    #[serde(rename = "_source")]
    source: Option<T>,
}

#[derive(Debug, Deserialize)]
struct GetResponse<T> {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<T>,
}

/// Turns a non-2xx response into `StoreError::Unavailable` with the body attached.
async fn ensure_success(response: Response, action: &str) -> Result<Response, StoreError> {
    let status = response.status_code();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Unavailable(format!(
        "{action} failed with {status}: {body}"
    )))
}

async fn ensure_index(client: &Elasticsearch, index: &str, mappings: Value) -> Result<(), StoreError> {
    let exists = client
        .indices()
        .exists(IndicesExistsParts::Index(&[index]))
        .send()
        .await?;

    if exists.status_code().is_success() {
        return Ok(());
    }

    let response = client
        .indices()
        .create(IndicesCreateParts::Index(index))
        .body(json!({ "mappings": mappings }))
        .send()
        .await?;

    let status = response.status_code();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        // Another instance may have won the race to create it.
        if !body.contains("resource_already_exists_exception") {
            return Err(StoreError::Unavailable(format!(
                "creating index {index} failed with {status}: {body}"
            )));
        }
    }

    info!("Created index {}", index);
    Ok(())
}

pub(crate) fn post_mappings() -> Value {
    json!({
        "properties": {
            "id": { "type": "keyword" },
            "user": { "type": "keyword" },
            "message": { "type": "text" },
            "location": { "type": "geo_point" },
            "url": { "type": "keyword", "index": false }
        }
    })
}

pub(crate) fn user_mappings() -> Value {
    json!({
        "properties": {
            "username": { "type": "keyword" },
            "hashed_password": { "type": "keyword", "index": false }
        }
    })
}

/// One page of the distance filter plus nearest-first sort on the
/// `location` geo point. Ties are ordered by id so pages do not overlap.
pub(crate) fn geo_query_body(query: &GeoQuery, from: usize, size: usize) -> Value {
    let center = json!({ "lat": query.center.lat, "lon": query.center.lon });

    json!({
        "from": from,
        "size": size,
        "query": {
            "bool": {
                "filter": {
                    "geo_distance": {
                        "distance": format!("{}km", query.radius_km),
                        "distance_type": "arc",
                        "location": center
                    }
                }
            }
        },
        "sort": [
            {
                "_geo_distance": {
                    "location": center,
                    "order": "asc",
                    "unit": "km",
                    "distance_type": "arc"
                }
            },
            { "id": "asc" }
        ]
    })
}

/// Size of the next page, or `None` once the result window is exhausted.
fn page_size(from: usize, limit: usize) -> Option<usize> {
    let size = limit.min(MAX_RESULT_WINDOW.saturating_sub(from));
    (size > 0).then_some(size)
}

#[derive(Clone)]
pub struct ElasticPostIndex {
    client: Elasticsearch,
    index: String,
}

impl ElasticPostIndex {
    pub fn new(client: Elasticsearch, index: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
        }
    }
}

#[async_trait]
impl PostIndex for ElasticPostIndex {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        ensure_index(&self.client, &self.index, post_mappings()).await
    }

    async fn index(&self, post: &Post) -> Result<(), StoreError> {
        let id = post.id.to_string();
        let response = self
            .client
            .index(IndexParts::IndexId(&self.index, &id))
            .refresh(Refresh::True)
            .body(post)
            .send()
            .await?;

        ensure_success(response, "indexing post").await?;
        Ok(())
    }

    async fn search(
        &self,
        query: &GeoQuery,
        limit: usize,
        filter: &ContentFilter,
    ) -> Result<Vec<Post>, StoreError> {
        let mut posts = Vec::new();
        let mut from = 0;

        // Filtered posts are dropped here, so keep paging until `limit`
        // allowed posts are collected or the hits run out.
        while let Some(size) = page_size(from, limit) {
            let response = self
                .client
                .search(SearchParts::Index(&[self.index.as_str()]))
                .body(geo_query_body(query, from, size))
                .send()
                .await?;

            let response = ensure_success(response, "searching posts").await?;
            let result: SearchResponse<Post> = response.json().await?;
            let fetched = result.hits.hits.len();

            posts.extend(
                result
                    .hits
                    .hits
                    .into_iter()
                    .filter_map(|hit| hit.source)
                    .filter(|post| !filter.is_filtered(&post.message)),
            );

            if posts.len() >= limit || fetched < size {
                break;
            }
            from += fetched;
        }

        posts.truncate(limit);
        Ok(posts)
    }
}

/// Users are documents keyed by username. `_create` fails with 409 when the
/// id exists, which gives an atomic insert-if-absent.
#[derive(Clone)]
pub struct ElasticCredentialStore {
    client: Elasticsearch,
    index: String,
    cost: u32,
    decoy: Arc<DecoyHash>,
}

impl ElasticCredentialStore {
    pub fn new(client: Elasticsearch, index: impl Into<String>, cost: u32) -> Self {
        Self {
            client,
            index: index.into(),
            cost,
            decoy: Arc::new(DecoyHash::new(cost)),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        ensure_index(&self.client, &self.index, user_mappings()).await
    }
}

#[async_trait]
impl CredentialStore for ElasticCredentialStore {
    async fn add_user(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        let user = User {
            username: username.to_string(),
            hashed_password: hash_password(password, self.cost).await?,
        };

        let response = self
            .client
            .create(CreateParts::IndexId(&self.index, username))
            .refresh(Refresh::WaitFor)
            .body(&user)
            .send()
            .await?;

        if response.status_code().as_u16() == CONFLICT {
            return Ok(false);
        }

        ensure_success(response, "creating user").await?;
        Ok(true)
    }

    async fn check_user(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        let response = self
            .client
            .get(GetParts::IndexId(&self.index, username))
            .send()
            .await?;

        if response.status_code().as_u16() == NOT_FOUND {
            return self.decoy.reject(password).await;
        }

        let response = ensure_success(response, "loading user").await?;
        let found: GetResponse<User> = response.json().await?;

        match found.source {
            Some(user) if found.found && user.username == username => {
                verify_password(password, &user.hashed_password).await
            }
            _ => self.decoy.reject(password).await,
        }
    }
}
