use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::PostArchive;
use crate::{errors::StoreError, models::Post};

pub const POST_FAMILY: &str = "post";
pub const LOCATION_FAMILY: &str = "location";

/// A single wide-column cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub family: &'static str,
    pub qualifier: &'static str,
    pub value: String,
}

impl Cell {
    fn new(family: &'static str, qualifier: &'static str, value: impl Into<String>) -> Self {
        Self {
            family,
            qualifier,
            value: value.into(),
        }
    }
}

/// Row key and cells for a post: the `post` family holds author, text and
/// image URL, the `location` family the coordinates.
pub fn post_row(post: &Post) -> (String, Vec<Cell>) {
    let mut cells = vec![
        Cell::new(POST_FAMILY, "user", post.user.as_str()),
        Cell::new(POST_FAMILY, "message", post.message.as_str()),
        Cell::new(LOCATION_FAMILY, "lat", post.location.lat.to_string()),
        Cell::new(LOCATION_FAMILY, "lon", post.location.lon.to_string()),
    ];
    if let Some(url) = &post.url {
        cells.push(Cell::new(POST_FAMILY, "url", url.as_str()));
    }

    (post.id.to_string(), cells)
}

/// In-process wide-column archive keyed by post id.
#[derive(Default)]
pub struct MemoryPostArchive {
    rows: DashMap<String, Vec<Cell>>,
}

impl MemoryPostArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, key: &str) -> Option<Vec<Cell>> {
        self.rows.get(key).map(|row| row.value().clone())
    }
}

#[async_trait]
impl PostArchive for MemoryPostArchive {
    async fn append(&self, post: &Post) -> Result<(), StoreError> {
        let (key, cells) = post_row(post);
        self.rows.insert(key, cells);
        debug!("Archived post {}", post.id);
        Ok(())
    }
}
