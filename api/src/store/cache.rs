use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{Client, aio::ConnectionManager};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info};

use super::QueryCache;
use crate::{errors::StoreError, geo::GeoQuery};

/// Cache key for a search. Coordinates and radius are rounded to `precision`
/// decimals so equivalent spellings of one query ("37.0", "37.00") share an
/// entry.
pub fn search_key(query: &GeoQuery, precision: usize) -> String {
    format!(
        "search:{}:{}:{}",
        round(query.center.lat, precision),
        round(query.center.lon, precision),
        round(query.radius_km, precision),
    )
}

fn round(value: f64, precision: usize) -> String {
    let formatted = format!("{:.*}", precision, value);
    // "-0.0000" and "0.0000" are the same coordinate
    match formatted.strip_prefix('-') {
        Some(rest) if rest.chars().all(|c| c == '0' || c == '.') => rest.to_string(),
        _ => formatted,
    }
}

/// TTL-only in-process cache. Expired entries are dropped on read and by the
/// sweeper task.
#[derive(Default)]
pub struct MemoryQueryCache {
    entries: DashMap<String, (Instant, String)>,
}

impl MemoryQueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (deadline, _)| *deadline > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let purged = self.purge_expired();
                if purged > 0 {
                    debug!("Purged {} expired cache entries", purged);
                }
            }
        })
    }
}

#[async_trait]
impl QueryCache for MemoryQueryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            let (deadline, value) = entry.value();
            if *deadline > now {
                return Ok(Some(value.clone()));
            }
        }

        self.entries.remove_if(key, |_, (deadline, _)| *deadline <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_string(), (Instant::now() + ttl, value));
        Ok(())
    }
}

/// Redis-backed cache; expiry is delegated to Redis via `SET .. PX`.
#[derive(Clone)]
pub struct RedisQueryCache {
    connection: ConnectionManager,
}

impl RedisQueryCache {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        info!("Connected to Redis query cache");
        Ok(Self { connection })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl QueryCache for RedisQueryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut connection = self.connection.clone();
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut connection)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<_, ()>(&mut connection)
            .await?;
        Ok(())
    }
}
