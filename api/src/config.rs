use std::{fmt::Display, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Elasticsearch,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "elasticsearch" | "es" => Ok(StoreBackend::Elasticsearch),
            other => Err(format!("unknown store backend {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Disabled,
    Memory,
    Redis,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(CacheBackend::Disabled),
            "memory" => Ok(CacheBackend::Memory),
            "redis" => Ok(CacheBackend::Redis),
            other => Err(format!("unknown cache backend {other}")),
        }
    }
}

/// Runtime settings, built once at startup and shared through `AppState`.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub bcrypt_cost: u32,

    pub store_backend: StoreBackend,
    pub elasticsearch_url: String,
    pub post_index: String,
    pub user_index: String,

    pub media_dir: Option<PathBuf>,
    pub media_bucket: String,
    pub public_base_url: String,

    pub cache_backend: CacheBackend,
    pub redis_url: String,
    pub cache_ttl: Duration,
    pub cache_key_precision: usize,

    pub default_radius_km: f64,
    pub search_limit: usize,
    pub denylist: Vec<String>,
    pub login_attempts_per_minute: NonZeroU32,
    pub max_upload_bytes: usize,

    pub archive_posts: bool,
}

impl Config {
    /// Defaults for everything except the signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            jwt_secret: jwt_secret.into(),
            token_ttl: chrono::Duration::hours(24),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            store_backend: StoreBackend::Memory,
            elasticsearch_url: "http://localhost:9200".into(),
            post_index: "around".into(),
            user_index: "around-users".into(),
            media_dir: None,
            media_bucket: "post-images".into(),
            public_base_url: "http://localhost:8080".into(),
            cache_backend: CacheBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".into(),
            cache_ttl: Duration::from_millis(1000),
            cache_key_precision: 4,
            default_radius_km: 200.0,
            search_limit: 100,
            denylist: vec!["fuck".into()],
            login_attempts_per_minute: NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
            max_upload_bytes: 10 * 1024 * 1024,
            archive_posts: true,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup, falling back to the
    /// defaults of [`Config::new`] for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let mut config = Self::new(jwt_secret);

        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(hours) = parse::<i64, _>(&lookup, "TOKEN_TTL_HOURS")? {
            if hours <= 0 {
                return Err(invalid("TOKEN_TTL_HOURS", hours, "must be positive"));
            }
            config.token_ttl = chrono::Duration::try_hours(hours)
                .ok_or_else(|| invalid("TOKEN_TTL_HOURS", hours, "out of range"))?;
        }
        if let Some(cost) = parse::<u32, _>(&lookup, "BCRYPT_COST")? {
            if !(4..=31).contains(&cost) {
                return Err(invalid("BCRYPT_COST", cost, "must be within 4..=31"));
            }
            config.bcrypt_cost = cost;
        }

        if let Some(backend) = parse(&lookup, "STORE_BACKEND")? {
            config.store_backend = backend;
        }
        if let Some(url) = lookup("ELASTICSEARCH_URL") {
            config.elasticsearch_url = url;
        }
        if let Some(index) = lookup("POST_INDEX") {
            config.post_index = index;
        }
        if let Some(index) = lookup("USER_INDEX") {
            config.user_index = index;
        }

        config.media_dir = lookup("MEDIA_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);
        if let Some(bucket) = lookup("MEDIA_BUCKET") {
            config.media_bucket = bucket;
        }
        if let Some(base) = lookup("PUBLIC_BASE_URL") {
            config.public_base_url = base.trim_end_matches('/').to_string();
        }

        if let Some(backend) = parse(&lookup, "CACHE_BACKEND")? {
            config.cache_backend = backend;
        }
        if let Some(url) = lookup("REDIS_URL") {
            config.redis_url = url;
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "CACHE_TTL_MS")? {
            if ms == 0 {
                return Err(invalid("CACHE_TTL_MS", ms, "must be positive"));
            }
            config.cache_ttl = Duration::from_millis(ms);
        }
        if let Some(precision) = parse::<usize, _>(&lookup, "CACHE_KEY_PRECISION")? {
            if precision > 10 {
                return Err(invalid("CACHE_KEY_PRECISION", precision, "must be at most 10"));
            }
            config.cache_key_precision = precision;
        }

        if let Some(radius) = parse::<f64, _>(&lookup, "DEFAULT_RADIUS_KM")? {
            if !radius.is_finite() || radius < 0.0 {
                return Err(invalid("DEFAULT_RADIUS_KM", radius, "must be a non-negative number"));
            }
            config.default_radius_km = radius;
        }
        if let Some(limit) = parse::<usize, _>(&lookup, "SEARCH_LIMIT")? {
            if limit == 0 {
                return Err(invalid("SEARCH_LIMIT", limit, "must be positive"));
            }
            config.search_limit = limit;
        }
        if let Some(terms) = lookup("DENYLIST") {
            config.denylist = terms
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(attempts) = parse(&lookup, "LOGIN_ATTEMPTS_PER_MINUTE")? {
            config.login_attempts_per_minute = attempts;
        }
        if let Some(bytes) = parse(&lookup, "MAX_UPLOAD_BYTES")? {
            config.max_upload_bytes = bytes;
        }
        if let Some(archive) = parse(&lookup, "ARCHIVE_POSTS")? {
            config.archive_posts = archive;
        }

        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };

    raw.trim().parse().map(Some).map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }
    })
}

fn invalid(key: &'static str, value: impl Display, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
