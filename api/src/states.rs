use crate::{
    auth::TokenIssuer,
    config::{CacheBackend, Config, StoreBackend},
    errors::StoreError,
    filter::ContentFilter,
    store::{
        self, CredentialStore, ElasticCredentialStore, ElasticPostIndex, LocalMediaStore,
        MediaStore, MemoryCredentialStore, MemoryMediaStore, MemoryPostArchive, MemoryPostIndex,
        MemoryQueryCache, PostArchive, PostIndex, QueryCache, RedisQueryCache,
    },
    throttle::LoginThrottle,
};
use std::{sync::Arc, time::Duration};
use tracing::info;

// ============================================================================
// APPLICATION STATE - Shared data across all requests
// ============================================================================
/// Every backend sits behind an `Arc<dyn ...>` so handlers stay the same
/// whether the data lives in process or in Elasticsearch / Redis.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub credentials: Arc<dyn CredentialStore>,
    pub tokens: Arc<TokenIssuer>,
    pub media: Arc<dyn MediaStore>,
    pub posts: Arc<dyn PostIndex>,
    pub archive: Option<Arc<dyn PostArchive>>,
    pub cache: Option<Arc<dyn QueryCache>>,
    pub filter: Arc<ContentFilter>,
    pub login_throttle: Arc<LoginThrottle>,
}

/// How often idle login throttle entries are dropped.
const THROTTLE_PRUNE_EVERY: Duration = Duration::from_secs(60);

impl AppState {
    /// Fully in-process state: DashMap users, posts, media and cache.
    /// The media bucket still has to be created with `ensure_bucket`.
    pub fn in_memory(config: Config) -> Self {
        let cache: Option<Arc<dyn QueryCache>> = match config.cache_backend {
            CacheBackend::Disabled => None,
            _ => Some(Arc::new(MemoryQueryCache::new())),
        };
        let archive: Option<Arc<dyn PostArchive>> = config
            .archive_posts
            .then(|| Arc::new(MemoryPostArchive::new()) as Arc<dyn PostArchive>);

        Self {
            credentials: Arc::new(MemoryCredentialStore::new(config.bcrypt_cost)),
            tokens: Arc::new(TokenIssuer::new(&config.jwt_secret, config.token_ttl)),
            media: Arc::new(MemoryMediaStore::new(config.public_base_url.clone())),
            posts: Arc::new(MemoryPostIndex::new()),
            archive,
            cache,
            filter: Arc::new(ContentFilter::new(&config.denylist)),
            login_throttle: Arc::new(LoginThrottle::per_minute(config.login_attempts_per_minute)),
            config: Arc::new(config),
        }
    }

    /// Builds the backends selected by `config`, creating the post index
    /// mapping and media bucket if they are missing.
    pub async fn connect(config: Config) -> Result<Self, StoreError> {
        let mut state = Self::in_memory(config.clone());

        if config.store_backend == StoreBackend::Elasticsearch {
            let client = store::elastic::connect(&config.elasticsearch_url)?;

            let users = ElasticCredentialStore::new(
                client.clone(),
                config.user_index.clone(),
                config.bcrypt_cost,
            );
            users.ensure_schema().await?;

            state.credentials = Arc::new(users);
            state.posts = Arc::new(ElasticPostIndex::new(client, config.post_index.clone()));
            info!("Using Elasticsearch at {}", config.elasticsearch_url);
        }

        if let Some(dir) = &config.media_dir {
            state.media = Arc::new(LocalMediaStore::new(dir, config.public_base_url.clone()));
            info!("Storing media under {}", dir.display());
        }

        match config.cache_backend {
            CacheBackend::Redis => {
                state.cache = Some(Arc::new(RedisQueryCache::connect(&config.redis_url).await?));
            }
            CacheBackend::Memory => {
                let cache = Arc::new(MemoryQueryCache::new());
                cache
                    .clone()
                    .spawn_sweeper(config.cache_ttl.max(Duration::from_secs(1)) * 10);
                state.cache = Some(cache);
            }
            CacheBackend::Disabled => {}
        }

        state
            .login_throttle
            .clone()
            .spawn_pruner(THROTTLE_PRUNE_EVERY);

        state.posts.ensure_schema().await?;
        state.media.ensure_bucket(&config.media_bucket).await?;

        Ok(state)
    }
}
