// ============================================================================
// GEO-TAGGED POST SERVICE
// ============================================================================

// - User signup/login with bcrypt-hashed credentials
// - JWT authentication for posting and searching
// - Image upload to a public media bucket
// - Radius search over posts, nearest first
// - Short-lived query cache and read-time content filter
// - Write-only wide-column archive of every post
// - Per-client login throttling
// - CORS configuration and structured logging

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod config;
pub mod dto;
pub mod errors;
pub mod filter;
pub mod geo;
pub mod models;
pub mod routes;
pub mod states;
pub mod store;
pub mod throttle;

pub use config::Config;
pub use errors::{ApiError, StoreError};
pub use states::AppState;

use auth::require_auth;
use routes::{create_post, get_media, health_check, login, search_posts, signup};

/// Builds the HTTP gateway. `/post` and `/search` require a bearer token;
/// everything else is public.
pub fn app(state: AppState) -> Router {
    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/post", post(create_post))
        .route("/search", get(search_posts))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health_check))
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/media/{bucket}/{id}", get(get_media))
        .merge(protected)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}
