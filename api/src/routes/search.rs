use crate::{
    AppState,
    dto::SearchParams,
    errors::ApiError,
    geo::GeoQuery,
    models::{Location, Post},
    store::search_key,
};
use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::header,
    response::IntoResponse,
};
use tracing::{debug, info};

/// GET /search?lat=..&lon=..&range=..
/// Headers: Authorization: Bearer <token>
/// Response: JSON array of posts, nearest first, with denylisted posts removed
pub async fn search_posts(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::ValidationError(e.body_text()))?;
    let radius_km = params.radius_km(state.config.default_radius_km)?;
    let query = GeoQuery::new(Location::new(params.lat, params.lon), radius_km)?;

    let key = search_key(&query, state.config.cache_key_precision);
    if let Some(cache) = &state.cache {
        if let Some(cached) = cache.get(&key).await? {
            debug!("Cache hit for {}", key);
            return Ok(json_response(cached));
        }
    }

    let posts: Vec<Post> = state
        .posts
        .search(&query, state.config.search_limit, &state.filter)
        .await?;

    info!(
        "Search at ({}, {}) within {}km: {} shown",
        query.center.lat,
        query.center.lon,
        query.radius_km,
        posts.len()
    );

    let body = serde_json::to_string(&posts)
        .map_err(|e| ApiError::InternalError(format!("Encoding search results failed: {}", e)))?;

    if let Some(cache) = &state.cache {
        cache
            .set(&key, body.clone(), state.config.cache_ttl)
            .await?;
    }

    Ok(json_response(body))
}

fn json_response(body: String) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], body)
}
