use std::{net::SocketAddr, num::NonZeroU32, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
    response::Response,
};
use geopost::{
    AppState, Config, StoreError, app,
    filter::ContentFilter,
    geo::{GeoQuery, haversine_km},
    models::{Location, Post},
    store::{
        MediaStore, MemoryMediaStore, MemoryPostArchive, MemoryPostIndex, PostArchive, PostIndex,
    },
};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

const BOUNDARY: &str = "geopost-test-boundary";
const BASE_URL: &str = "http://geopost.test";
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3];

fn test_config() -> Config {
    let mut config = Config::new("test-secret");
    config.bcrypt_cost = 4;
    config.public_base_url = BASE_URL.into();
    config
}

async fn state_with(config: Config) -> AppState {
    let state = AppState::in_memory(config);
    state
        .media
        .ensure_bucket(&state.config.media_bucket)
        .await
        .unwrap();
    state
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn search_request(token: &str, query: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/search?{query}"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn multipart_body(fields: &[(&str, &str)], image: Option<&[u8]>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(image) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"photo.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(image);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn post_request(token: &str, fields: &[(&str, &str)], image: Option<&[u8]>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/post")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(fields, image)))
        .unwrap()
}

async fn signup_and_login(router: &Router, username: &str, password: &str) -> String {
    let credentials = json!({ "username": username, "password": password });

    let response = send(router, json_request("/signup", credentials.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(router, json_request("/login", credentials)).await;
    assert_eq!(response.status(), StatusCode::OK);
    body_text(response).await
}

fn post_at(user: &str, message: &str, lat: f64, lon: f64) -> Post {
    Post {
        id: Uuid::new_v4(),
        user: user.into(),
        message: message.into(),
        location: Location::new(lat, lon),
        url: None,
    }
}

#[tokio::test]
async fn health_is_public() {
    let router = app(state_with(test_config()).await);
    let response = send(
        &router,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
}

#[tokio::test]
async fn signup_rejects_duplicates_regardless_of_password() {
    let router = app(state_with(test_config()).await);

    let response = send(
        &router,
        json_request("/signup", json!({ "username": "alice", "password": "pw" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "User added successfully");

    for password in ["pw", "different"] {
        let response = send(
            &router,
            json_request("/signup", json!({ "username": "alice", "password": password })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}

#[tokio::test]
async fn signup_with_missing_or_empty_fields_is_a_client_error() {
    let router = app(state_with(test_config()).await);

    for body in [
        json!({ "username": "", "password": "pw" }),
        json!({ "username": "alice", "password": "" }),
        json!({ "username": "alice" }),
    ] {
        let response = send(&router, json_request("/signup", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let malformed = Request::builder()
        .method("POST")
        .uri("/signup")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    assert_eq!(send(&router, malformed).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_returns_token_only_for_valid_credentials() {
    let state = state_with(test_config()).await;
    let router = app(state.clone());

    let token = signup_and_login(&router, "alice", "secret").await;
    assert_eq!(state.tokens.validate(&token).unwrap(), "alice");

    let wrong = send(
        &router,
        json_request("/login", json!({ "username": "alice", "password": "nope" })),
    )
    .await;
    assert_eq!(wrong.status(), StatusCode::FORBIDDEN);

    let unknown = send(
        &router,
        json_request("/login", json!({ "username": "mallory", "password": "secret" })),
    )
    .await;
    assert_eq!(unknown.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn login_attempts_are_throttled_per_username() {
    let mut config = test_config();
    config.login_attempts_per_minute = NonZeroU32::new(2).unwrap();
    let router = app(state_with(config).await);

    let attempt = json!({ "username": "alice", "password": "guess" });
    for _ in 0..2 {
        let response = send(&router, json_request("/login", attempt.clone())).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
    let response = send(&router, json_request("/login", attempt)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = send(
        &router,
        json_request("/login", json!({ "username": "bob", "password": "guess" })),
    )
    .await;
    assert_eq!(other.status(), StatusCode::FORBIDDEN);
}

fn login_from(client: [u8; 4], username: &str, password: &str) -> Request<Body> {
    let mut request = json_request(
        "/login",
        json!({ "username": username, "password": password }),
    );
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((client, 40000))));
    request
}

#[tokio::test]
async fn guesses_from_one_client_do_not_lock_out_another() {
    let mut config = test_config();
    config.login_attempts_per_minute = NonZeroU32::new(3).unwrap();
    let router = app(state_with(config).await);

    let response = send(
        &router,
        json_request("/signup", json!({ "username": "alice", "password": "right" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let attacker = [203, 0, 113, 9];
    for _ in 0..3 {
        let response = send(&router, login_from(attacker, "alice", "wrong")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
    let response = send(&router, login_from(attacker, "alice", "wrong")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = send(&router, login_from([198, 51, 100, 7], "alice", "right")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!body_text(response).await.is_empty());

    // The exhausted client stays throttled even with the right password.
    let response = send(&router, login_from(attacker, "alice", "right")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let router = app(state_with(test_config()).await);

    let no_token = Request::builder()
        .uri("/search?lat=37&lon=-122")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&router, no_token).await.status(), StatusCode::UNAUTHORIZED);

    let garbage = search_request("garbage", "lat=37&lon=-122");
    assert_eq!(send(&router, garbage).await.status(), StatusCode::UNAUTHORIZED);

    let forged = geopost::auth::TokenIssuer::new("other-secret", chrono::Duration::hours(24))
        .issue("alice")
        .unwrap();
    let response = send(
        &router,
        post_request(&forged, &[("message", "hi"), ("lat", "1"), ("lon", "1")], Some(PNG)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn posted_image_round_trips_through_search_and_media_url() {
    let state = state_with(test_config()).await;
    let router = app(state);
    let token = signup_and_login(&router, "alice", "secret").await;

    let response = send(
        &router,
        post_request(
            &token,
            &[("message", "hello"), ("lat", "37.0"), ("lon", "-122.0")],
            Some(PNG),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());

    let response = send(&router, search_request(&token, "lat=37.0&lon=-122.0&range=0")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let posts = body_json(response).await;
    let posts = posts.as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["user"], "alice");
    assert_eq!(posts[0]["message"], "hello");
    assert_eq!(posts[0]["location"], json!({ "lat": 37.0, "lon": -122.0 }));
    assert!(!posts[0]["id"].as_str().unwrap().is_empty());

    let url = posts[0]["url"].as_str().unwrap();
    let path = url.strip_prefix(BASE_URL).unwrap();
    assert!(path.starts_with("/media/post-images/"));

    let media = send(&router, Request::builder().uri(path).body(Body::empty()).unwrap()).await;
    assert_eq!(media.status(), StatusCode::OK);
    assert_eq!(media.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(body_bytes(media).await, Bytes::from_static(PNG));
}

#[tokio::test]
async fn post_without_image_is_rejected_and_nothing_is_stored() {
    let index = Arc::new(MemoryPostIndex::new());
    let mut state = state_with(test_config()).await;
    state.posts = index.clone();
    let router = app(state.clone());
    let token = state.tokens.issue("alice").unwrap();

    let response = send(
        &router,
        post_request(&token, &[("message", "hi"), ("lat", "1"), ("lon", "1")], None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &router,
        post_request(&token, &[("message", "hi"), ("lat", "north"), ("lon", "1")], Some(PNG)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &router,
        post_request(&token, &[("message", "hi"), ("lat", "95"), ("lon", "1")], Some(PNG)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(index.is_empty());
}

struct UnavailableIndex;

#[async_trait]
impl PostIndex for UnavailableIndex {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn index(&self, _post: &Post) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("index offline".into()))
    }

    async fn search(
        &self,
        _query: &GeoQuery,
        _limit: usize,
        _filter: &ContentFilter,
    ) -> Result<Vec<Post>, StoreError> {
        Err(StoreError::Unavailable("index offline".into()))
    }
}

#[tokio::test]
async fn failed_indexing_removes_uploaded_image() {
    let media = Arc::new(MemoryMediaStore::new(BASE_URL));
    let mut state = state_with(test_config()).await;
    media.ensure_bucket(&state.config.media_bucket).await.unwrap();
    state.media = media.clone();
    state.posts = Arc::new(UnavailableIndex);
    let router = app(state.clone());
    let token = state.tokens.issue("alice").unwrap();

    let response = send(
        &router,
        post_request(&token, &[("message", "hi"), ("lat", "1"), ("lon", "1")], Some(PNG)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(media.is_empty());

    let response = send(&router, search_request(&token, "lat=1&lon=1")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn missing_bucket_fails_the_post() {
    let index = Arc::new(MemoryPostIndex::new());
    let mut state = AppState::in_memory(test_config());
    state.posts = index.clone();
    let router = app(state.clone());
    let token = state.tokens.issue("alice").unwrap();

    let response = send(
        &router,
        post_request(&token, &[("message", "hi"), ("lat", "1"), ("lon", "1")], Some(PNG)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(index.is_empty());
}

#[tokio::test]
async fn filtered_posts_are_stored_but_hidden() {
    let mut config = test_config();
    config.denylist = vec!["spam".into()];
    let index = Arc::new(MemoryPostIndex::new());
    let mut state = state_with(config).await;
    state.posts = index.clone();
    let router = app(state.clone());
    let token = state.tokens.issue("alice").unwrap();

    for message in ["nice view", "buy SPAM here"] {
        let response = send(
            &router,
            post_request(&token, &[("message", message), ("lat", "10"), ("lon", "10")], Some(PNG)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(index.len(), 2);

    let response = send(&router, search_request(&token, "lat=10&lon=10")).await;
    let posts = body_json(response).await;
    let messages: Vec<_> = posts
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["message"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(messages, ["nice view"]);
}

#[tokio::test]
async fn filtered_posts_do_not_crowd_out_allowed_ones() {
    let mut config = test_config();
    config.search_limit = 1;
    config.denylist = vec!["spam".into()];
    let state = state_with(config).await;
    let router = app(state.clone());
    let token = state.tokens.issue("alice").unwrap();

    state.posts.index(&post_at("bob", "spam nearest", 10.0, 10.0)).await.unwrap();
    state.posts.index(&post_at("bob", "allowed farther", 10.01, 10.0)).await.unwrap();

    let response = send(&router, search_request(&token, "lat=10&lon=10&range=50")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let posts: Vec<Post> = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].message, "allowed farther");
}

#[tokio::test]
async fn created_posts_are_archived() {
    let archive = Arc::new(MemoryPostArchive::new());
    let index = Arc::new(MemoryPostIndex::new());
    let mut state = state_with(test_config()).await;
    state.archive = Some(archive.clone());
    state.posts = index.clone();
    let router = app(state.clone());
    let token = state.tokens.issue("alice").unwrap();

    let response = send(
        &router,
        post_request(&token, &[("message", "hi"), ("lat", "37.5"), ("lon", "-122")], Some(PNG)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(archive.len(), 1);
    let query = GeoQuery::new(Location::new(37.5, -122.0), 0.0).unwrap();
    let posts = index.search(&query, 10, &ContentFilter::default()).await.unwrap();
    let row = archive.row(&posts[0].id.to_string()).unwrap();
    let value = |family: &str, qualifier: &str| {
        row.iter()
            .find(|c| c.family == family && c.qualifier == qualifier)
            .map(|c| c.value.clone())
    };
    assert_eq!(value("post", "user").as_deref(), Some("alice"));
    assert_eq!(value("post", "message").as_deref(), Some("hi"));
    assert_eq!(value("location", "lat").as_deref(), Some("37.5"));
    assert_eq!(value("location", "lon").as_deref(), Some("-122"));
}

struct UnavailableArchive;

#[async_trait]
impl PostArchive for UnavailableArchive {
    async fn append(&self, _post: &Post) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("archive offline".into()))
    }
}

#[tokio::test]
async fn archive_failure_keeps_the_post() {
    let index = Arc::new(MemoryPostIndex::new());
    let media = Arc::new(MemoryMediaStore::new(BASE_URL));
    let mut state = state_with(test_config()).await;
    media.ensure_bucket(&state.config.media_bucket).await.unwrap();
    state.archive = Some(Arc::new(UnavailableArchive));
    state.posts = index.clone();
    state.media = media.clone();
    let router = app(state.clone());
    let token = state.tokens.issue("alice").unwrap();

    let response = send(
        &router,
        post_request(&token, &[("message", "hi"), ("lat", "1"), ("lon", "1")], Some(PNG)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(index.len(), 1);
    assert_eq!(media.len(), 1);
}

#[tokio::test]
async fn search_honours_radius_boundary_and_orders_by_distance() {
    let mut config = test_config();
    config.cache_backend = geopost::config::CacheBackend::Disabled;
    let state = state_with(config).await;
    let router = app(state.clone());
    let token = state.tokens.issue("alice").unwrap();

    let center = Location::new(37.0, -122.0);
    let edge = post_at("bob", "edge", 37.2, -121.8);
    let near = post_at("bob", "near", 37.01, -122.0);
    let outside = post_at("bob", "outside", 38.0, -122.0);
    for post in [&edge, &near, &outside] {
        state.posts.index(post).await.unwrap();
    }

    let radius = haversine_km(center, edge.location);
    let response = send(
        &router,
        search_request(&token, &format!("lat=37.0&lon=-122.0&range={radius}")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let posts: Vec<Post> = serde_json::from_value(body_json(response).await).unwrap();
    let messages: Vec<_> = posts.iter().map(|p| p.message.as_str()).collect();
    assert_eq!(messages, ["near", "edge"]);
}

#[tokio::test]
async fn search_uses_default_radius_when_range_is_absent() {
    let state = state_with(test_config()).await;
    let router = app(state.clone());
    let token = state.tokens.issue("alice").unwrap();

    // about 155 km and 333 km north of the query point
    state.posts.index(&post_at("bob", "inside", 38.4, -122.0)).await.unwrap();
    state.posts.index(&post_at("bob", "beyond", 40.0, -122.0)).await.unwrap();

    let response = send(&router, search_request(&token, "lat=37&lon=-122")).await;
    let posts: Vec<Post> = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].message, "inside");
}

#[tokio::test]
async fn search_rejects_malformed_queries() {
    let state = state_with(test_config()).await;
    let router = app(state.clone());
    let token = state.tokens.issue("alice").unwrap();

    for query in [
        "lon=-122",
        "lat=abc&lon=-122",
        "lat=91&lon=0",
        "lat=0&lon=181",
        "lat=0&lon=0&range=-1",
        "lat=0&lon=0&range=wide",
    ] {
        let response = send(&router, search_request(&token, query)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{query}");
    }

    let response = send(&router, search_request(&token, "lat=0&lon=0")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test(start_paused = true)]
async fn search_results_are_cached_until_ttl_expires() {
    let mut config = test_config();
    config.cache_ttl = Duration::from_secs(5);
    let state = state_with(config).await;
    let router = app(state.clone());
    let token = state.tokens.issue("alice").unwrap();

    let response = send(&router, search_request(&token, "lat=37.0&lon=-122.0&range=10")).await;
    assert_eq!(body_json(response).await, json!([]));

    state.posts.index(&post_at("bob", "fresh", 37.0, -122.0)).await.unwrap();

    // Same query spelled differently hits the same cache entry.
    let response = send(&router, search_request(&token, "lat=37.00&lon=-122.000&range=10.0")).await;
    assert_eq!(body_json(response).await, json!([]));

    tokio::time::advance(Duration::from_secs(6)).await;

    let response = send(&router, search_request(&token, "lat=37&lon=-122&range=10")).await;
    let posts: Vec<Post> = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].message, "fresh");
}

#[tokio::test]
async fn media_route_is_public_and_404s_unknown_objects() {
    let router = app(state_with(test_config()).await);

    for uri in ["/media/post-images/missing", "/media/no-such-bucket/x", "/media/post-images/.."] {
        let response = send(&router, Request::builder().uri(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn responses_carry_permissive_cors_headers() {
    let router = app(state_with(test_config()).await);
    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "https://somewhere.example")
        .body(Body::empty())
        .unwrap();

    let response = send(&router, request).await;
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}
