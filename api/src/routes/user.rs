use crate::{AppState, dto::Credentials, errors::ApiError};
use axum::{
    Json,
    extract::{ConnectInfo, State, rejection::JsonRejection},
    http::Extensions,
};
use std::net::SocketAddr;
use tracing::{info, warn};
use validator::Validate;

fn credentials(
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Credentials, ApiError> {
    let Json(credentials) = payload.map_err(|e| ApiError::ValidationError(e.body_text()))?;
    credentials
        .validate()
        .map_err(|_| ApiError::ValidationError("Empty password or username".into()))?;
    Ok(credentials)
}

/// POST /signup
/// Body: { "username": "...", "password": "..." }
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<&'static str, ApiError> {
    let payload = credentials(payload)?;

    if !state
        .credentials
        .add_user(&payload.username, &payload.password)
        .await?
    {
        warn!("User {} already exists", payload.username);
        return Err(ApiError::UserAlreadyExists);
    }

    info!("New user registered: {}", payload.username);

    Ok("User added successfully")
}

/// POST /login
/// Body: { "username": "...", "password": "..." }
/// Response: the signed token as plain text
pub async fn login(
    State(state): State<AppState>,
    extensions: Extensions,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<String, ApiError> {
    let payload = credentials(payload)?;

    // Absent when the router is driven without a socket, e.g. in tests.
    let client = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if !state.login_throttle.check(client, &payload.username) {
        warn!("Login attempts throttled for {} from {:?}", payload.username, client);
        return Err(ApiError::TooManyRequests);
    }

    if !state
        .credentials
        .check_user(&payload.username, &payload.password)
        .await?
    {
        info!("Invalid password or username for {}", payload.username);
        return Err(ApiError::InvalidCredentials);
    }

    let token = state.tokens.issue(&payload.username)?;

    info!("User logged in: {}", payload.username);

    Ok(token)
}
