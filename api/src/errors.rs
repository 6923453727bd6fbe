use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid password or username")]
    InvalidCredentials,
    #[error("User already exists")]
    UserAlreadyExists,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Not Found")]
    NotFound,
    #[error("Too many attempts, try again later")]
    TooManyRequests,
    #[error("{0}")]
    ValidationError(String),
    #[error("{0}")]
    InternalError(String),
}

/// Convert our custom errors to HTTP responses
///
/// Internal failures are logged here and reported with a generic message so
/// backend details never leak to the client.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidCredentials => StatusCode::FORBIDDEN,
            ApiError::UserAlreadyExists => StatusCode::CONFLICT,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::InternalError(msg) => {
                error!("Internal error: {}", msg);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({
                      "error": "Internal server error"
                    })),
                )
                    .into_response();
            }
        };

        (
            status,
            Json(serde_json::json!({
              "error": self.to_string()
            })),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

/// Failures of the backing stores (credentials, posts, media, cache).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket {0} does not exist")]
    BucketMissing(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),
    #[error("search engine error: {0}")]
    Elasticsearch(#[from] elasticsearch::Error),
    #[error("invalid Elasticsearch URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to build transport: {0}")]
    TransportBuild(#[from] elasticsearch::http::transport::BuildError),
    #[error("cache error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Unavailable(format!("blocking task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (ApiError::InvalidCredentials, StatusCode::FORBIDDEN),
            (ApiError::UserAlreadyExists, StatusCode::CONFLICT),
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ApiError::TooManyRequests, StatusCode::TOO_MANY_REQUESTS),
            (ApiError::ValidationError("bad".into()), StatusCode::BAD_REQUEST),
            (
                StoreError::BucketMissing("post-images".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
