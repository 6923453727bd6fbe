use crate::{AppState, errors::ApiError, store::media::validate_key};
use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};

/// GET /media/{bucket}/{id}
/// Public: anyone holding the URL can read the object.
pub async fn get_media(
    State(state): State<AppState>,
    Path((bucket, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if validate_key(&bucket).is_err() || validate_key(&id).is_err() {
        return Err(ApiError::NotFound);
    }

    let object = state
        .media
        .fetch(&bucket, &id)
        .await?
        .ok_or(ApiError::NotFound)?;

    // Only image types are echoed back; anything else is served as opaque bytes.
    let content_type = object
        .content_type
        .filter(|ct| ct.starts_with("image/"))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
        ],
        object.bytes,
    ))
}
