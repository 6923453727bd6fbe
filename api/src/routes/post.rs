use crate::{
    AppState,
    auth::AuthUser,
    errors::ApiError,
    models::{Location, Post},
};
use axum::{
    Extension,
    body::Bytes,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
};
use tracing::{info, warn};
use uuid::Uuid;

struct Image {
    bytes: Bytes,
    content_type: Option<String>,
}

#[derive(Default)]
struct PostForm {
    message: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    image: Option<Image>,
}

fn malformed(e: MultipartError) -> ApiError {
    ApiError::ValidationError(format!("Malformed multipart body: {}", e.body_text()))
}

fn coordinate(name: &str, raw: &str) -> Result<f64, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::ValidationError(format!("Invalid {name}: {raw}")))
}

async fn read_form(mut multipart: Multipart) -> Result<PostForm, ApiError> {
    let mut form = PostForm::default();

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "message" => form.message = Some(field.text().await.map_err(malformed)?),
            "lat" => form.lat = Some(coordinate("lat", &field.text().await.map_err(malformed)?)?),
            "lon" => form.lon = Some(coordinate("lon", &field.text().await.map_err(malformed)?)?),
            "image" => {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(malformed)?;
                form.image = Some(Image {
                    bytes,
                    content_type,
                });
            }
            _ => {}
        }
    }

    Ok(form)
}

/// POST /post
/// Headers: Authorization: Bearer <token>
/// Body: multipart form with `message`, `lat`, `lon` and `image`
pub async fn create_post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<StatusCode, ApiError> {
    let multipart = multipart.map_err(|e| ApiError::ValidationError(e.body_text()))?;
    let form = read_form(multipart).await?;

    let message = form
        .message
        .ok_or_else(|| ApiError::ValidationError("message is required".into()))?;
    let (Some(lat), Some(lon)) = (form.lat, form.lon) else {
        return Err(ApiError::ValidationError("lat and lon are required".into()));
    };
    let location = Location::new(lat, lon);
    if !location.is_valid() {
        return Err(ApiError::ValidationError(
            "lat must be within [-90, 90] and lon within [-180, 180]".into(),
        ));
    }
    let image = form
        .image
        .filter(|image| !image.bytes.is_empty())
        .ok_or_else(|| ApiError::ValidationError("image is required".into()))?;

    let id = Uuid::new_v4();
    let object_id = id.to_string();
    let bucket = &state.config.media_bucket;

    // The image goes first so a post never references a missing object.
    let url = state
        .media
        .store(image.bytes, image.content_type, bucket, &object_id)
        .await?;

    let post = Post {
        id,
        user: user.username,
        message,
        location,
        url: Some(url),
    };

    if let Err(e) = state.posts.index(&post).await {
        if let Err(cleanup) = state.media.remove(bucket, &object_id).await {
            warn!("Failed to remove orphaned image {}: {}", object_id, cleanup);
        }
        return Err(e.into());
    }

    // The post is already searchable; a missed archive row is not rolled back.
    if let Some(archive) = &state.archive {
        if let Err(e) = archive.append(&post).await {
            warn!("Failed to archive post {}: {}", post.id, e);
        }
    }

    info!("Post created: {} by user {}", post.id, post.user);

    Ok(StatusCode::OK)
}
