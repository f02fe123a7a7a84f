// Image handlers
// Upload, listing, metadata, deletion, and raw variant serving. The variant
// route parses the size segment against the closed variant set before any
// storage key is formed, so traversal attempts die at the routing boundary.

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::{
    app::AppState,
    imaging::processor::Variant,
    middleware::auth::AuthenticatedUser,
    models::image::{Image, ImageStatus, ImageVisibility},
    services::UploadRequest,
    utils::problem::{ApiError, FieldError},
};

const VARIANT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

// =============================================================================
// RESPONSE TYPES
// =============================================================================

#[derive(Debug, Serialize)]
pub struct VariantInfo {
    pub variant: String,
    pub width: i32,
    pub height: i32,
    pub file_size: i64,
    pub format: String,
    /// Direct URL when the storage provider exposes one; otherwise clients
    /// fetch through the variants endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub id: String,
    pub status: String,
    pub visibility: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub mime_type: String,
    pub file_size: i64,
    pub width: i32,
    pub height: i32,
    pub original_filename: String,
    pub variants: Vec<VariantInfo>,
    pub tags: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// List the caller's own images instead of the public gallery.
    #[serde(default)]
    pub mine: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateImageRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<String>,
    pub tags: Option<Vec<String>>,
}

fn image_response(
    state: &AppState,
    image: Image,
    variants: Vec<crate::models::image::ImageVariantRow>,
    tags: Vec<String>,
) -> ImageResponse {
    ImageResponse {
        id: image.id.to_string(),
        status: image.status,
        visibility: image.visibility,
        title: image.title,
        description: image.description,
        mime_type: image.mime_type,
        file_size: image.file_size,
        width: image.width,
        height: image.height,
        original_filename: image.original_filename,
        variants: variants
            .into_iter()
            .map(|v| {
                let url = state.storage.url(&v.storage_key);
                VariantInfo {
                    variant: v.variant,
                    width: v.width,
                    height: v.height,
                    file_size: v.file_size,
                    format: v.format,
                    url: (!url.is_empty()).then_some(url),
                }
            })
            .collect(),
        tags,
        created_at: image.created_at.to_rfc3339(),
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// POST /api/v1/images (multipart)
pub async fn upload_image(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    // Per-user upload quota; the pipeline does not start on a rejected
    // request.
    if state.config.security.enable_rate_limiting {
        let key = format!("upload:user:{}", user.user_id);
        match state
            .rate_limit_service
            .check(&key, &state.rate_limit_config.upload)
            .await
        {
            Ok(status) if !status.allowed => {
                return Err(ApiError::RateLimited {
                    retry_after: status.retry_after.unwrap_or(3600) as u64,
                });
            },
            Err(e) => tracing::warn!("upload rate limit check failed: {}", e),
            _ => {},
        }
    }

    let mut file: Option<(Bytes, String)> = None;
    let mut request = UploadRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(vec![FieldError {
            field: "body".to_string(),
            message: e.to_string(),
        }]))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .unwrap_or("unnamed.jpg")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::FileTooLarge)?;
                file = Some((data, filename));
            },
            "title" => request.title = read_text(field).await?,
            "description" => request.description = read_text(field).await?,
            "visibility" => {
                if let Some(text) = read_text(field).await? {
                    request.visibility = Some(text.parse::<ImageVisibility>().map_err(|e| {
                        ApiError::Validation(vec![FieldError {
                            field: "visibility".to_string(),
                            message: e,
                        }])
                    })?);
                }
            },
            "tags" => {
                if let Some(text) = read_text(field).await? {
                    request.tags = text.split(',').map(|t| t.trim().to_string()).collect();
                }
            },
            // Accepted for API compatibility; album assignment happens in a
            // separate step.
            "album_id" => {
                let _ = read_text(field).await?;
            },
            _ => {},
        }
    }

    let (data, filename) = file.ok_or_else(|| {
        ApiError::Validation(vec![FieldError {
            field: "file".to_string(),
            message: "file part is required".to_string(),
        }])
    })?;

    let uploaded = state
        .upload_service
        .upload(user.user_id, data, &filename, request)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(image_response(
            &state,
            uploaded.image,
            uploaded.variants,
            uploaded.tags,
        )),
    ))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<Option<String>, ApiError> {
    let text = field.text().await.map_err(|e| {
        ApiError::Validation(vec![FieldError {
            field: "body".to_string(),
            message: e.to_string(),
        }])
    })?;
    let text = text.trim().to_string();
    Ok((!text.is_empty()).then_some(text))
}

/// GET /api/v1/images
pub async fn list_images(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut conn = state
        .diesel_pool
        .get()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let images = if query.mine {
        Image::list_for_owner(&mut conn, user.user_id, limit, offset).await
    } else {
        Image::list_public(&mut conn, limit, offset).await
    }
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut responses = Vec::with_capacity(images.len());
    for image in images {
        let variants = Image::variants(&mut conn, image.id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let tags = Image::tags(&mut conn, image.id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        responses.push(image_response(&state, image, variants, tags));
    }

    Ok(Json(responses))
}

/// Load an image and apply the visibility rules for this viewer.
async fn load_visible_image(
    state: &AppState,
    image_id: Uuid,
    viewer: Option<Uuid>,
) -> Result<Image, ApiError> {
    let mut conn = state
        .diesel_pool
        .get()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let image = Image::find_by_id(&mut conn, image_id)
        .await
        .map_err(|_| ApiError::NotFound)?;

    if !image.visible_to(viewer) {
        // Not distinguishing "hidden" from "absent".
        return Err(ApiError::NotFound);
    }
    Ok(image)
}

/// GET /api/v1/images/{id}
pub async fn get_image(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let image = load_visible_image(&state, id, Some(user.user_id)).await?;

    let mut conn = state
        .diesel_pool
        .get()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let variants = Image::variants(&mut conn, image.id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let tags = Image::tags(&mut conn, image.id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(image_response(&state, image, variants, tags)))
}

/// PUT /api/v1/images/{id}
pub async fn update_image(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateImageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let image = load_visible_image(&state, id, Some(user.user_id)).await?;
    if image.owner_id != user.user_id {
        return Err(ApiError::Forbidden);
    }

    let visibility = match req.visibility.as_deref() {
        Some(v) => Some(v.parse::<ImageVisibility>().map_err(|e| {
            ApiError::Validation(vec![FieldError {
                field: "visibility".to_string(),
                message: e,
            }])
        })?),
        None => None,
    };

    let mut conn = state
        .diesel_pool
        .get()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let updated = Image::update_metadata(&mut conn, id, req.title, req.description, visibility)
        .await
        .map_err(|_| ApiError::NotFound)?;

    if let Some(tags) = req.tags {
        let slugs: Vec<String> = tags
            .iter()
            .filter_map(|t| crate::utils::validation::normalize_tag(t))
            .collect();
        Image::set_tags(&mut conn, id, &slugs)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
    }

    let variants = Image::variants(&mut conn, id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let tags = Image::tags(&mut conn, id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(image_response(&state, updated, variants, tags)))
}

/// DELETE /api/v1/images/{id}
pub async fn delete_image(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let image = load_visible_image(&state, id, Some(user.user_id)).await?;
    if image.owner_id != user.user_id && !user.is_moderator() {
        return Err(ApiError::Forbidden);
    }

    if image.status() != ImageStatus::Deleted {
        state.upload_service.delete_image(&image).await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/images/{id}/variants/{size}
///
/// Streams the raw variant bytes. The size segment must parse as one of the
/// closed variant names before anything touches storage.
pub async fn get_variant(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((id, size)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    // Routing-boundary gate: unknown variant names never become keys.
    let variant: Variant = size.parse().map_err(|_| ApiError::NotFound)?;

    let image = load_visible_image(&state, id, Some(user.user_id)).await?;

    let mut conn = state
        .diesel_pool
        .get()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let row = Image::find_variant(&mut conn, image.id, variant.as_str())
        .await
        .map_err(|_| ApiError::NotFound)?;
    drop(conn);

    let reader = state.storage.get(&row.storage_key).await?;
    let stream = ReaderStream::new(reader);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(row.content_type()),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(VARIANT_CACHE_CONTROL),
    );
    if let Ok(value) = HeaderValue::from_str(&row.file_size.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }

    Ok((headers, Body::from_stream(stream)).into_response())
}
