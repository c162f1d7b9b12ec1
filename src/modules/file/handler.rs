use axum::{
    body::Body,
    extract::{Extension, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tokio_util::io::ReaderStream;
use tracing::error;
use uuid::Uuid;

use super::dto::{BulkQuery, EditFileRequest, FileResponse, OwnsResponse, SearchQuery, StatsResponse};
use super::repository::FileRepository;
use super::service::FileService;
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::common::upload::save_field_to_temp;
use crate::modules::auth::dto::TokenClaims;
use crate::state::AppState;

/// Upload a video
#[utoipa::path(
    post,
    path = "/api/v1/files",
    request_body(content_type = "multipart/form-data", description = "A `file` field holding the video"),
    responses(
        (status = 201, description = "File uploaded", body = ApiResponse<FileResponse>),
        (status = 400, description = "Bad Request"),
        (status = 409, description = "Storage quota exceeded"),
        (status = 413, description = "File too large"),
        (status = 503, description = "Encoder busy, retry later")
    ),
    tag = "Files",
    security(("bearer_auth" = []))
)]
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            upload = Some(save_field_to_temp(field, state.config.upload_max_size).await?);
            break;
        }
    }

    let upload = upload.ok_or_else(|| ApiError::bad_request("Missing file field"))?;
    let file = FileService::upload(&state, claims.sub, upload).await?;

    Ok(ApiSuccess(ApiResponse::success(file, "File uploaded successfully"), StatusCode::CREATED))
}

/// List the caller's files
#[utoipa::path(
    get,
    path = "/api/v1/files",
    params(BulkQuery),
    responses(
        (status = 200, description = "Files retrieved", body = ApiResponse<Vec<FileResponse>>),
        (status = 400, description = "Bad Request")
    ),
    tag = "Files",
    security(("bearer_auth" = []))
)]
pub async fn list_files(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Query(query): Query<BulkQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let files = FileService::list(&state, claims.sub, query).await?;
    Ok(ApiSuccess(ApiResponse::success(files, "Files retrieved successfully"), StatusCode::OK))
}

/// Search the caller's files by name
#[utoipa::path(
    get,
    path = "/api/v1/files/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Matching files", body = ApiResponse<Vec<FileResponse>>),
        (status = 400, description = "Bad Request")
    ),
    tag = "Files",
    security(("bearer_auth" = []))
)]
pub async fn search_files(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let files = FileService::search(&state, claims.sub, query).await?;
    Ok(ApiSuccess(ApiResponse::success(files, "Files retrieved successfully"), StatusCode::OK))
}

#[utoipa::path(
    get,
    path = "/api/v1/files/{id}",
    params(("id" = Uuid, Path, description = "File ID")),
    responses(
        (status = 200, description = "File retrieved", body = ApiResponse<FileResponse>),
        (status = 404, description = "File Not Found")
    ),
    tag = "Files",
    security(("bearer_auth" = []))
)]
pub async fn get_file(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let file = FileService::fetch(&state, claims.sub, id).await?;
    Ok(ApiSuccess(ApiResponse::success(file, "File retrieved successfully"), StatusCode::OK))
}

/// Whether the caller owns a file
#[utoipa::path(
    get,
    path = "/api/v1/files/{id}/owns",
    params(("id" = Uuid, Path, description = "File ID")),
    responses(
        (status = 200, description = "Caller owns the file", body = ApiResponse<OwnsResponse>),
        (status = 403, description = "Caller does not own the file", body = ApiResponse<OwnsResponse>)
    ),
    tag = "Files",
    security(("bearer_auth" = []))
)]
pub async fn owns_file(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let owns = FileService::owns(&state, claims.sub, id).await?;
    let status = owns.status();
    Ok(ApiSuccess(ApiResponse::success(owns, "Ownership checked"), status))
}

/// Rename a file and/or re-encode it
#[utoipa::path(
    patch,
    path = "/api/v1/files/{id}",
    params(("id" = Uuid, Path, description = "File ID")),
    request_body = EditFileRequest,
    responses(
        (status = 200, description = "File updated", body = ApiResponse<FileResponse>),
        (status = 400, description = "Bad Request"),
        (status = 404, description = "File Not Found"),
        (status = 408, description = "Processing timed out")
    ),
    tag = "Files",
    security(("bearer_auth" = []))
)]
pub async fn edit_file(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
    Json(req): Json<EditFileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let file = FileService::edit(&state, claims.sub, id, req).await?;
    Ok(ApiSuccess(ApiResponse::success(file, "File updated successfully"), StatusCode::OK))
}

#[utoipa::path(
    delete,
    path = "/api/v1/files/{id}",
    params(("id" = Uuid, Path, description = "File ID")),
    responses(
        (status = 200, description = "File deleted, updated usage returned", body = ApiResponse<StatsResponse>),
        (status = 404, description = "File Not Found")
    ),
    tag = "Files",
    security(("bearer_auth" = []))
)]
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = FileService::delete(&state, claims.sub, id).await?;
    Ok(ApiSuccess(ApiResponse::success(stats, "File deleted successfully"), StatusCode::OK))
}

/// Stream a video with support for Range requests
///
/// Proxies the object from storage, passing the range through untouched.
#[utoipa::path(
    get,
    path = "/api/v1/files/{id}/stream",
    params(("id" = Uuid, Path, description = "File ID")),
    responses(
        (status = 200, description = "Stream Content"),
        (status = 206, description = "Partial Content"),
        (status = 404, description = "Not Found")
    ),
    tag = "Files",
    security(("bearer_auth" = []))
)]
pub async fn stream_file(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let file = FileRepository::find_owned(&state.db, claims.sub, id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    let range = headers
        .get(header::RANGE)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    let object = state.storage.get_object(&file.file_key, range).await.map_err(|e| {
        error!("Storage error: {}", e);
        ApiError::not_found("Video not available")
    })?;

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, object.content_type().unwrap_or(&file.format));

    if let Some(length) = object.content_length() {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    builder = match object.content_range() {
        Some(range) => builder
            .header(header::CONTENT_RANGE, range)
            .status(StatusCode::PARTIAL_CONTENT),
        None => builder.header(header::ACCEPT_RANGES, "bytes").status(StatusCode::OK),
    };

    if let Some(etag) = object.e_tag() {
        builder = builder.header(header::ETAG, etag);
    }

    let body = Body::from_stream(ReaderStream::new(object.body.into_async_read()));
    builder.body(body).map_err(ApiError::internal)
}
