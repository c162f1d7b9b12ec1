use std::convert::Infallible;

use axum::{
    extract::{Extension, Multipart, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures_util::{Stream, StreamExt};

use super::dto::{ProcessForm, ProcessQuery, StartResponse};
use super::service::{FfmpegService, PROGRESS_INTERVAL};
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::modules::auth::dto::TokenClaims;
use crate::modules::file::dto::FileResponse;
use crate::state::AppState;

/// Reserve a processing slot and get a job id
#[utoipa::path(
    get,
    path = "/api/v1/ffmpeg/start",
    responses(
        (status = 200, description = "Job reserved", body = ApiResponse<StartResponse>),
        (status = 403, description = "Another job is already running")
    ),
    tag = "FFmpeg",
    security(("bearer_auth" = []))
)]
pub async fn start(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let started = FfmpegService::start(&state.progress, claims.sub)
        .ok_or_else(|| ApiError("A job is already running".to_string(), StatusCode::FORBIDDEN))?;

    Ok(ApiSuccess(ApiResponse::success(started, "Job reserved"), StatusCode::OK))
}

/// Server-sent progress of the caller's current job
#[utoipa::path(
    get,
    path = "/api/v1/ffmpeg/progress",
    responses(
        (status = 200, description = "`text/event-stream` of percentages with two decimals, ending at 100.00"),
        (status = 404, description = "No running jobs found")
    ),
    tag = "FFmpeg",
    security(("bearer_auth" = []))
)]
pub async fn progress(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = FfmpegService::watch(&state.progress, claims.sub, PROGRESS_INTERVAL)
        .ok_or_else(|| ApiError::not_found("No running jobs found"))?
        .map(|percent| Ok(Event::default().data(format!("{percent:.2}"))));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Encode an uploaded video with processing options
///
/// Streams the MP4 back while it is encoded, or stores it when `saveToCloud` is set.
#[utoipa::path(
    post,
    path = "/api/v1/ffmpeg/process",
    params(ProcessQuery),
    request_body(content = ProcessForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Encoded video/mp4 stream"),
        (status = 201, description = "Encoded video saved", body = ApiResponse<FileResponse>),
        (status = 400, description = "Bad Request"),
        (status = 403, description = "Job was not started"),
        (status = 408, description = "Processing timed out"),
        (status = 503, description = "Encoder busy, retry later")
    ),
    tag = "FFmpeg",
    security(("bearer_auth" = []))
)]
pub async fn process(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Query(query): Query<ProcessQuery>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    if !FfmpegService::owns_job(&state.progress, claims.sub, &query.job_id) {
        return Err(ApiError("Job was not started".to_string(), StatusCode::FORBIDDEN));
    }

    let (upload, opts) = match FfmpegService::read_form(&mut multipart, state.config.upload_max_size).await {
        Ok(form) => form,
        Err(e) => {
            state.progress.finish(claims.sub, &query.job_id);
            return Err(e.into());
        }
    };

    let job_id = query.job_id.clone();
    let outcome = if opts.save_to_cloud {
        FfmpegService::save(&state, claims.sub, job_id, upload, opts)
            .await
            .map(|file| ApiSuccess(ApiResponse::success(file, "Video processed and saved"), StatusCode::CREATED).into_response())
    } else {
        FfmpegService::stream(&state, claims.sub, job_id, upload, opts).map(|body| {
            (
                [
                    (header::CONTENT_TYPE, "video/mp4"),
                    (header::CONTENT_DISPOSITION, "attachment; filename=\"processed.mp4\""),
                ],
                body,
            )
                .into_response()
        })
    };

    outcome.map_err(|e| {
        // A rejected job never reaches a worker, so nothing else clears its record.
        state.progress.finish(claims.sub, &query.job_id);
        e.into()
    })
}
