use std::path::Path;
use std::time::Duration;

use anyhow::anyhow;
use axum::http::StatusCode;
use tempfile::TempPath;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use super::dto::{BulkQuery, EditFileRequest, FileResponse, OwnsResponse, SearchQuery, StatsResponse};
use super::model::{File, PublishedVideo};
use super::repository::FileRepository;
use crate::common::lifetime::Lifetime;
use crate::common::random::rand_str;
use crate::common::response::ApiError;
use crate::common::upload::{upload_file, SavedUpload, UploadError};
use crate::state::AppState;
use crate::workers::error::TranscodeError;
use crate::workers::job::{Job, JobInput};
use crate::workers::options::ProcessingOptions;
use crate::workers::probe::{DurationProbe, Ffprobe};
use crate::workers::thumbnail::{make_thumbnail, THUMBNAIL_EXT};

const KEY_STEM_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("File not found")]
    NotFound,
    #[error("Storage limit reached, delete some files first")]
    QuotaExceeded,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<std::io::Error> for FileError {
    fn from(err: std::io::Error) -> Self {
        FileError::Internal(err.into())
    }
}

impl From<FileError> for ApiError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::NotFound => ApiError::not_found(err.to_string()),
            FileError::QuotaExceeded => ApiError(err.to_string(), StatusCode::CONFLICT),
            FileError::BadRequest(msg) => ApiError::bad_request(msg),
            FileError::Transcode(e) => e.into(),
            FileError::Upload(e) => e.into(),
            FileError::Internal(e) => ApiError::internal(e),
        }
    }
}

pub type FileResult<T> = Result<T, FileError>;

pub struct FileService;

impl FileService {
    /// Normalises an uploaded video to a faststart MP4 and publishes it.
    ///
    /// `.mkv` sources are re-encoded; everything else is remuxed without touching the streams.
    pub async fn upload(state: &AppState, user_id: Uuid, upload: SavedUpload) -> FileResult<FileResponse> {
        Self::check_quota(state, user_id, upload.size as i64).await?;

        let transcode = upload.extension().as_deref() == Some("mkv");
        let processed = temp_mp4()?;
        let lifetime = Lifetime::new(job_timeout(state));
        let (job, done) = Job::new(
            user_id,
            &*upload.path,
            JobInput::Args {
                args: remux_args(&upload.path, &processed, transcode),
                duration: None,
            },
            Box::new(tokio::io::sink()),
            &lifetime,
        );

        state.jobs.enqueue(job.with_hw_accel(transcode))?;
        done.wait(&lifetime).await?;

        Self::save_encoded(state, user_id, &upload.file_name, &processed).await
    }

    /// Publishes an already encoded MP4 and records it for the owner.
    pub async fn save_encoded(state: &AppState, user_id: Uuid, name: &str, path: &Path) -> FileResult<FileResponse> {
        let size = tokio::fs::metadata(path).await?.len() as i64;
        Self::check_quota(state, user_id, size).await?;

        let video = Self::publish(state, user_id, path, &rand_str(KEY_STEM_LEN)).await?;
        let file = match FileRepository::insert_with_stats(&state.db, user_id, name, &video).await {
            Ok(file) => file,
            Err(e) => {
                Self::discard(state, vec![video.file_key, video.thumb_key]).await;
                return Err(e.into());
            }
        };

        info!(file_id = %file.id, owner_id = %user_id, size = file.size, "file saved");
        Ok(FileResponse::new(file, &state.config.public_media_url))
    }

    /// Runs the thumbnail job, the video upload and the duration probe concurrently.
    ///
    /// On any failure the objects that did reach storage are deleted again.
    pub async fn publish(state: &AppState, user_id: Uuid, path: &Path, stem: &str) -> FileResult<PublishedVideo> {
        let size = tokio::fs::metadata(path).await?.len() as i64;
        let file_key = format!("{stem}.mp4");
        let thumb_key = format!("{stem}.{THUMBNAIL_EXT}");
        let probe = Ffprobe::new(&state.jobs.transcoder().settings().ffprobe_path);

        let thumbnail = async {
            let thumb = make_thumbnail(&state.jobs, user_id, path).await?;
            upload_file(&state.storage, &thumb, &thumb_key, "image/webp").await?;
            Ok::<_, FileError>(())
        };
        let video = async {
            upload_file(&state.storage, path, &file_key, "video/mp4").await?;
            Ok::<_, FileError>(())
        };

        let (thumbnail, video, duration) = tokio::join!(thumbnail, video, probe.probe(path));

        let mut uploaded = Vec::new();
        if thumbnail.is_ok() {
            uploaded.push(thumb_key.clone());
        }
        if video.is_ok() {
            uploaded.push(file_key.clone());
        }

        match thumbnail.and(video).and_then(|_| duration.map_err(FileError::from)) {
            Ok(duration) => Ok(PublishedVideo {
                file_key,
                thumb_key,
                size,
                duration,
            }),
            Err(e) => {
                Self::discard(state, uploaded).await;
                Err(e)
            }
        }
    }

    pub async fn fetch(state: &AppState, user_id: Uuid, id: Uuid) -> FileResult<FileResponse> {
        let file = Self::find(state, user_id, id).await?;
        Ok(FileResponse::new(file, &state.config.public_media_url))
    }

    pub async fn owns(state: &AppState, user_id: Uuid, id: Uuid) -> FileResult<OwnsResponse> {
        let owns = FileRepository::find_owned(&state.db, user_id, id).await?.is_some();
        Ok(OwnsResponse { owns })
    }

    pub async fn list(state: &AppState, user_id: Uuid, query: BulkQuery) -> FileResult<Vec<FileResponse>> {
        let (page, sort) = query.resolve().map_err(FileError::BadRequest)?;
        let files = FileRepository::list(&state.db, user_id, sort, page).await?;
        Ok(Self::responses(state, files))
    }

    pub async fn search(state: &AppState, user_id: Uuid, query: SearchQuery) -> FileResult<Vec<FileResponse>> {
        let (query, page) = query.resolve().map_err(FileError::BadRequest)?;
        let files = FileRepository::search(&state.db, user_id, &query, page).await?;
        Ok(Self::responses(state, files))
    }

    /// Renames a file and/or re-encodes it with new processing options.
    ///
    /// A re-encode is published under fresh keys; the old objects are removed once the row points at the new ones.
    pub async fn edit(state: &AppState, user_id: Uuid, id: Uuid, req: EditFileRequest) -> FileResult<FileResponse> {
        req.validate().map_err(|e| FileError::BadRequest(e.to_string()))?;
        if req.name.is_none() && req.processing_options.is_none() {
            return Err(FileError::BadRequest("No edit options provided".to_string()));
        }

        let mut file = Self::find(state, user_id, id).await?;
        let previous_size = file.size;
        if let Some(name) = req.name {
            file.original_name = name;
        }

        let mut replaced = Vec::new();
        if let Some(opts) = req.processing_options {
            let video = Self::reencode(state, &file, opts).await?;
            replaced = vec![
                std::mem::replace(&mut file.file_key, video.file_key),
                std::mem::replace(&mut file.thumb_key, video.thumb_key),
            ];
            file.size = video.size;
            file.duration = video.duration;
        }

        let updated = match FileRepository::update_edited(&state.db, &file, previous_size).await {
            Ok(updated) => updated,
            Err(e) => {
                if !replaced.is_empty() {
                    Self::discard(state, vec![file.file_key, file.thumb_key]).await;
                }
                return Err(e.into());
            }
        };

        Self::discard(state, replaced).await;
        Ok(FileResponse::new(updated, &state.config.public_media_url))
    }

    pub async fn delete(state: &AppState, user_id: Uuid, id: Uuid) -> FileResult<StatsResponse> {
        let file = FileRepository::delete_with_stats(&state.db, user_id, id)
            .await?
            .ok_or(FileError::NotFound)?;

        state
            .storage
            .delete_objects(&[file.file_key, file.thumb_key])
            .await?;

        let stats = FileRepository::get_stats(&state.db, user_id)
            .await?
            .ok_or_else(|| anyhow!("no storage stats for user {}", user_id))?;

        info!(file_id = %id, owner_id = %user_id, "file deleted");
        Ok(stats.into())
    }

    /// Encodes `input` with user options into a temp file through the job queue.
    pub async fn encode_to_temp(
        state: &AppState,
        user_id: Uuid,
        input: &Path,
        opts: ProcessingOptions,
        job_id: Option<String>,
        lifetime: &Lifetime,
    ) -> FileResult<TempPath> {
        let (file, path) = tempfile::Builder::new()
            .prefix("processed-")
            .suffix(".mp4")
            .tempfile()?
            .into_parts();

        let (job, done) = Job::new(
            user_id,
            input,
            JobInput::Options(opts),
            Box::new(tokio::fs::File::from_std(file)),
            lifetime,
        );
        let job = match job_id {
            Some(id) => job.with_id(id),
            None => job,
        };

        state.jobs.enqueue(job.with_hw_accel(true))?;
        done.wait(lifetime).await?;

        Ok(path)
    }

    async fn reencode(state: &AppState, file: &File, opts: ProcessingOptions) -> FileResult<PublishedVideo> {
        opts.validate_against(file.size.max(0) as u64)?;

        let source = Self::download(state, &file.file_key).await?;
        let lifetime = Lifetime::new(job_timeout(state));
        let encoded = Self::encode_to_temp(state, file.user_id, &source, opts, None, &lifetime).await?;

        let size = tokio::fs::metadata(&encoded).await?.len() as i64;
        if size > file.size {
            Self::check_quota(state, file.user_id, size - file.size).await?;
        }

        Self::publish(state, file.user_id, &encoded, &rand_str(KEY_STEM_LEN)).await
    }

    async fn download(state: &AppState, key: &str) -> FileResult<TempPath> {
        let object = state.storage.get_object(key, None).await?;
        let (file, path) = tempfile::Builder::new()
            .prefix("source-")
            .suffix(".mp4")
            .tempfile()?
            .into_parts();

        let mut reader = object.body.into_async_read();
        let mut file = tokio::fs::File::from_std(file);
        tokio::io::copy(&mut reader, &mut file).await?;

        Ok(path)
    }

    async fn check_quota(state: &AppState, user_id: Uuid, additional: i64) -> FileResult<()> {
        let stats = FileRepository::get_stats(&state.db, user_id)
            .await?
            .ok_or_else(|| anyhow!("no storage stats for user {}", user_id))?;

        if stats.used_storage + additional > stats.max_storage {
            warn!(owner_id = %user_id, used = stats.used_storage, additional, "storage quota exceeded");
            return Err(FileError::QuotaExceeded);
        }
        Ok(())
    }

    async fn find(state: &AppState, user_id: Uuid, id: Uuid) -> FileResult<File> {
        FileRepository::find_owned(&state.db, user_id, id)
            .await?
            .ok_or(FileError::NotFound)
    }

    async fn discard(state: &AppState, keys: Vec<String>) {
        if let Err(e) = state.storage.delete_objects(&keys).await {
            error!("Failed to clean up objects {:?}: {}", keys, e);
        }
    }

    fn responses(state: &AppState, files: Vec<File>) -> Vec<FileResponse> {
        files
            .into_iter()
            .map(|f| FileResponse::new(f, &state.config.public_media_url))
            .collect()
    }
}

fn job_timeout(state: &AppState) -> Duration {
    Duration::from_secs(state.config.ffmpeg.job_timeout_secs)
}

fn temp_mp4() -> std::io::Result<TempPath> {
    Ok(tempfile::Builder::new()
        .prefix("processed-")
        .suffix(".mp4")
        .tempfile()?
        .into_temp_path())
}

/// Arguments that rewrite an upload as a faststart MP4 on disk.
pub fn remux_args(input: &Path, output: &Path, transcode: bool) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-loglevel", "error", "-i"].map(String::from).to_vec();
    args.push(input.to_string_lossy().into_owned());
    if !transcode {
        args.extend(["-c:a", "copy", "-c:v", "copy"].map(String::from));
    }
    args.extend(["-movflags", "+faststart", "-f", "mp4"].map(String::from));
    args.push(output.to_string_lossy().into_owned());
    args
}
