use crate::common::response::ApiError;
use crate::infrastructure::storage::s3::StorageService;
use anyhow::{anyhow, Result};
use axum::{body::Bytes, extract::multipart::Field, http::StatusCode};
use futures_util::StreamExt;
use std::path::Path;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

// Minimum part size for S3 is 5MB. We use 6MB to be safe.
const MIN_PART_SIZE: usize = 6 * 1024 * 1024;
/// Files above this go through a multipart upload.
pub const MULTIPART_THRESHOLD: u64 = 12 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Invalid content type {0}: only video files are allowed")]
    InvalidContentType(String),
    #[error("File exceeds the maximum upload size of {0} bytes")]
    TooLarge(u64),
    #[error("Upload stream interrupted")]
    Interrupted,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::InvalidContentType(_) | UploadError::Interrupted => ApiError::bad_request(err.to_string()),
            UploadError::TooLarge(_) => ApiError(err.to_string(), StatusCode::PAYLOAD_TOO_LARGE),
            UploadError::Io(e) => ApiError::internal(e),
        }
    }
}

/// A client upload spooled to local disk. The file is removed when dropped.
#[derive(Debug)]
pub struct SavedUpload {
    pub path: TempPath,
    pub file_name: String,
    pub size: u64,
}

impl SavedUpload {
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

pub struct MultipartUploader<'a> {
    storage: &'a StorageService,
    key: String,
    upload_id: String,
    parts: Vec<aws_sdk_s3::types::CompletedPart>,
    part_number: i32,
    buffer: Vec<u8>,
}

impl<'a> MultipartUploader<'a> {
    pub async fn new(storage: &'a StorageService, key: String, content_type: &str) -> Result<Self> {
        let upload_id = storage.create_multipart_upload(&key, content_type).await?;

        Ok(Self {
            storage,
            key,
            upload_id,
            parts: Vec::new(),
            part_number: 1,
            buffer: Vec::with_capacity(MIN_PART_SIZE),
        })
    }

    pub async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        self.buffer.extend_from_slice(&chunk);

        if self.buffer.len() >= MIN_PART_SIZE {
            self.flush_part().await?;
        }

        Ok(())
    }

    async fn flush_part(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let body = Bytes::from(std::mem::replace(&mut self.buffer, Vec::with_capacity(MIN_PART_SIZE)));
        let part = self
            .storage
            .upload_part(&self.key, &self.upload_id, self.part_number, body)
            .await?;

        self.parts.push(part);
        self.part_number += 1;

        Ok(())
    }

    pub async fn finish(mut self) -> Result<()> {
        self.flush_part().await?;

        self.storage
            .complete_multipart_upload(&self.key, &self.upload_id, self.parts)
            .await
    }

    pub async fn abort(&self) -> Result<()> {
        self.storage.abort_multipart_upload(&self.key, &self.upload_id).await
    }
}

/// Uploads a local file, switching to a multipart upload for large files.
pub async fn upload_file(storage: &StorageService, path: &Path, key: &str, content_type: &str) -> Result<()> {
    let size = tokio::fs::metadata(path).await?.len();
    if size <= MULTIPART_THRESHOLD {
        return storage.put_file(key, path, content_type).await;
    }

    debug!(key, size, "starting multipart upload");
    let mut uploader = MultipartUploader::new(storage, key.to_string(), content_type).await?;
    let mut stream = ReaderStream::with_capacity(tokio::fs::File::open(path).await?, 256 * 1024);

    while let Some(chunk) = stream.next().await {
        let written = match chunk {
            Ok(chunk) => uploader.write_chunk(chunk).await,
            Err(e) => Err(anyhow!("Failed to read {}: {}", path.display(), e)),
        };

        if let Err(e) = written {
            error!("Upload error: {}", e);
            if let Err(abort) = uploader.abort().await {
                error!("Failed to abort upload {}: {}", key, abort);
            }
            return Err(e);
        }
    }

    uploader.finish().await
}

/// Resolves the declared content type of a field, falling back to its file name.
pub fn video_content_type(declared: Option<&str>, file_name: &str) -> Result<String, UploadError> {
    let mime = match declared {
        Some(ct) if ct != mime::APPLICATION_OCTET_STREAM.essence_str() => ct
            .parse::<mime::Mime>()
            .map_err(|_| UploadError::InvalidContentType(ct.to_string()))?,
        _ => mime_guess::from_path(file_name).first_or_octet_stream(),
    };

    if mime.type_() != mime::VIDEO {
        return Err(UploadError::InvalidContentType(mime.essence_str().to_string()));
    }
    Ok(mime.essence_str().to_string())
}

/// Spools a multipart field into a temp file, enforcing type and size limits.
pub async fn save_field_to_temp(mut field: Field<'_>, max_size: u64) -> Result<SavedUpload, UploadError> {
    let file_name = field.file_name().unwrap_or("video").to_string();
    video_content_type(field.content_type(), &file_name)?;

    let suffix = Path::new(&file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let (file, path) = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&suffix)
        .tempfile()?
        .into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut size = 0u64;
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| {
            error!("Stream error: {}", e);
            UploadError::Interrupted
        })?;

        size += chunk.len() as u64;
        if size > max_size {
            return Err(UploadError::TooLarge(max_size));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(SavedUpload {
        path,
        file_name,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_video_types_are_accepted() {
        assert_eq!(video_content_type(Some("video/mp4"), "a.bin").unwrap(), "video/mp4");
        assert_eq!(video_content_type(Some("video/x-matroska"), "a").unwrap(), "video/x-matroska");
    }

    #[test]
    fn octet_stream_falls_back_to_the_file_name() {
        assert_eq!(
            video_content_type(Some("application/octet-stream"), "clip.mp4").unwrap(),
            "video/mp4"
        );
        assert!(video_content_type(None, "clip.mkv").is_ok());
    }

    #[test]
    fn non_video_uploads_are_rejected() {
        assert!(matches!(
            video_content_type(Some("image/png"), "a.png"),
            Err(UploadError::InvalidContentType(_))
        ));
        assert!(video_content_type(None, "notes.txt").is_err());
        assert!(video_content_type(Some("not a mime"), "a.mp4").is_err());
    }

    #[test]
    fn upload_errors_map_to_client_statuses() {
        assert_eq!(ApiError::from(UploadError::TooLarge(10)).1, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            ApiError::from(UploadError::InvalidContentType("image/png".into())).1,
            StatusCode::BAD_REQUEST
        );
    }
}
