use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct File {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub file_key: String,
    pub thumb_key: String,
    pub original_name: String,
    pub format: String,
    pub size: i64,
    pub duration: f64,
    pub version: i32,
    #[serde(with = "time::serde::iso8601")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::iso8601")]
    pub updated_at: OffsetDateTime,
}

/// Per-account storage counters.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Stats {
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub max_storage: i64,
    pub used_storage: i64,
    pub uploaded_files: i32,
}

/// An encoded video and its thumbnail, already in object storage.
#[derive(Debug, Clone)]
pub struct PublishedVideo {
    pub file_key: String,
    pub thumb_key: String,
    pub size: i64,
    pub duration: f64,
}
