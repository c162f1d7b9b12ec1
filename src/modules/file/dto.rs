use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use super::model::{File, Stats};
use crate::workers::options::ProcessingOptions;

pub const MAX_BULK_LIMIT: i64 = 250;
pub const SEARCH_LIMITS: &[i64] = &[10, 20, 50, 100, 250];

#[derive(Debug, Serialize, ToSchema)]
pub struct FileResponse {
    pub id: Uuid,
    pub name: String,
    /// Object key with a `?v=<version>` cache buster.
    pub file_key: String,
    pub thumb_key: String,
    /// Public URL of the video, when a media base URL is configured.
    pub url: Option<String>,
    pub format: String,
    pub size: i64,
    pub duration: f64,
    pub version: i32,
    #[serde(with = "time::serde::iso8601")]
    pub created_at: OffsetDateTime,
}

impl FileResponse {
    pub fn new(file: File, media_base: &str) -> Self {
        Self {
            url: public_url(media_base, &file.file_key, file.version),
            file_key: versioned_key(&file.file_key, file.version),
            thumb_key: versioned_key(&file.thumb_key, file.version),
            id: file.id,
            name: file.original_name,
            format: file.format,
            size: file.size,
            duration: file.duration,
            version: file.version,
            created_at: file.created_at,
        }
    }
}

pub fn versioned_key(key: &str, version: i32) -> String {
    format!("{key}?v={version}")
}

pub fn public_url(base: &str, key: &str, version: i32) -> Option<String> {
    let mut base = Url::parse(base).ok()?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut url = base.join(key).ok()?;
    url.set_query(Some(&format!("v={version}")));
    Some(url.into())
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OwnsResponse {
    pub owns: bool,
}

impl OwnsResponse {
    pub fn status(&self) -> StatusCode {
        if self.owns {
            StatusCode::OK
        } else {
            StatusCode::FORBIDDEN
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub max_storage: i64,
    pub used_storage: i64,
    pub uploaded_files: i32,
}

impl From<Stats> for StatsResponse {
    fn from(stats: Stats) -> Self {
        Self {
            max_storage: stats.max_storage,
            used_storage: stats.used_storage,
            uploaded_files: stats.uploaded_files,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Newest,
    Oldest,
    NameAsc,
    NameDesc,
    SizeAsc,
    SizeDesc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "newest" => Some(Self::Newest),
            "oldest" => Some(Self::Oldest),
            "az" => Some(Self::NameAsc),
            "za" => Some(Self::NameDesc),
            "size-asc" => Some(Self::SizeAsc),
            "size-desc" => Some(Self::SizeDesc),
            _ => None,
        }
    }

    /// Fixed `ORDER BY` clause; never built from user input.
    pub fn order_by(self) -> &'static str {
        match self {
            Self::Newest => "created_at DESC",
            Self::Oldest => "created_at ASC",
            Self::NameAsc => "original_name ASC",
            Self::NameDesc => "original_name DESC",
            Self::SizeAsc => "size ASC",
            Self::SizeDesc => "size DESC",
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct BulkQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// newest, oldest, az, za, size-asc or size-desc
    pub sort: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl BulkQuery {
    pub fn resolve(&self) -> Result<(Page, SortOrder), String> {
        let page = self.page.unwrap_or(0);
        if page < 0 {
            return Err("Page can't be negative".to_string());
        }

        let limit = self.limit.unwrap_or(10);
        if limit <= 0 {
            return Err("Limit must be greater than 0".to_string());
        }
        if limit > MAX_BULK_LIMIT {
            return Err(format!("Limit can't be greater than {MAX_BULK_LIMIT}"));
        }

        let sort = SortOrder::parse(self.sort.as_deref().unwrap_or("newest"))
            .ok_or_else(|| "Invalid sorting option".to_string())?;

        Ok((Page { limit, offset: page * limit }, sort))
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SearchQuery {
    pub query: String,
    pub page: Option<i64>,
    /// One of 10, 20, 50, 100, 250
    pub limit: Option<i64>,
}

impl SearchQuery {
    pub fn resolve(&self) -> Result<(String, Page), String> {
        let query = self.query.trim().to_lowercase();
        if query.is_empty() {
            return Err("No search query provided".to_string());
        }

        let limit = self.limit.unwrap_or(10);
        if !SEARCH_LIMITS.contains(&limit) {
            return Err("Invalid limit provided".to_string());
        }

        let page = self.page.unwrap_or(0);
        if page < 0 {
            return Err("Invalid page provided".to_string());
        }

        Ok((query, Page { limit, offset: page * limit }))
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct EditFileRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: Option<String>,
    #[validate(nested)]
    pub processing_options: Option<ProcessingOptions>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(page: Option<i64>, limit: Option<i64>, sort: Option<&str>) -> BulkQuery {
        BulkQuery {
            page,
            limit,
            sort: sort.map(String::from),
        }
    }

    #[test]
    fn bulk_defaults_and_offsets() {
        let (page, sort) = bulk(None, None, None).resolve().unwrap();
        assert_eq!(page, Page { limit: 10, offset: 0 });
        assert_eq!(sort, SortOrder::Newest);

        let (page, sort) = bulk(Some(3), Some(20), Some("SIZE-DESC")).resolve().unwrap();
        assert_eq!(page, Page { limit: 20, offset: 60 });
        assert_eq!(sort.order_by(), "size DESC");
    }

    #[test]
    fn bulk_rejects_bad_paging_and_sorts() {
        assert!(bulk(Some(-1), None, None).resolve().is_err());
        assert!(bulk(None, Some(0), None).resolve().is_err());
        assert!(bulk(None, Some(251), None).resolve().is_err());
        assert!(bulk(None, Some(250), None).resolve().is_ok());
        assert!(bulk(None, None, Some("random")).resolve().is_err());
    }

    #[test]
    fn search_only_allows_fixed_limits() {
        let q = |limit| SearchQuery {
            query: "  Cats ".into(),
            page: None,
            limit,
        };

        assert_eq!(q(Some(50)).resolve().unwrap().0, "cats");
        assert!(q(Some(30)).resolve().is_err());
        assert!(SearchQuery { query: " ".into(), page: None, limit: None }.resolve().is_err());
    }

    #[test]
    fn keys_carry_a_cache_buster() {
        assert_eq!(versioned_key("abc.mp4", 3), "abc.mp4?v=3");
        assert_eq!(
            public_url("https://cdn.example.com/videos", "abc.mp4", 2).as_deref(),
            Some("https://cdn.example.com/videos/abc.mp4?v=2")
        );
        assert_eq!(public_url("not a url", "abc.mp4", 1), None);
    }

    #[test]
    fn ownership_answers_with_ok_or_forbidden() {
        assert_eq!(OwnsResponse { owns: true }.status(), StatusCode::OK);
        assert_eq!(OwnsResponse { owns: false }.status(), StatusCode::FORBIDDEN);
    }
}
