use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use super::dto::{Page, SortOrder};
use super::model::{File, PublishedVideo, Stats};

const FILE_COLUMNS: &str = "id, user_id, file_key, thumb_key, original_name, format, size, duration, version, created_at, updated_at";

pub struct FileRepository;

impl FileRepository {
    pub async fn find_owned(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<Option<File>> {
        let file = sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE user_id = $1 AND id = $2"
        ))
        .bind(user_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(file)
    }

    pub async fn list(pool: &PgPool, user_id: Uuid, sort: SortOrder, page: Page) -> Result<Vec<File>> {
        let files = sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE user_id = $1 ORDER BY {} LIMIT $2 OFFSET $3",
            sort.order_by()
        ))
        .bind(user_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(pool)
        .await?;

        Ok(files)
    }

    pub async fn search(pool: &PgPool, user_id: Uuid, query: &str, page: Page) -> Result<Vec<File>> {
        let pattern = format!("%{}%", escape_like(query));
        let files = sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM files \
             WHERE user_id = $1 AND original_name ILIKE $2 ESCAPE '\\' \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4"
        ))
        .bind(user_id)
        .bind(pattern)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(pool)
        .await?;

        Ok(files)
    }

    pub async fn list_recent(pool: &PgPool, user_id: Uuid, limit: i64) -> Result<Vec<File>> {
        Self::list(pool, user_id, SortOrder::Newest, Page { limit, offset: 0 }).await
    }

    pub async fn get_stats(pool: &PgPool, user_id: Uuid) -> Result<Option<Stats>> {
        let stats = sqlx::query_as::<_, Stats>(
            "SELECT user_id, max_storage, used_storage, uploaded_files FROM stats WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(stats)
    }

    /// Inserts the file row and bumps the owner's counters in one transaction.
    pub async fn insert_with_stats(
        pool: &PgPool,
        user_id: Uuid,
        name: &str,
        video: &PublishedVideo,
    ) -> Result<File> {
        let mut tx = pool.begin().await?;

        let file = sqlx::query_as::<_, File>(&format!(
            "INSERT INTO files (id, user_id, file_key, thumb_key, original_name, format, size, duration) \
             VALUES ($1, $2, $3, $4, $5, 'video/mp4', $6, $7) \
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&video.file_key)
        .bind(&video.thumb_key)
        .bind(name)
        .bind(video.size)
        .bind(video.duration)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE stats SET used_storage = used_storage + $2, uploaded_files = uploaded_files + 1 WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(video.size)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(file)
    }

    /// Saves a rename or re-encode, bumping the version and adjusting used storage by the size delta.
    pub async fn update_edited(pool: &PgPool, file: &File, previous_size: i64) -> Result<File> {
        let mut tx = pool.begin().await?;

        let updated = sqlx::query_as::<_, File>(&format!(
            "UPDATE files SET original_name = $3, file_key = $4, thumb_key = $5, size = $6, duration = $7, \
             version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 \
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(file.id)
        .bind(file.user_id)
        .bind(&file.original_name)
        .bind(&file.file_key)
        .bind(&file.thumb_key)
        .bind(file.size)
        .bind(file.duration)
        .fetch_one(&mut *tx)
        .await?;

        if previous_size != file.size {
            sqlx::query("UPDATE stats SET used_storage = used_storage + $2 WHERE user_id = $1")
                .bind(file.user_id)
                .bind(file.size - previous_size)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Removes the row and releases its storage. Returns the deleted file, if it existed.
    pub async fn delete_with_stats(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<Option<File>> {
        let mut tx = pool.begin().await?;

        let deleted = sqlx::query_as::<_, File>(&format!(
            "DELETE FROM files WHERE user_id = $1 AND id = $2 RETURNING {FILE_COLUMNS}"
        ))
        .bind(user_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(file) = &deleted {
            sqlx::query(
                "UPDATE stats SET used_storage = GREATEST(used_storage - $2, 0), \
                 uploaded_files = GREATEST(uploaded_files - 1, 0) WHERE user_id = $1",
            )
            .bind(user_id)
            .bind(file.size)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(deleted)
    }
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
