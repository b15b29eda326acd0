//! Uploaded-video persistence.

use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use tracing::warn;

use crate::database::models::{NewUploadedVideo, UploadedVideo};
use crate::time::local_now;

use super::errors::{RepositoryError, RepositoryResult};

const VIDEO_COLUMNS: &str = "id, bvid, title, first_part_filename, upload_time, created_at";

#[async_trait::async_trait]
pub trait UploadedVideoRepository: Send + Sync {
    async fn insert(&self, video: &NewUploadedVideo) -> RepositoryResult<UploadedVideo>;

    /// Idempotency lookup by the per-artifact key.
    async fn find_by_filename(&self, filename: &str) -> RepositoryResult<Option<UploadedVideo>>;

    /// Most recent row with a known identifier inside a session interval.
    async fn latest_bvid_in_interval(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<Option<UploadedVideo>>;

    /// Most recent identifier-less row inside a session interval.
    async fn pending_in_interval(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<Option<UploadedVideo>>;

    /// Number of issued uploads inside a session interval; part numbering
    /// starts at this count plus one.
    async fn count_in_interval(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<i64>;

    async fn list_missing_bvid(&self) -> RepositoryResult<Vec<UploadedVideo>>;

    /// Backfill an identifier. Returns false (and changes nothing) when
    /// another row already carries it.
    async fn assign_bvid(&self, id: i64, bvid: &str) -> RepositoryResult<bool>;

    /// Rows older than `cutoff`, for the delayed-deletion sweep.
    async fn list_created_before(
        &self,
        cutoff: NaiveDateTime,
    ) -> RepositoryResult<Vec<UploadedVideo>>;
}

pub struct SqliteUploadedVideoRepository {
    pool: SqlitePool,
}

impl SqliteUploadedVideoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UploadedVideoRepository for SqliteUploadedVideoRepository {
    async fn insert(&self, video: &NewUploadedVideo) -> RepositoryResult<UploadedVideo> {
        let created_at = local_now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO uploaded_videos (bvid, title, first_part_filename, upload_time, created_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&video.bvid)
        .bind(&video.title)
        .bind(&video.first_part_filename)
        .bind(video.upload_time)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(UploadedVideo {
            id,
            bvid: video.bvid.clone(),
            title: video.title.clone(),
            first_part_filename: video.first_part_filename.clone(),
            upload_time: video.upload_time,
            created_at,
        })
    }

    async fn find_by_filename(&self, filename: &str) -> RepositoryResult<Option<UploadedVideo>> {
        let video = sqlx::query_as::<_, UploadedVideo>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM uploaded_videos WHERE first_part_filename = ?"
        ))
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;
        Ok(video)
    }

    async fn latest_bvid_in_interval(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<Option<UploadedVideo>> {
        let video = sqlx::query_as::<_, UploadedVideo>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM uploaded_videos \
             WHERE upload_time BETWEEN ? AND ? AND bvid IS NOT NULL \
             ORDER BY upload_time DESC LIMIT 1"
        ))
        .bind(start)
        .bind(end)
        .fetch_optional(&self.pool)
        .await?;
        Ok(video)
    }

    async fn pending_in_interval(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<Option<UploadedVideo>> {
        let video = sqlx::query_as::<_, UploadedVideo>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM uploaded_videos \
             WHERE upload_time BETWEEN ? AND ? AND bvid IS NULL \
             ORDER BY upload_time DESC LIMIT 1"
        ))
        .bind(start)
        .bind(end)
        .fetch_optional(&self.pool)
        .await?;
        Ok(video)
    }

    async fn count_in_interval(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM uploaded_videos WHERE upload_time BETWEEN ? AND ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list_missing_bvid(&self) -> RepositoryResult<Vec<UploadedVideo>> {
        let videos = sqlx::query_as::<_, UploadedVideo>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM uploaded_videos \
             WHERE bvid IS NULL ORDER BY upload_time DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(videos)
    }

    async fn assign_bvid(&self, id: i64, bvid: &str) -> RepositoryResult<bool> {
        let mut tx = self.pool.begin().await?;

        let taken: Option<i64> =
            sqlx::query_scalar("SELECT id FROM uploaded_videos WHERE bvid = ? AND id != ?")
                .bind(bvid)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(other) = taken {
            warn!(bvid, other_id = other, "bvid already recorded on another row");
            tx.rollback().await?;
            return Ok(false);
        }

        let result = sqlx::query("UPDATE uploaded_videos SET bvid = ? WHERE id = ? AND bvid IS NULL")
            .bind(bvid)
            .bind(id)
            .execute(&mut *tx)
            .await;

        match result {
            Ok(done) => {
                tx.commit().await?;
                Ok(done.rows_affected() == 1)
            }
            // Raced with another writer; the unique index kept the invariant.
            Err(e) => {
                let repo_error = RepositoryError::from(e);
                if matches!(repo_error, RepositoryError::Constraint(_)) {
                    warn!(bvid, "bvid uniqueness rejected the update");
                    return Ok(false);
                }
                Err(repo_error)
            }
        }
    }

    async fn list_created_before(
        &self,
        cutoff: NaiveDateTime,
    ) -> RepositoryResult<Vec<UploadedVideo>> {
        let videos = sqlx::query_as::<_, UploadedVideo>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM uploaded_videos \
             WHERE created_at < ? ORDER BY created_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(videos)
    }
}
