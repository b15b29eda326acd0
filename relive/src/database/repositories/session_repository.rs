//! Stream session persistence.

use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use crate::database::models::StreamSession;
use crate::time::local_now;

use super::errors::RepositoryResult;

const SESSION_COLUMNS: &str = "id, streamer_name, start_time, end_time, created_at";

/// Outcome of applying a live→offline edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineOutcome {
    /// The most recent open session was closed.
    Closed { session_id: i64 },
    /// No open session existed; a start-less row was inserted instead.
    InsertedEndOnly { session_id: i64 },
}

#[async_trait::async_trait]
pub trait SessionRepository: Send + Sync {
    /// Apply an offline→live edge: close any session still open for this
    /// streamer (anomaly, returned so the caller can log it), then insert
    /// the new open session.
    async fn record_going_live(
        &self,
        streamer_name: &str,
        start_time: NaiveDateTime,
    ) -> RepositoryResult<(StreamSession, Vec<i64>)>;

    /// Apply a live→offline edge: close the most recent open session, or
    /// insert a start-less row when none exists.
    async fn record_going_offline(
        &self,
        streamer_name: &str,
        end_time: NaiveDateTime,
    ) -> RepositoryResult<OfflineOutcome>;

    /// Most recent open session (`start_time` set, `end_time` null).
    async fn latest_open_session(
        &self,
        streamer_name: &str,
    ) -> RepositoryResult<Option<StreamSession>>;

    /// Complete sessions whose end falls after `since`, oldest first.
    async fn complete_sessions_ended_after(
        &self,
        streamer_name: &str,
        since: NaiveDateTime,
    ) -> RepositoryResult<Vec<StreamSession>>;

    /// Open sessions started before `cutoff` (sweeper input).
    async fn open_sessions_started_before(
        &self,
        cutoff: NaiveDateTime,
    ) -> RepositoryResult<Vec<StreamSession>>;

    /// Set the end time of one session.
    async fn close_session(&self, id: i64, end_time: NaiveDateTime) -> RepositoryResult<()>;
}

pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn record_going_live(
        &self,
        streamer_name: &str,
        start_time: NaiveDateTime,
    ) -> RepositoryResult<(StreamSession, Vec<i64>)> {
        let mut tx = self.pool.begin().await?;

        // At most one open session per streamer: close leftovers first.
        let stale: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM stream_sessions \
             WHERE streamer_name = ? AND start_time IS NOT NULL AND end_time IS NULL",
        )
        .bind(streamer_name)
        .fetch_all(&mut *tx)
        .await?;

        for id in &stale {
            sqlx::query("UPDATE stream_sessions SET end_time = ? WHERE id = ?")
                .bind(start_time)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let created_at = local_now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO stream_sessions (streamer_name, start_time, end_time, created_at) \
             VALUES (?, ?, NULL, ?) RETURNING id",
        )
        .bind(streamer_name)
        .bind(start_time)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((
            StreamSession {
                id,
                streamer_name: streamer_name.to_string(),
                start_time: Some(start_time),
                end_time: None,
                created_at,
            },
            stale,
        ))
    }

    async fn record_going_offline(
        &self,
        streamer_name: &str,
        end_time: NaiveDateTime,
    ) -> RepositoryResult<OfflineOutcome> {
        let mut tx = self.pool.begin().await?;

        let open: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM stream_sessions \
             WHERE streamer_name = ? AND start_time IS NOT NULL AND end_time IS NULL \
             ORDER BY start_time DESC LIMIT 1",
        )
        .bind(streamer_name)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match open {
            Some(id) => {
                sqlx::query("UPDATE stream_sessions SET end_time = ? WHERE id = ?")
                    .bind(end_time)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                OfflineOutcome::Closed { session_id: id }
            }
            None => {
                let id: i64 = sqlx::query_scalar(
                    "INSERT INTO stream_sessions (streamer_name, start_time, end_time, created_at) \
                     VALUES (?, NULL, ?, ?) RETURNING id",
                )
                .bind(streamer_name)
                .bind(end_time)
                .bind(local_now())
                .fetch_one(&mut *tx)
                .await?;
                OfflineOutcome::InsertedEndOnly { session_id: id }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn latest_open_session(
        &self,
        streamer_name: &str,
    ) -> RepositoryResult<Option<StreamSession>> {
        let session = sqlx::query_as::<_, StreamSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM stream_sessions \
             WHERE streamer_name = ? AND start_time IS NOT NULL AND end_time IS NULL \
             ORDER BY start_time DESC LIMIT 1"
        ))
        .bind(streamer_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn complete_sessions_ended_after(
        &self,
        streamer_name: &str,
        since: NaiveDateTime,
    ) -> RepositoryResult<Vec<StreamSession>> {
        let sessions = sqlx::query_as::<_, StreamSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM stream_sessions \
             WHERE streamer_name = ? AND start_time IS NOT NULL \
               AND end_time IS NOT NULL AND end_time > ? \
             ORDER BY start_time ASC"
        ))
        .bind(streamer_name)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn open_sessions_started_before(
        &self,
        cutoff: NaiveDateTime,
    ) -> RepositoryResult<Vec<StreamSession>> {
        let sessions = sqlx::query_as::<_, StreamSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM stream_sessions \
             WHERE start_time IS NOT NULL AND start_time < ? AND end_time IS NULL \
             ORDER BY start_time ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn close_session(&self, id: i64, end_time: NaiveDateTime) -> RepositoryResult<()> {
        sqlx::query("UPDATE stream_sessions SET end_time = ? WHERE id = ?")
            .bind(end_time)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
