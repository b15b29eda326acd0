//! Database models.

use chrono::NaiveDateTime;
use sqlx::FromRow;

/// One contiguous live period of a streamer.
///
/// `start_time` is the observed going-live instant biased backward by the
/// configured adjustment; `end_time` is the observed going-offline instant
/// or the cap imposed by the stale-session sweeper. Either may be null when
/// only one edge was observed.
#[derive(Debug, Clone, FromRow)]
pub struct StreamSession {
    pub id: i64,
    pub streamer_name: String,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl StreamSession {
    pub fn is_open(&self) -> bool {
        self.start_time.is_some() && self.end_time.is_none()
    }
}

/// One issued upload attempt for a local artifact.
///
/// `first_part_filename` is the idempotency key; `bvid` stays null for
/// appended parts and for creates whose identifier is discovered later.
#[derive(Debug, Clone, FromRow)]
pub struct UploadedVideo {
    pub id: i64,
    pub bvid: Option<String>,
    pub title: String,
    pub first_part_filename: String,
    pub upload_time: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

/// Insert payload for [`UploadedVideo`]; `created_at` is stamped by the
/// repository.
#[derive(Debug, Clone)]
pub struct NewUploadedVideo {
    pub bvid: Option<String>,
    pub title: String,
    pub first_part_filename: String,
    pub upload_time: NaiveDateTime,
}
