//! Upload orchestration.
//!
//! Scans the staging directory, groups files into session buckets, then per
//! bucket either creates a new submission (first file only), appends parts
//! to a known identifier, or waits for a pending identifier backfill. Rows
//! are persisted before any local file is deleted, so a crash between the
//! two leaves a retained file and an idempotency record rather than a lost
//! artifact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, error, info, warn};

use crate::config::{Settings, UploadMeta};
use crate::database::models::NewUploadedVideo;
use crate::database::repositories::{
    RepositoryError, SessionRepository, UploadedVideoRepository,
};
use crate::time::local_now;
use crate::upload::backend::{AppendOutcome, BvidSource, CreateRequest, UploadBackend};
use crate::upload::grouping::{
    BucketAction, CandidateFile, RECENT_SESSION_WINDOW_DAYS, SessionInterval,
    assign_to_intervals, decide_bucket_action, session_interval,
};
use crate::utils::fs::files_with_extension;

/// Attempts to discover a freshly created submission's identifier.
const BVID_DISCOVERY_ATTEMPTS: u32 = 3;

/// Listing statuses covering published and still-publishing submissions.
const LISTING_STATUSES: &[&str] = &["is_pubing", "pubed"];

/// Per-run configuration snapshot, taken at tick boundaries.
#[derive(Debug, Clone)]
pub struct UploadRunConfig {
    pub upload_dir: PathBuf,
    pub streamers: Vec<String>,
    pub skip_video_encoding: bool,
    pub danmaku_title_suffix: String,
    pub no_danmaku_title_suffix: String,
    pub buffer_minutes: i64,
    pub meta: UploadMeta,
    pub rate_limit_cooldown: Duration,
    pub rate_limit_max_retries: u32,
    pub delete_uploaded_files: bool,
    pub delete_delay_hours: i64,
    pub bvid_poll_wait: Duration,
}

impl UploadRunConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            upload_dir: settings.paths.upload_folder.clone(),
            streamers: settings.streamers.iter().map(|s| s.name.clone()).collect(),
            skip_video_encoding: settings.processing.skip_video_encoding,
            danmaku_title_suffix: settings.processing.danmaku_title_suffix.clone(),
            no_danmaku_title_suffix: settings.processing.no_danmaku_title_suffix.clone(),
            buffer_minutes: settings.schedule.stream_start_time_adjustment,
            meta: settings.upload.meta.clone(),
            rate_limit_cooldown: Duration::from_secs(settings.upload.rate_limit_cooldown_seconds),
            rate_limit_max_retries: settings.upload.rate_limit_append_max_retries,
            delete_uploaded_files: settings.deletion.delete_uploaded_files,
            delete_delay_hours: settings.deletion.delay_hours,
            bvid_poll_wait: Duration::from_secs(5),
        }
    }

    fn extension(&self) -> &'static str {
        if self.skip_video_encoding { "flv" } else { "mp4" }
    }

    fn mode_suffix(&self) -> &str {
        if self.skip_video_encoding {
            &self.no_danmaku_title_suffix
        } else {
            &self.danmaku_title_suffix
        }
    }
}

pub struct UploadOrchestrator {
    backend: Box<dyn UploadBackend>,
    videos: Arc<dyn UploadedVideoRepository>,
    sessions: Arc<dyn SessionRepository>,
    config: UploadRunConfig,
}

impl UploadOrchestrator {
    pub fn new(
        backend: Box<dyn UploadBackend>,
        videos: Arc<dyn UploadedVideoRepository>,
        sessions: Arc<dyn SessionRepository>,
        config: UploadRunConfig,
    ) -> Self {
        Self {
            backend,
            videos,
            sessions,
            config,
        }
    }

    /// One scheduled upload pass: backfill missing identifiers, then work
    /// through the staged files.
    pub async fn run(&self) -> crate::Result<()> {
        self.backfill_bvids().await?;
        self.upload_pending().await
    }

    /// Backfill identifiers for rows still missing one by matching exact
    /// titles against the destination listing. A no-op when creates return
    /// their identifier synchronously.
    pub async fn backfill_bvids(&self) -> crate::Result<()> {
        let rows = self.videos.list_missing_bvid().await?;
        if rows.is_empty() {
            debug!("no rows awaiting an identifier");
            return Ok(());
        }

        if !self.backend.check_login().await? {
            warn!("destination login check failed, skipping identifier backfill");
            return Ok(());
        }

        let listing = match self.backend.list_submissions(LISTING_STATUSES).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(error = %e, "submissions listing unavailable, backfill deferred");
                return Ok(());
            }
        };

        let by_title: HashMap<&str, &str> = listing
            .iter()
            .map(|s| (s.title.as_str(), s.bvid.as_str()))
            .collect();

        let total = rows.len();
        let mut updated = 0usize;
        for row in rows {
            let Some(bvid) = by_title.get(row.title.as_str()) else {
                continue;
            };
            match self.videos.assign_bvid(row.id, bvid).await {
                Ok(true) => {
                    info!(id = row.id, bvid, title = %row.title, "identifier backfilled");
                    updated += 1;
                }
                Ok(false) => {
                    warn!(id = row.id, bvid, "identifier already taken, row left pending");
                }
                Err(e) => error!(id = row.id, error = %e, "identifier backfill failed"),
            }
        }

        info!(updated, total, "identifier backfill finished");
        Ok(())
    }

    /// Group staged files into session buckets and act on each bucket.
    pub async fn upload_pending(&self) -> crate::Result<()> {
        let now = local_now();
        let extension = self.config.extension();

        let paths = files_with_extension(&self.config.upload_dir, extension).await?;
        if paths.is_empty() {
            info!(extension, "nothing staged for upload");
            return Ok(());
        }

        // Destination auth failure aborts the whole run.
        if !self.backend.check_login().await? {
            error!("destination login check failed, aborting upload run");
            return Ok(());
        }

        let mut candidates: Vec<CandidateFile> = paths
            .into_iter()
            .map(|path| CandidateFile::new(path, now))
            .collect();
        candidates.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let mut fresh = Vec::new();
        for candidate in candidates {
            if self
                .videos
                .find_by_filename(&candidate.filename)
                .await?
                .is_some()
            {
                debug!(file = %candidate.filename, "already recorded, skipping");
            } else {
                fresh.push(candidate);
            }
        }
        if fresh.is_empty() {
            info!("every staged file already has an upload record");
            return Ok(());
        }

        let intervals = self.load_intervals(now).await?;
        if intervals.is_empty() {
            warn!("no usable stream sessions, cannot group staged files");
            return Ok(());
        }

        let by_id: HashMap<i64, SessionInterval> = intervals
            .iter()
            .map(|i| (i.session_id, i.clone()))
            .collect();

        let (buckets, unassigned) = assign_to_intervals(fresh, &intervals);

        // Files matching no session interval stay local: their upload
        // policy is undefined, so they are only reported.
        for file in &unassigned {
            warn!(
                file = %file.filename,
                parsed_timestamp = file.parsed,
                "file matches no session interval, leaving unassigned"
            );
        }

        for (session_id, files) in buckets {
            let Some(interval) = by_id.get(&session_id) else {
                continue;
            };
            if let Err(e) = self.process_bucket(interval, &files).await {
                error!(session_id, error = %e, "bucket processing failed");
            }
        }

        Ok(())
    }

    /// Session intervals for every configured streamer: complete sessions
    /// ending in the recent window, plus the latest open one.
    async fn load_intervals(&self, now: NaiveDateTime) -> crate::Result<Vec<SessionInterval>> {
        let since = now - chrono::Duration::days(RECENT_SESSION_WINDOW_DAYS);
        let buffer = chrono::Duration::minutes(self.config.buffer_minutes);

        let mut intervals = Vec::new();
        for streamer in &self.config.streamers {
            for session in self
                .sessions
                .complete_sessions_ended_after(streamer, since)
                .await?
            {
                if let Some(interval) = session_interval(&session, now, buffer) {
                    intervals.push(interval);
                }
            }
            if let Some(open) = self.sessions.latest_open_session(streamer).await?
                && let Some(interval) = session_interval(&open, now, buffer)
            {
                intervals.push(interval);
            }
        }

        intervals.sort_by(|a, b| a.start.cmp(&b.start));
        Ok(intervals)
    }

    async fn process_bucket(
        &self,
        interval: &SessionInterval,
        files: &[CandidateFile],
    ) -> crate::Result<()> {
        let existing = self
            .videos
            .latest_bvid_in_interval(interval.start, interval.end)
            .await?;
        let pending = match existing {
            Some(_) => None,
            None => {
                self.videos
                    .pending_in_interval(interval.start, interval.end)
                    .await?
            }
        };
        let count = self
            .videos
            .count_in_interval(interval.start, interval.end)
            .await?;

        let action = decide_bucket_action(
            existing.as_ref().and_then(|v| v.bvid.as_deref()),
            pending.as_ref().map(|v| v.first_part_filename.as_str()),
            count,
        );

        match action {
            BucketAction::SkipPending { pending_filename } => {
                info!(
                    session_id = interval.session_id,
                    pending = %pending_filename,
                    "bucket has an upload awaiting its identifier, skipping until backfill"
                );
            }
            BucketAction::Create => {
                self.create_for_bucket(interval.session_id, files).await;
            }
            BucketAction::Append { bvid, start_part } => {
                self.append_bucket(interval.session_id, &bvid, start_part, files)
                    .await;
            }
        }

        Ok(())
    }

    /// Create a new submission from the bucket's first file. Remaining
    /// files are deliberately left for the next run.
    async fn create_for_bucket(&self, session_id: i64, files: &[CandidateFile]) {
        let Some(first) = files.first() else { return };

        let title = build_title(
            &self.config.meta.title,
            first.timestamp,
            files.len(),
            self.config.mode_suffix(),
        );

        info!(
            session_id,
            file = %first.filename,
            title = %title,
            "creating new submission"
        );

        let source = match self
            .backend
            .create_submission(&CreateRequest {
                file: &first.path,
                title: &title,
                meta: &self.config.meta,
            })
            .await
        {
            Ok(source) => source,
            Err(e) => {
                error!(file = %first.filename, error = %e, "create submission failed");
                return;
            }
        };

        let bvid = match &source {
            BvidSource::Synchronous(bvid) => Some(bvid.clone()),
            BvidSource::Asynchronous => None,
        };

        let record = match self
            .videos
            .insert(&NewUploadedVideo {
                bvid,
                title: title.clone(),
                first_part_filename: first.filename.clone(),
                upload_time: first.timestamp,
            })
            .await
        {
            Ok(record) => record,
            Err(RepositoryError::Constraint(msg)) => {
                warn!(file = %first.filename, %msg, "upload row already exists");
                return;
            }
            Err(e) => {
                error!(file = %first.filename, error = %e, "failed to persist upload row");
                return;
            }
        };

        // Row is persisted; only now may the local file go away.
        self.apply_deletion_policy(&first.path).await;

        if matches!(source, BvidSource::Asynchronous) {
            self.discover_bvid(record.id, &title).await;
        }

        if files.len() > 1 {
            info!(
                session_id,
                remaining = files.len() - 1,
                "remaining files will be appended on a later run"
            );
        }
    }

    /// Poll the submissions listing for the identifier of a just-created
    /// submission, matching by exact title.
    async fn discover_bvid(&self, record_id: i64, title: &str) {
        for attempt in 1..=BVID_DISCOVERY_ATTEMPTS {
            match self.backend.list_submissions(LISTING_STATUSES).await {
                Ok(listing) => {
                    if let Some(submission) = listing.iter().find(|s| s.title == title) {
                        match self.videos.assign_bvid(record_id, &submission.bvid).await {
                            Ok(true) => {
                                info!(
                                    id = record_id,
                                    bvid = %submission.bvid,
                                    "identifier discovered"
                                );
                            }
                            Ok(false) => warn!(
                                id = record_id,
                                bvid = %submission.bvid,
                                "discovered identifier already taken"
                            ),
                            Err(e) => {
                                error!(id = record_id, error = %e, "failed to store identifier")
                            }
                        }
                        return;
                    }
                    debug!(attempt, title, "submission not in listing yet");
                }
                Err(e) => warn!(attempt, error = %e, "submissions listing unavailable"),
            }

            if attempt < BVID_DISCOVERY_ATTEMPTS {
                tokio::time::sleep(self.config.bvid_poll_wait).await;
            }
        }

        warn!(
            id = record_id,
            "identifier not yet available; the backfill pass will retry"
        );
    }

    /// Append every file of the bucket as further parts, in order.
    async fn append_bucket(
        &self,
        session_id: i64,
        bvid: &str,
        start_part: u32,
        files: &[CandidateFile],
    ) {
        info!(session_id, bvid, start_part, files = files.len(), "appending parts");

        let mut part_number = start_part;
        for file in files {
            match self.videos.find_by_filename(&file.filename).await {
                Ok(Some(_)) => {
                    info!(file = %file.filename, "already recorded, skipping append");
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(file = %file.filename, error = %e, "idempotency check failed");
                    continue;
                }
            }

            let suffix = self
                .config
                .skip_video_encoding
                .then(|| self.config.mode_suffix());
            let title = part_title(part_number, file.timestamp, suffix);

            match self.append_one_with_retry(&file.path, bvid).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(file = %file.filename, error = %e, "append failed");
                    continue;
                }
            }

            match self
                .videos
                .insert(&NewUploadedVideo {
                    bvid: None,
                    title: format!("{title} (分P)"),
                    first_part_filename: file.filename.clone(),
                    upload_time: file.timestamp,
                })
                .await
            {
                Ok(_) => {
                    info!(file = %file.filename, part = part_number, "part appended");
                    self.apply_deletion_policy(&file.path).await;
                    part_number += 1;
                }
                Err(e) => {
                    error!(file = %file.filename, error = %e, "failed to persist part row");
                }
            }
        }
    }

    /// Append one file, honoring the destination rate limit: sleep the
    /// cooldown and retry this file up to the configured count.
    async fn append_one_with_retry(&self, file: &Path, bvid: &str) -> crate::Result<bool> {
        let mut attempts = 0u32;
        loop {
            match self.backend.append_part(file, bvid).await? {
                AppendOutcome::Success => return Ok(true),
                AppendOutcome::RateLimited => {
                    if attempts >= self.config.rate_limit_max_retries {
                        error!(
                            file = %file.display(),
                            attempts,
                            "rate limit retries exhausted, leaving file for the next run"
                        );
                        return Ok(false);
                    }
                    attempts += 1;
                    warn!(
                        file = %file.display(),
                        cooldown_secs = self.config.rate_limit_cooldown.as_secs(),
                        attempt = attempts,
                        max = self.config.rate_limit_max_retries,
                        "destination rate limit hit, cooling down"
                    );
                    tokio::time::sleep(self.config.rate_limit_cooldown).await;
                }
            }
        }
    }

    /// Immediate-deletion branch of the local-file policy; the delayed
    /// branch is handled by [`sweep_deletable_artifacts`].
    async fn apply_deletion_policy(&self, path: &Path) {
        if !self.config.delete_uploaded_files {
            return;
        }
        if self.config.delete_delay_hours > 0 {
            debug!(file = %path.display(), "retained for delayed deletion");
            return;
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => info!(file = %path.display(), "uploaded file deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(file = %path.display(), error = %e, "failed to delete uploaded file"),
        }
    }

}

/// Delayed-deletion sweep: remove staged artifacts whose upload row is
/// older than the configured delay. Independent of the upload backend so
/// the tick can run it even when scheduled uploads are disabled.
pub async fn sweep_deletable_artifacts(
    videos: &dyn UploadedVideoRepository,
    config: &UploadRunConfig,
) -> crate::Result<()> {
    if !config.delete_uploaded_files || config.delete_delay_hours <= 0 {
        return Ok(());
    }

    let cutoff = local_now() - chrono::Duration::hours(config.delete_delay_hours);
    for row in videos.list_created_before(cutoff).await? {
        let path = config.upload_dir.join(&row.first_part_filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!(file = %path.display(), "removed artifact past deletion delay"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(file = %path.display(), error = %e, "delayed deletion failed"),
        }
    }

    Ok(())
}

/// Build a submission title from the configured template.
///
/// `{time}` becomes the first file's date as `YYYY年MM月DD日`; a template
/// without the placeholder gets a `(合集 YYYY-MM-DD)` marker when the
/// bucket holds more than one file. The mode suffix is always appended.
pub fn build_title(
    template: &str,
    first_timestamp: NaiveDateTime,
    file_count: usize,
    mode_suffix: &str,
) -> String {
    let mut title = if template.contains("{time}") {
        template.replace(
            "{time}",
            &first_timestamp.format("%Y年%m月%d日").to_string(),
        )
    } else if file_count > 1 {
        format!("{} (合集 {})", template, first_timestamp.format("%Y-%m-%d"))
    } else {
        template.to_string()
    };

    if !mode_suffix.is_empty() {
        title = format!("{title} {mode_suffix}");
    }
    title
}

/// `Pn HH:MM:SS[ suffix]` for an appended part.
pub fn part_title(part_number: u32, timestamp: NaiveDateTime, suffix: Option<&str>) -> String {
    let base = format!("P{part_number} {}", timestamp.format("%H:%M:%S"));
    match suffix {
        Some(suffix) if !suffix.is_empty() => format!("{base} {suffix}"),
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::db::memory_pool;
    use crate::database::repositories::{
        SqliteSessionRepository, SqliteUploadedVideoRepository,
    };
    use crate::upload::backend::Submission;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    #[test]
    fn title_substitutes_time_placeholder() {
        let ts = NaiveDate::from_ymd_opt(2026, 2, 24)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert_eq!(
            build_title("直播录像 {time}", ts, 1, "(弹幕版)"),
            "直播录像 2026年02月24日 (弹幕版)"
        );
    }

    #[test]
    fn title_without_placeholder_marks_multi_file_buckets() {
        let ts = NaiveDate::from_ymd_opt(2026, 2, 24)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert_eq!(build_title("固定标题", ts, 1, ""), "固定标题");
        assert_eq!(build_title("固定标题", ts, 3, ""), "固定标题 (合集 2026-02-24)");
    }

    #[test]
    fn part_title_format() {
        let ts = NaiveDate::from_ymd_opt(2026, 2, 24)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert_eq!(part_title(4, ts, None), "P4 10:00:00");
        assert_eq!(part_title(2, ts, Some("(无弹幕版)")), "P2 10:00:00 (无弹幕版)");
    }

    // ---- scripted backend -------------------------------------------------

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Login,
        Create { title: String },
        Append { file: String, bvid: String },
        List,
    }

    #[derive(Default)]
    struct ScriptedBackend {
        create_bvid: Option<String>,
        append_script: Mutex<VecDeque<AppendOutcome>>,
        listings: Mutex<VecDeque<Vec<Submission>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedBackend {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        fn appends(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Append { .. }))
                .count()
        }

        fn creates(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Create { .. }))
                .count()
        }
    }

    #[async_trait]
    impl UploadBackend for ScriptedBackend {
        async fn check_login(&self) -> crate::Result<bool> {
            self.calls.lock().push(Call::Login);
            Ok(true)
        }

        async fn create_submission(
            &self,
            request: &CreateRequest<'_>,
        ) -> crate::Result<BvidSource> {
            self.calls.lock().push(Call::Create {
                title: request.title.to_string(),
            });
            Ok(match &self.create_bvid {
                Some(bvid) => BvidSource::Synchronous(bvid.clone()),
                None => BvidSource::Asynchronous,
            })
        }

        async fn append_part(&self, file: &Path, bvid: &str) -> crate::Result<AppendOutcome> {
            self.calls.lock().push(Call::Append {
                file: file.file_name().unwrap().to_string_lossy().into_owned(),
                bvid: bvid.to_string(),
            });
            Ok(self
                .append_script
                .lock()
                .pop_front()
                .unwrap_or(AppendOutcome::Success))
        }

        async fn list_submissions(&self, _statuses: &[&str]) -> crate::Result<Vec<Submission>> {
            self.calls.lock().push(Call::List);
            Ok(self.listings.lock().pop_front().unwrap_or_default())
        }
    }

    // ---- fixture ----------------------------------------------------------

    struct Fixture {
        pool: sqlx::SqlitePool,
        videos: Arc<SqliteUploadedVideoRepository>,
        sessions: Arc<SqliteSessionRepository>,
        upload_dir: TempDir,
        now: NaiveDateTime,
    }

    impl Fixture {
        async fn new() -> Self {
            let pool = memory_pool().await;
            Self {
                videos: Arc::new(SqliteUploadedVideoRepository::new(pool.clone())),
                sessions: Arc::new(SqliteSessionRepository::new(pool.clone())),
                pool,
                upload_dir: TempDir::new().unwrap(),
                now: local_now(),
            }
        }

        fn config(&self) -> UploadRunConfig {
            UploadRunConfig {
                upload_dir: self.upload_dir.path().to_path_buf(),
                streamers: vec!["洞主".to_string()],
                skip_video_encoding: false,
                danmaku_title_suffix: String::new(),
                no_danmaku_title_suffix: "(无弹幕版)".to_string(),
                buffer_minutes: 10,
                meta: UploadMeta {
                    title: "直播录像 {time}".to_string(),
                    tid: 171,
                    ..UploadMeta::default()
                },
                rate_limit_cooldown: Duration::ZERO,
                rate_limit_max_retries: 1,
                delete_uploaded_files: false,
                delete_delay_hours: 24,
                bvid_poll_wait: Duration::ZERO,
            }
        }

        fn orchestrator(
            &self,
            backend: Arc<ScriptedBackend>,
            config: UploadRunConfig,
        ) -> UploadOrchestrator {
            UploadOrchestrator::new(
                Box::new(SharedBackend(backend)),
                self.videos.clone(),
                self.sessions.clone(),
                config,
            )
        }

        /// Session over [now−3h, now−1h].
        async fn seed_session(&self) {
            self.sessions
                .record_going_live("洞主", self.now - chrono::Duration::hours(3))
                .await
                .unwrap();
            self.sessions
                .record_going_offline("洞主", self.now - chrono::Duration::hours(1))
                .await
                .unwrap();
        }

        fn hours_ago(&self, hours: i64, minutes: i64) -> NaiveDateTime {
            self.now - chrono::Duration::hours(hours) - chrono::Duration::minutes(minutes)
        }

        /// Stage a file whose recording timestamp is `at`.
        fn stage_file(&self, at: NaiveDateTime, extension: &str) -> String {
            let name = format!("洞主录播{}.{extension}", at.format("%Y-%m-%dT%H_%M_%S"));
            std::fs::write(self.upload_dir.path().join(&name), b"video").unwrap();
            name
        }

        async fn seed_row(&self, filename: &str, bvid: Option<&str>, at: NaiveDateTime) {
            self.videos
                .insert(&NewUploadedVideo {
                    bvid: bvid.map(String::from),
                    title: format!("row {filename}"),
                    first_part_filename: filename.to_string(),
                    upload_time: at,
                })
                .await
                .unwrap();
        }
    }

    /// Adapter so tests can keep a handle on the scripted backend.
    struct SharedBackend(Arc<ScriptedBackend>);

    #[async_trait]
    impl UploadBackend for SharedBackend {
        async fn check_login(&self) -> crate::Result<bool> {
            self.0.check_login().await
        }
        async fn create_submission(
            &self,
            request: &CreateRequest<'_>,
        ) -> crate::Result<BvidSource> {
            self.0.create_submission(request).await
        }
        async fn append_part(&self, file: &Path, bvid: &str) -> crate::Result<AppendOutcome> {
            self.0.append_part(file, bvid).await
        }
        async fn list_submissions(&self, statuses: &[&str]) -> crate::Result<Vec<Submission>> {
            self.0.list_submissions(statuses).await
        }
    }

    // ---- scenarios --------------------------------------------------------

    #[tokio::test]
    async fn bucket_with_known_bvid_appends_with_continued_numbering() {
        let fixture = Fixture::new().await;
        fixture.seed_session().await;

        // Three uploads already fall in the interval: one with the
        // identifier, two appended parts awaiting backfill.
        fixture
            .seed_row("a.mp4", Some("BV1xx411c7mD"), fixture.hours_ago(2, 30))
            .await;
        fixture.seed_row("b.mp4", None, fixture.hours_ago(2, 20)).await;
        fixture.seed_row("c.mp4", None, fixture.hours_ago(2, 10)).await;

        let staged = fixture.stage_file(fixture.hours_ago(2, 0), "mp4");

        let backend = Arc::new(ScriptedBackend::default());
        let orchestrator = fixture.orchestrator(backend.clone(), fixture.config());
        orchestrator.upload_pending().await.unwrap();

        assert_eq!(backend.creates(), 0);
        assert_eq!(backend.appends(), 1);
        assert!(backend.calls().contains(&Call::Append {
            file: staged.clone(),
            bvid: "BV1xx411c7mD".to_string(),
        }));

        // Three prior rows in the interval, so the new part is P4.
        let row = fixture.videos.find_by_filename(&staged).await.unwrap().unwrap();
        assert!(row.title.starts_with("P4 "), "title was {}", row.title);
        assert!(row.title.ends_with("(分P)"));
        assert_eq!(row.bvid, None);
    }

    #[tokio::test]
    async fn pending_identifier_blocks_the_bucket_entirely() {
        let fixture = Fixture::new().await;
        fixture.seed_session().await;
        fixture
            .seed_row("placeholder.mp4", None, fixture.hours_ago(2, 30))
            .await;

        let staged = fixture.stage_file(fixture.hours_ago(2, 0), "mp4");

        let backend = Arc::new(ScriptedBackend::default());
        let orchestrator = fixture.orchestrator(backend.clone(), fixture.config());
        orchestrator.upload_pending().await.unwrap();

        assert_eq!(backend.creates(), 0);
        assert_eq!(backend.appends(), 0);
        assert!(fixture.videos.find_by_filename(&staged).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_bucket_creates_only_the_first_file() {
        let fixture = Fixture::new().await;
        fixture.seed_session().await;

        let first = fixture.stage_file(fixture.hours_ago(2, 30), "mp4");
        let second = fixture.stage_file(fixture.hours_ago(2, 0), "mp4");

        let backend = Arc::new(ScriptedBackend {
            create_bvid: Some("BV1xx411c7mD".to_string()),
            ..ScriptedBackend::default()
        });
        let orchestrator = fixture.orchestrator(backend.clone(), fixture.config());
        orchestrator.upload_pending().await.unwrap();

        assert_eq!(backend.creates(), 1);
        assert_eq!(backend.appends(), 0);

        let row = fixture.videos.find_by_filename(&first).await.unwrap().unwrap();
        assert_eq!(row.bvid.as_deref(), Some("BV1xx411c7mD"));
        assert!(fixture.videos.find_by_filename(&second).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn asynchronous_create_discovers_identifier_from_listing() {
        let fixture = Fixture::new().await;
        fixture.seed_session().await;
        let staged = fixture.stage_file(fixture.hours_ago(2, 0), "mp4");

        let expected_title = build_title(
            "直播录像 {time}",
            fixture.hours_ago(2, 0),
            1,
            "",
        );

        let backend = Arc::new(ScriptedBackend {
            create_bvid: None,
            listings: Mutex::new(VecDeque::from([
                vec![], // first poll: not listed yet
                vec![Submission {
                    title: expected_title.clone(),
                    bvid: "BV1yy411c7mD".to_string(),
                }],
            ])),
            ..ScriptedBackend::default()
        });
        let orchestrator = fixture.orchestrator(backend.clone(), fixture.config());
        orchestrator.upload_pending().await.unwrap();

        let row = fixture.videos.find_by_filename(&staged).await.unwrap().unwrap();
        assert_eq!(row.bvid.as_deref(), Some("BV1yy411c7mD"));
    }

    #[tokio::test]
    async fn rate_limited_append_retries_and_inserts_exactly_one_row() {
        let fixture = Fixture::new().await;
        fixture.seed_session().await;
        fixture
            .seed_row("a.mp4", Some("BV1xx411c7mD"), fixture.hours_ago(2, 30))
            .await;

        let staged = fixture.stage_file(fixture.hours_ago(2, 0), "mp4");

        let backend = Arc::new(ScriptedBackend {
            append_script: Mutex::new(VecDeque::from([
                AppendOutcome::RateLimited,
                AppendOutcome::Success,
            ])),
            ..ScriptedBackend::default()
        });
        let orchestrator = fixture.orchestrator(backend.clone(), fixture.config());
        orchestrator.upload_pending().await.unwrap();

        assert_eq!(backend.appends(), 2);
        assert!(fixture.videos.find_by_filename(&staged).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn exhausted_rate_limit_gives_up_without_a_row() {
        let fixture = Fixture::new().await;
        fixture.seed_session().await;
        fixture
            .seed_row("a.mp4", Some("BV1xx411c7mD"), fixture.hours_ago(2, 30))
            .await;

        let staged = fixture.stage_file(fixture.hours_ago(2, 0), "mp4");

        let backend = Arc::new(ScriptedBackend {
            append_script: Mutex::new(VecDeque::from([
                AppendOutcome::RateLimited,
                AppendOutcome::RateLimited,
            ])),
            ..ScriptedBackend::default()
        });
        let orchestrator = fixture.orchestrator(backend.clone(), fixture.config());
        orchestrator.upload_pending().await.unwrap();

        // max_retries = 1: the original attempt plus one retry.
        assert_eq!(backend.appends(), 2);
        assert!(fixture.videos.find_by_filename(&staged).await.unwrap().is_none());
        assert!(fixture.upload_dir.path().join(&staged).exists());
    }

    #[tokio::test]
    async fn rerun_with_no_new_files_is_a_no_op() {
        let fixture = Fixture::new().await;
        fixture.seed_session().await;
        let staged = fixture.stage_file(fixture.hours_ago(2, 0), "mp4");
        fixture
            .seed_row(&staged, Some("BV1xx411c7mD"), fixture.hours_ago(2, 0))
            .await;

        let backend = Arc::new(ScriptedBackend::default());
        let orchestrator = fixture.orchestrator(backend.clone(), fixture.config());
        orchestrator.upload_pending().await.unwrap();

        assert_eq!(backend.creates(), 0);
        assert_eq!(backend.appends(), 0);
    }

    #[tokio::test]
    async fn unassigned_files_are_never_uploaded() {
        let fixture = Fixture::new().await;
        fixture.seed_session().await;

        // Timestamp far outside the session interval.
        let staged = fixture.stage_file(fixture.now - chrono::Duration::days(2), "mp4");
        std::fs::write(fixture.upload_dir.path().join("garbage.mp4"), b"x").unwrap();

        let backend = Arc::new(ScriptedBackend::default());
        let orchestrator = fixture.orchestrator(backend.clone(), fixture.config());
        orchestrator.upload_pending().await.unwrap();

        assert_eq!(backend.creates(), 0);
        assert_eq!(backend.appends(), 0);
        assert!(fixture.upload_dir.path().join(&staged).exists());
        assert!(fixture.upload_dir.path().join("garbage.mp4").exists());
    }

    #[tokio::test]
    async fn backfill_matches_titles_and_respects_uniqueness() {
        let fixture = Fixture::new().await;
        let taken = fixture
            .videos
            .insert(&NewUploadedVideo {
                bvid: Some("BV1xx411c7mD".to_string()),
                title: "已占用".to_string(),
                first_part_filename: "taken.mp4".to_string(),
                upload_time: fixture.hours_ago(5, 0),
            })
            .await
            .unwrap();
        fixture.seed_row("p1.mp4", None, fixture.hours_ago(4, 0)).await;
        fixture.seed_row("p2.mp4", None, fixture.hours_ago(3, 0)).await;

        let backend = Arc::new(ScriptedBackend {
            listings: Mutex::new(VecDeque::from([vec![
                Submission {
                    title: "row p1.mp4".to_string(),
                    bvid: "BV1zz411c7mD".to_string(),
                },
                Submission {
                    title: "row p2.mp4".to_string(),
                    // Already taken by another row: must be refused.
                    bvid: "BV1xx411c7mD".to_string(),
                },
            ]])),
            ..ScriptedBackend::default()
        });
        let orchestrator = fixture.orchestrator(backend.clone(), fixture.config());
        orchestrator.backfill_bvids().await.unwrap();

        let p1 = fixture.videos.find_by_filename("p1.mp4").await.unwrap().unwrap();
        assert_eq!(p1.bvid.as_deref(), Some("BV1zz411c7mD"));

        let p2 = fixture.videos.find_by_filename("p2.mp4").await.unwrap().unwrap();
        assert_eq!(p2.bvid, None);

        let owner = fixture.videos.find_by_filename("taken.mp4").await.unwrap().unwrap();
        assert_eq!(owner.id, taken.id);
    }

    #[tokio::test]
    async fn delayed_deletion_removes_only_rows_past_the_horizon() {
        let fixture = Fixture::new().await;

        let fresh = fixture.stage_file(fixture.hours_ago(0, 30), "mp4");
        let old = fixture.stage_file(fixture.hours_ago(3, 0), "mp4");
        fixture.seed_row(&fresh, None, fixture.hours_ago(0, 30)).await;
        fixture.seed_row(&old, None, fixture.hours_ago(3, 0)).await;

        // Backdate created_at, which the repository stamps at insert time.
        sqlx::query("UPDATE uploaded_videos SET created_at = ? WHERE first_part_filename = ?")
            .bind(fixture.hours_ago(0, 30))
            .bind(&fresh)
            .execute(&fixture.pool)
            .await
            .unwrap();
        sqlx::query("UPDATE uploaded_videos SET created_at = ? WHERE first_part_filename = ?")
            .bind(fixture.hours_ago(3, 0))
            .bind(&old)
            .execute(&fixture.pool)
            .await
            .unwrap();

        let mut config = fixture.config();
        config.delete_uploaded_files = true;
        config.delete_delay_hours = 1;

        sweep_deletable_artifacts(fixture.videos.as_ref(), &config)
            .await
            .unwrap();

        assert!(fixture.upload_dir.path().join(&fresh).exists());
        assert!(!fixture.upload_dir.path().join(&old).exists());
    }

    #[tokio::test]
    async fn immediate_deletion_removes_file_after_row_is_persisted() {
        let fixture = Fixture::new().await;
        fixture.seed_session().await;
        let staged = fixture.stage_file(fixture.hours_ago(2, 0), "mp4");

        let mut config = fixture.config();
        config.delete_uploaded_files = true;
        config.delete_delay_hours = 0;

        let backend = Arc::new(ScriptedBackend {
            create_bvid: Some("BV1xx411c7mD".to_string()),
            ..ScriptedBackend::default()
        });
        let orchestrator = fixture.orchestrator(backend, config);
        orchestrator.upload_pending().await.unwrap();

        assert!(fixture.videos.find_by_filename(&staged).await.unwrap().is_some());
        assert!(!fixture.upload_dir.path().join(&staged).exists());
    }
}
