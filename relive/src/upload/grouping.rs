//! Session/part grouping.
//!
//! Maps staged files to stream sessions by timestamp windows and decides,
//! per bucket, whether this run creates a new submission, appends parts to
//! an existing one, or must wait for an identifier backfill.

use std::path::PathBuf;

use chrono::{Duration, NaiveDateTime};

use crate::database::models::StreamSession;
use crate::utils::filename::timestamp_from_filename;

/// Only sessions ending within this window are grouping candidates.
pub const RECENT_SESSION_WINDOW_DAYS: i64 = 3;

/// A staged file awaiting upload.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub filename: String,
    pub timestamp: NaiveDateTime,
    /// False when the timestamp fell back to "now" because the filename
    /// carried no parseable recording timestamp.
    pub parsed: bool,
}

impl CandidateFile {
    pub fn new(path: PathBuf, now: NaiveDateTime) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (timestamp, parsed) = match timestamp_from_filename(&filename) {
            Some(ts) => (ts, true),
            None => (now, false),
        };
        Self {
            path,
            filename,
            timestamp,
            parsed,
        }
    }
}

/// A session's grouping window: `[start − buffer, (end | now) + buffer]`.
#[derive(Debug, Clone)]
pub struct SessionInterval {
    pub session_id: i64,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl SessionInterval {
    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Build the interval for a session; sessions without a start time never
/// induce one.
pub fn session_interval(
    session: &StreamSession,
    now: NaiveDateTime,
    buffer: Duration,
) -> Option<SessionInterval> {
    let start = session.start_time?;
    let end = session.end_time.unwrap_or(now);
    Some(SessionInterval {
        session_id: session.id,
        start: start - buffer,
        end: end + buffer,
    })
}

/// Assign each file to the first interval containing its timestamp.
///
/// Returns the per-session buckets in interval order plus the unassigned
/// remainder. Files within a bucket keep their timestamp order (the caller
/// sorts candidates beforehand).
pub fn assign_to_intervals(
    files: Vec<CandidateFile>,
    intervals: &[SessionInterval],
) -> (Vec<(i64, Vec<CandidateFile>)>, Vec<CandidateFile>) {
    let mut buckets: Vec<(i64, Vec<CandidateFile>)> = intervals
        .iter()
        .map(|interval| (interval.session_id, Vec::new()))
        .collect();
    let mut unassigned = Vec::new();

    'files: for file in files {
        for (index, interval) in intervals.iter().enumerate() {
            if interval.contains(file.timestamp) {
                buckets[index].1.push(file);
                continue 'files;
            }
        }
        unassigned.push(file);
    }

    buckets.retain(|(_, files)| !files.is_empty());
    (buckets, unassigned)
}

/// What this run does with one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketAction {
    /// No prior upload in the interval: create a new submission from the
    /// bucket's first file (and only that file, this run).
    Create,
    /// A known identifier exists: append every file as a further part,
    /// numbering from `start_part`.
    Append { bvid: String, start_part: u32 },
    /// A prior create is still awaiting its identifier; touching this
    /// bucket now would risk a duplicate submission.
    SkipPending { pending_filename: String },
}

/// Decide the bucket action from what persistence knows about the interval.
///
/// `uploaded_count` is the number of issued uploads whose `upload_time`
/// falls inside the interval; part numbering continues after them.
pub fn decide_bucket_action(
    existing_bvid: Option<&str>,
    pending_filename: Option<&str>,
    uploaded_count: i64,
) -> BucketAction {
    if let Some(bvid) = existing_bvid {
        return BucketAction::Append {
            bvid: bvid.to_string(),
            start_part: uploaded_count as u32 + 1,
        };
    }
    if let Some(pending) = pending_filename {
        return BucketAction::SkipPending {
            pending_filename: pending.to_string(),
        };
    }
    BucketAction::Create
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn session(id: i64, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> StreamSession {
        StreamSession {
            id,
            streamer_name: "洞主".to_string(),
            start_time: start,
            end_time: end,
            created_at: dt(24, 9, 0),
        }
    }

    fn file(name: &str, now: NaiveDateTime) -> CandidateFile {
        CandidateFile::new(PathBuf::from(format!("/upload/{name}")), now)
    }

    #[test]
    fn interval_widening_uses_buffer_on_both_sides() {
        let s = session(1, Some(dt(24, 9, 0)), Some(dt(24, 11, 0)));
        let interval = session_interval(&s, dt(24, 23, 0), Duration::minutes(10)).unwrap();
        assert_eq!(interval.start, dt(24, 8, 50));
        assert_eq!(interval.end, dt(24, 11, 10));
    }

    #[test]
    fn open_session_interval_is_bounded_by_now_plus_buffer() {
        let s = session(1, Some(dt(24, 9, 0)), None);
        let now = dt(24, 10, 30);
        let interval = session_interval(&s, now, Duration::minutes(10)).unwrap();
        assert_eq!(interval.end, dt(24, 10, 40));
        assert!(interval.contains(dt(24, 10, 35)));
        assert!(!interval.contains(dt(24, 10, 41)));
    }

    #[test]
    fn end_only_session_induces_no_interval() {
        let s = session(1, None, Some(dt(24, 11, 0)));
        assert!(session_interval(&s, dt(24, 23, 0), Duration::minutes(10)).is_none());
    }

    #[test]
    fn files_go_to_first_matching_interval() {
        let now = dt(25, 0, 0);
        let intervals = vec![
            session_interval(&session(1, Some(dt(24, 9, 0)), Some(dt(24, 11, 0))), now, Duration::minutes(10)).unwrap(),
            session_interval(&session(2, Some(dt(24, 10, 50)), Some(dt(24, 14, 0))), now, Duration::minutes(10)).unwrap(),
        ];

        let files = vec![
            file("洞主录播2026-02-24T10_00_00.mp4", now),
            file("洞主录播2026-02-24T11_05_00.mp4", now), // overlap: first interval wins
            file("洞主录播2026-02-24T13_00_00.mp4", now),
            file("洞主录播2026-02-24T20_00_00.mp4", now),
        ];

        let (buckets, unassigned) = assign_to_intervals(files, &intervals);

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].0, 1);
        assert_eq!(buckets[0].1.len(), 2);
        assert_eq!(buckets[1].0, 2);
        assert_eq!(buckets[1].1.len(), 1);
        assert_eq!(unassigned.len(), 1);
        assert_eq!(unassigned[0].filename, "洞主录播2026-02-24T20_00_00.mp4");
    }

    #[test]
    fn unparsable_filename_falls_back_to_now_and_stays_unassigned() {
        let now = dt(25, 0, 0);
        let f = file("garbage.mp4", now);
        assert!(!f.parsed);
        assert_eq!(f.timestamp, now);

        let intervals = vec![
            session_interval(&session(1, Some(dt(24, 9, 0)), Some(dt(24, 11, 0))), now, Duration::minutes(10)).unwrap(),
        ];
        let (buckets, unassigned) = assign_to_intervals(vec![f], &intervals);
        assert!(buckets.is_empty());
        assert_eq!(unassigned.len(), 1);
    }

    #[test]
    fn existing_bvid_appends_with_continued_numbering() {
        // Three issued uploads already fall in the interval, so the next
        // part is P4.
        let action = decide_bucket_action(Some("BV1TEST0000000000"), None, 3);
        assert_eq!(
            action,
            BucketAction::Append {
                bvid: "BV1TEST0000000000".to_string(),
                start_part: 4
            }
        );
    }

    #[test]
    fn pending_row_blocks_the_bucket() {
        let action = decide_bucket_action(None, Some("placeholder.mp4"), 1);
        assert_eq!(
            action,
            BucketAction::SkipPending {
                pending_filename: "placeholder.mp4".to_string()
            }
        );
    }

    #[test]
    fn empty_interval_creates() {
        assert_eq!(decide_bucket_action(None, None, 0), BucketAction::Create);
    }

    #[test]
    fn known_bvid_wins_over_pending_rows() {
        // Both exist: the identifier is known, so appending is safe.
        let action = decide_bucket_action(Some("BV1TEST0000000000"), Some("x.mp4"), 2);
        assert!(matches!(action, BucketAction::Append { start_part: 3, .. }));
    }
}
