//! Segment filename contract.
//!
//! Recorded artifacts are named `{streamer}录播YYYY-MM-DDTHH_mm_ss.{ext}`.
//! Downstream grouping parses the portion after `录播`, so the marker and
//! timestamp format are wire-level contracts, not cosmetics.

use chrono::NaiveDateTime;

/// Marker separating the streamer name from the recording timestamp.
pub const RECORDING_MARKER: &str = "录播";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H_%M_%S";

/// Characters invalid in Windows filenames; replaced to keep recordings
/// portable across filesystems.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Build the segment basename (no extension) for a streamer at an instant.
pub fn segment_basename(streamer_name: &str, at: NaiveDateTime) -> String {
    format!(
        "{}{}{}",
        sanitize_filename(streamer_name),
        RECORDING_MARKER,
        at.format("%Y-%m-%dT%H_%M_%S")
    )
}

/// Extract the recording timestamp from a filename.
///
/// Returns None when the marker or a parseable timestamp is missing; the
/// caller falls back to "now" and keeps the file in the unassigned bucket.
pub fn timestamp_from_filename(filename: &str) -> Option<NaiveDateTime> {
    let (_, after) = filename.rsplit_once(RECORDING_MARKER)?;
    let stem = after.split('.').next()?;
    let normalized = stem.replace('T', " ");
    NaiveDateTime::parse_from_str(&normalized, TIMESTAMP_FORMAT).ok()
}

/// Replace control characters and Windows-invalid characters with
/// underscores, collapsing runs; preserves CJK text.
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn basename_round_trips_through_parse() {
        let at = NaiveDate::from_ymd_opt(2026, 2, 24)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();

        let base = segment_basename("洞主", at);
        assert_eq!(base, "洞主录播2026-02-24T10_00_00");

        let parsed = timestamp_from_filename(&format!("{base}.mp4"));
        assert_eq!(parsed, Some(at));
    }

    #[test]
    fn parse_handles_flv_and_part_suffixes() {
        let at = NaiveDate::from_ymd_opt(2026, 2, 24)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert_eq!(
            timestamp_from_filename("洞主录播2026-02-24T10_00_00.flv"),
            Some(at)
        );
        assert_eq!(
            timestamp_from_filename("洞主录播2026-02-24T10_00_00.flv.part"),
            Some(at)
        );
    }

    #[test]
    fn parse_rejects_files_without_marker_or_timestamp() {
        assert_eq!(timestamp_from_filename("random.mp4"), None);
        assert_eq!(timestamp_from_filename("洞主录播garbage.mp4"), None);
        assert_eq!(timestamp_from_filename("洞主录播2026-13-99T10_00_00.mp4"), None);
    }

    #[test]
    fn marker_in_streamer_name_uses_last_occurrence() {
        let at = NaiveDate::from_ymd_opt(2026, 2, 24)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert_eq!(
            timestamp_from_filename("录播狂人录播2026-02-24T10_00_00.mp4"),
            Some(at)
        );
    }

    #[rstest::rstest]
    #[case("hello?world", "hello_world")]
    #[case("a<>:\"b", "a_b")]
    #[case("观看一只青蛙", "观看一只青蛙")]
    #[case("  spaced  ", "spaced")]
    #[case("???", "_")]
    #[case(" . ", "unnamed")]
    fn sanitize_replaces_invalid_characters(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_filename(input), expected);
    }
}
