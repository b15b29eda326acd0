//! One segment: recorder and chat collector with aligned lifetimes.
//!
//! Both tasks run with the same duration and a coupled output basename;
//! neither `.part → final` rename happens before both have ended. A failure
//! of one side never cancels the other, and finalization runs for whichever
//! artifacts exist.

use std::path::{Path, PathBuf};
use std::time::Duration;

use danmaku::ChatCollector;
use douyu::ResolvedStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::recorder::ffmpeg::FfmpegRecorder;

/// Output paths and duration of one segment. Both paths must carry the
/// `.part` suffix.
#[derive(Debug, Clone)]
pub struct SegmentSpec {
    pub flv_part: PathBuf,
    pub xml_part: PathBuf,
    pub duration: Duration,
}

/// Final path for an in-progress artifact.
///
/// The `.part` suffix is a precondition, not a convention: anything else is
/// a programmer error and is rejected before any filesystem change.
pub fn finalize_target(part_path: &Path) -> crate::Result<PathBuf> {
    if part_path.extension().and_then(|e| e.to_str()) != Some("part") {
        return Err(Error::validation(format!(
            "expected a .part file, got: {}",
            part_path.display()
        )));
    }
    Ok(part_path.with_extension(""))
}

/// Record one segment. Returns the recorder's exit code; the caller treats
/// nonzero as "segment failed, retry after backoff".
pub async fn run_segment(
    recorder: &FfmpegRecorder,
    collector: &ChatCollector,
    room_id: &str,
    stream: &ResolvedStream,
    spec: &SegmentSpec,
    cancel: &CancellationToken,
) -> crate::Result<i32> {
    if spec.duration.is_zero() {
        return Ok(0);
    }

    // Reject bad suffixes before creating anything.
    let flv_final = finalize_target(&spec.flv_part)?;
    let xml_final = finalize_target(&spec.xml_part)?;

    for part in [&spec.flv_part, &spec.xml_part] {
        if let Some(parent) = part.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let chat_task = async {
        tokio::select! {
            result = collector.collect(room_id, &spec.xml_part, spec.duration) => result,
            _ = cancel.cancelled() => Ok(0),
        }
    };

    let (recorded, collected) = tokio::join!(
        recorder.record(
            &stream.url,
            &stream.headers,
            &spec.flv_part,
            spec.duration,
            cancel
        ),
        chat_task,
    );

    let exit_code = match recorded {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "recorder failed to run");
            -1
        }
    };

    match collected {
        Ok(count) => debug!(room_id, count, "chat collection finished"),
        Err(e) => warn!(room_id, error = %e, "chat collection failed"),
    }

    for (part, target) in [(&spec.flv_part, &flv_final), (&spec.xml_part, &xml_final)] {
        if tokio::fs::try_exists(part).await.unwrap_or(false) {
            tokio::fs::rename(part, target).await?;
            info!(file = %target.display(), "segment artifact finalized");
        }
    }

    Ok(exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use danmaku::CollectorConfig;
    use tempfile::TempDir;

    #[test]
    fn finalize_target_strips_part_suffix() {
        let target = finalize_target(Path::new("/x/a录播2026-01-01T00_00_00.flv.part")).unwrap();
        assert_eq!(target, Path::new("/x/a录播2026-01-01T00_00_00.flv"));

        let target = finalize_target(Path::new("b.xml.part")).unwrap();
        assert_eq!(target, Path::new("b.xml"));
    }

    #[test]
    fn finalize_target_rejects_other_suffixes() {
        assert!(finalize_target(Path::new("a.flv")).is_err());
        assert!(finalize_target(Path::new("a.part.flv")).is_err());
        assert!(finalize_target(Path::new("a")).is_err());
    }

    #[tokio::test]
    async fn zero_duration_segment_creates_no_part_files() {
        let temp = TempDir::new().unwrap();
        let spec = SegmentSpec {
            flv_part: temp.path().join("a.flv.part"),
            xml_part: temp.path().join("a.xml.part"),
            duration: Duration::ZERO,
        };

        let recorder = FfmpegRecorder::new("/definitely/not/ffmpeg");
        let collector = ChatCollector::new(CollectorConfig::default());
        let stream = ResolvedStream {
            url: "http://example/stream".to_string(),
            headers: vec![],
        };

        let code = run_segment(
            &recorder,
            &collector,
            "1",
            &stream,
            &spec,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert!(!spec.flv_part.exists());
        assert!(!spec.xml_part.exists());
        assert!(!temp.path().join("a.flv").exists());
    }

    #[tokio::test]
    async fn existing_artifacts_are_finalized_even_when_both_tasks_fail() {
        let temp = TempDir::new().unwrap();
        let spec = SegmentSpec {
            flv_part: temp.path().join("a.flv.part"),
            xml_part: temp.path().join("a.xml.part"),
            duration: Duration::from_secs(1),
        };

        // Artifacts left behind by the (failing) tasks.
        tokio::fs::write(&spec.flv_part, b"flv data").await.unwrap();
        tokio::fs::write(&spec.xml_part, b"<i>\n").await.unwrap();

        // Recorder binary missing, chat endpoint unreachable.
        let recorder = FfmpegRecorder::new("/definitely/not/ffmpeg");
        let collector = ChatCollector::new(CollectorConfig {
            ws_url: "ws://127.0.0.1:1/".to_string(),
            ..CollectorConfig::default()
        });
        let stream = ResolvedStream {
            url: "http://example/stream".to_string(),
            headers: vec![],
        };

        let code = run_segment(
            &recorder,
            &collector,
            "1",
            &stream,
            &spec,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_ne!(code, 0);
        assert!(!spec.flv_part.exists());
        assert!(!spec.xml_part.exists());
        assert!(temp.path().join("a.flv").exists());
        assert!(temp.path().join("a.xml").exists());
    }

    #[tokio::test]
    async fn bad_part_suffix_fails_before_touching_disk() {
        let temp = TempDir::new().unwrap();
        let spec = SegmentSpec {
            flv_part: temp.path().join("a.flv"),
            xml_part: temp.path().join("a.xml.part"),
            duration: Duration::from_secs(1),
        };

        let recorder = FfmpegRecorder::new("/definitely/not/ffmpeg");
        let collector = ChatCollector::new(CollectorConfig::default());
        let stream = ResolvedStream {
            url: "http://example/stream".to_string(),
            headers: vec![],
        };

        let result = run_segment(
            &recorder,
            &collector,
            "1",
            &stream,
            &spec,
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(!spec.xml_part.exists());
    }
}
