//! Burn-in encoding and passthrough staging.
//!
//! Burn-in renders the `.ass` subtitles into the video with a hardware
//! encoder (QSV first, one platform-appropriate alternate on hwaccel
//! failure, never a CPU fallback), audio stream-copied, writing to a
//! temporary `.mp4` next to the source before moving it into the upload
//! staging directory.

use std::path::Path;

use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::ProcessingSettings;
use crate::processing::part_sibling;
use crate::utils::fs::files_with_extension;

/// Burn subtitles into every eligible `X.flv` + `X.ass` pair.
pub async fn burn_in_videos(
    settings: &ProcessingSettings,
    dir: &Path,
    upload_dir: &Path,
    delete_sources: bool,
) {
    let subtitles = match files_with_extension(dir, "ass").await {
        Ok(files) => files,
        Err(e) => {
            error!(error = %e, "cannot scan for subtitles");
            return;
        }
    };

    let mut encoded = 0u32;
    let mut skipped = 0u32;
    let mut failed = 0u32;

    for ass in subtitles {
        let flv = ass.with_extension("flv");
        let temp_mp4 = ass.with_extension("mp4");
        let Some(file_name) = temp_mp4.file_name() else {
            continue;
        };
        let upload_mp4 = upload_dir.join(file_name);

        if !tokio::fs::try_exists(&flv).await.unwrap_or(false) {
            warn!(file = %ass.display(), "no paired recording, burn-in skipped");
            skipped += 1;
            continue;
        }

        // Idempotent re-run: the target already made it to staging.
        if tokio::fs::try_exists(&upload_mp4).await.unwrap_or(false) {
            info!(file = %upload_mp4.display(), "target already staged, dropping sources");
            remove_quietly(&ass).await;
            remove_quietly(&flv).await;
            skipped += 1;
            continue;
        }

        // A leftover temp file from an interrupted encode is stale.
        if tokio::fs::try_exists(&temp_mp4).await.unwrap_or(false) {
            warn!(file = %temp_mp4.display(), "removing stale temporary output");
            if let Err(e) = tokio::fs::remove_file(&temp_mp4).await {
                error!(file = %temp_mp4.display(), error = %e, "cannot remove stale output");
                failed += 1;
                continue;
            }
        }

        info!(video = %flv.display(), subtitles = %ass.display(), "burning in chat overlay");

        match encode_one(settings, &flv, &ass, &temp_mp4).await {
            EncodeOutcome::Success => {}
            EncodeOutcome::MissingSubtitlesFilter => {
                error!(
                    "ffmpeg lacks the subtitles filter (libass); install an ffmpeg build with \
                     libass enabled or point processing.ffmpeg_path at one"
                );
                remove_quietly(&temp_mp4).await;
                failed += 1;
                continue;
            }
            EncodeOutcome::Failed => {
                remove_quietly(&temp_mp4).await;
                failed += 1;
                continue;
            }
        }

        if let Err(e) = tokio::fs::rename(&temp_mp4, &upload_mp4).await {
            error!(
                from = %temp_mp4.display(),
                to = %upload_mp4.display(),
                error = %e,
                "failed to stage encoded video"
            );
            remove_quietly(&temp_mp4).await;
            failed += 1;
            continue;
        }

        info!(file = %upload_mp4.display(), "encoded video staged for upload");
        encoded += 1;

        if delete_sources {
            remove_quietly(&flv).await;
            remove_quietly(&ass).await;
        }
    }

    info!(encoded, skipped, failed, "burn-in finished");
}

/// Move finished raw recordings straight to upload staging.
pub async fn passthrough_recordings(dir: &Path, upload_dir: &Path) {
    let recordings = match files_with_extension(dir, "flv").await {
        Ok(files) => files,
        Err(e) => {
            error!(error = %e, "cannot scan for recordings");
            return;
        }
    };

    let mut moved = 0u32;
    let mut skipped = 0u32;

    for flv in recordings {
        if tokio::fs::try_exists(&part_sibling(&flv)).await.unwrap_or(false) {
            skipped += 1;
            continue;
        }

        let Some(file_name) = flv.file_name() else {
            continue;
        };
        let target = upload_dir.join(file_name);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            skipped += 1;
            continue;
        }

        match tokio::fs::rename(&flv, &target).await {
            Ok(()) => {
                info!(file = %target.display(), "recording staged for upload");
                moved += 1;
            }
            Err(e) => {
                error!(from = %flv.display(), to = %target.display(), error = %e, "staging move failed");
            }
        }
    }

    info!(moved, skipped, "passthrough staging finished");
}

enum EncodeOutcome {
    Success,
    MissingSubtitlesFilter,
    Failed,
}

async fn encode_one(
    settings: &ProcessingSettings,
    flv: &Path,
    ass: &Path,
    temp_mp4: &Path,
) -> EncodeOutcome {
    let qsv = qsv_args(settings, flv, ass, temp_mp4);
    let stderr = match run_encoder(&settings.ffmpeg_path, &qsv).await {
        Ok(()) => return EncodeOutcome::Success,
        Err(stderr) => stderr,
    };

    if is_missing_subtitles_filter(&stderr) {
        return EncodeOutcome::MissingSubtitlesFilter;
    }

    if !is_hwaccel_failure(&stderr) {
        error!(file = %flv.display(), stderr = %last_lines(&stderr), "encode failed");
        return EncodeOutcome::Failed;
    }

    // The hwaccel device could not be created. Try one alternate hardware
    // encoder for this platform; CPU encoding is not a fallback.
    let Some((name, args)) = alternate_hw_args(settings, flv, ass, temp_mp4) else {
        error!("QSV unavailable and no alternate hardware encoder exists on this platform");
        return EncodeOutcome::Failed;
    };

    warn!(encoder = name, "QSV unavailable, trying alternate hardware encoder");
    remove_quietly(temp_mp4).await;

    match run_encoder(&settings.ffmpeg_path, &args).await {
        Ok(()) => EncodeOutcome::Success,
        Err(stderr) => {
            if is_missing_subtitles_filter(&stderr) {
                return EncodeOutcome::MissingSubtitlesFilter;
            }
            error!(encoder = name, stderr = %last_lines(&stderr), "alternate encoder failed");
            EncodeOutcome::Failed
        }
    }
}

/// Run ffmpeg to completion; Err carries stderr for failure classification.
async fn run_encoder(ffmpeg: &str, args: &[String]) -> Result<(), String> {
    let output = Command::new(ffmpeg)
        .args(args)
        .env("LC_ALL", "C")
        .output()
        .await
        .map_err(|e| format!("failed to run {ffmpeg}: {e}"))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).into_owned())
    }
}

fn qsv_args(settings: &ProcessingSettings, flv: &Path, ass: &Path, out: &Path) -> Vec<String> {
    let device = if settings.qsv_device.is_empty() {
        "qsv=hw".to_string()
    } else {
        format!("qsv=hw:{}", settings.qsv_device)
    };

    let filter = format!(
        "{},hwupload=extra_hw_frames=64",
        subtitles_filter(ass, &settings.fonts_dir)
    );

    vec![
        "-v".into(),
        "verbose".into(),
        "-init_hw_device".into(),
        device,
        "-hwaccel".into(),
        "qsv".into(),
        "-hwaccel_output_format".into(),
        "qsv".into(),
        "-i".into(),
        flv.to_string_lossy().into_owned(),
        "-vf".into(),
        filter,
        "-c:v".into(),
        "h264_qsv".into(),
        "-preset".into(),
        "veryfast".into(),
        "-global_quality".into(),
        "32".into(),
        "-c:a".into(),
        "copy".into(),
        "-y".into(),
        out.to_string_lossy().into_owned(),
    ]
}

/// One alternate hardware encoder per platform. macOS gets VideoToolbox;
/// other platforms have no sanctioned alternate.
fn alternate_hw_args(
    settings: &ProcessingSettings,
    flv: &Path,
    ass: &Path,
    out: &Path,
) -> Option<(&'static str, Vec<String>)> {
    if !cfg!(target_os = "macos") {
        return None;
    }

    let args = vec![
        "-v".into(),
        "verbose".into(),
        "-i".into(),
        flv.to_string_lossy().into_owned(),
        "-vf".into(),
        subtitles_filter(ass, &settings.fonts_dir),
        "-c:v".into(),
        "h264_videotoolbox".into(),
        "-b:v".into(),
        "6M".into(),
        "-maxrate".into(),
        "8M".into(),
        "-bufsize".into(),
        "12M".into(),
        "-c:a".into(),
        "copy".into(),
        "-y".into(),
        out.to_string_lossy().into_owned(),
    ];
    Some(("videotoolbox", args))
}

fn subtitles_filter(ass: &Path, fonts_dir: &str) -> String {
    let filename = escape_filter_path(&ass.to_string_lossy());
    if fonts_dir.is_empty() {
        format!("subtitles=filename='{filename}'")
    } else {
        format!(
            "subtitles=filename='{filename}':fontsdir='{}'",
            escape_filter_path(fonts_dir)
        )
    }
}

/// FFmpeg filter option escaping: backslash and colon are special, and we
/// wrap values in single quotes.
pub fn escape_filter_path(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

fn is_hwaccel_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("device creation failed")
        || lower.contains("init_hw_device")
        || lower.contains("qsv=hw")
}

fn is_missing_subtitles_filter(stderr: &str) -> bool {
    stderr.contains("No such filter") && (stderr.contains("subtitles") || stderr.contains("ass"))
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(file = %path.display(), error = %e, "cleanup failed"),
    }
}

fn last_lines(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().rev().take(5).collect();
    lines.into_iter().rev().collect::<Vec<_>>().join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn escape_filter_path_escapes_specials() {
        let escaped = escape_filter_path("C:\\a\\b:c'd");
        assert!(escaped.contains("\\\\"));
        assert!(escaped.contains("\\:"));
        assert!(escaped.contains("\\'"));
    }

    #[test]
    fn subtitles_filter_includes_fonts_dir_when_set() {
        let with = subtitles_filter(Path::new("a.ass"), "/fonts");
        assert!(with.contains("fontsdir='/fonts'"));

        let without = subtitles_filter(Path::new("a.ass"), "");
        assert!(!without.contains("fontsdir"));
    }

    #[test]
    fn hwaccel_failure_detection() {
        assert!(is_hwaccel_failure("Device creation failed: -17"));
        assert!(is_hwaccel_failure("Failed to set value 'qsv=hw' for option 'init_hw_device'"));
        assert!(!is_hwaccel_failure("Invalid data found when processing input"));
    }

    #[test]
    fn missing_subtitles_filter_detection() {
        assert!(is_missing_subtitles_filter("No such filter: 'subtitles'"));
        assert!(!is_missing_subtitles_filter("No such filter: 'scale_qsv'"));
        assert!(!is_missing_subtitles_filter("subtitles stream not found"));
    }

    #[test]
    fn qsv_args_shape() {
        let settings = ProcessingSettings::default();
        let args = qsv_args(
            &settings,
            Path::new("a.flv"),
            Path::new("a.ass"),
            Path::new("a.mp4"),
        );

        assert!(args.contains(&"h264_qsv".to_string()));
        assert!(args.contains(&"qsv=hw".to_string()));
        assert!(args.iter().any(|a| a.contains("hwupload=extra_hw_frames=64")));
        // Audio is stream-copied, never re-encoded.
        let ca = args.iter().position(|a| a == "-c:a").unwrap();
        assert_eq!(args[ca + 1], "copy");
    }

    #[tokio::test]
    async fn passthrough_skips_inflight_and_existing_targets() {
        let temp = TempDir::new().unwrap();
        let processing = temp.path().join("processing");
        let upload = temp.path().join("upload");
        tokio::fs::create_dir_all(&processing).await.unwrap();
        tokio::fs::create_dir_all(&upload).await.unwrap();

        tokio::fs::write(processing.join("done.flv"), b"x").await.unwrap();
        tokio::fs::write(processing.join("live.flv"), b"x").await.unwrap();
        tokio::fs::write(processing.join("live.flv.part"), b"x").await.unwrap();
        tokio::fs::write(processing.join("dup.flv"), b"x").await.unwrap();
        tokio::fs::write(upload.join("dup.flv"), b"old").await.unwrap();

        passthrough_recordings(&processing, &upload).await;

        assert!(upload.join("done.flv").exists());
        assert!(!processing.join("done.flv").exists());
        // Still being written: untouched.
        assert!(processing.join("live.flv").exists());
        // Already staged: source left in place, target not clobbered.
        assert!(processing.join("dup.flv").exists());
        assert_eq!(tokio::fs::read(upload.join("dup.flv")).await.unwrap(), b"old");
    }
}
