//! Post-processing of finished segments.
//!
//! Ordered, idempotent steps over the processing directory: delete
//! undersized recordings, convert chat transcripts to ASS subtitles, burn
//! them into the video (or move raw files through in passthrough mode) and
//! stage the results for upload. Every step tolerates re-runs and files
//! vanishing under it.

pub mod convert;
pub mod encode;
pub mod probe;

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::config::Settings;
use crate::utils::fs::{file_size, files_with_extension};

pub struct ProcessingStage {
    processing: crate::config::ProcessingSettings,
    processing_folder: PathBuf,
    upload_folder: PathBuf,
    delete_uploaded_files: bool,
}

impl ProcessingStage {
    pub fn new(settings: &Settings) -> Self {
        Self {
            processing: settings.processing.clone(),
            processing_folder: settings.paths.processing_folder.clone(),
            upload_folder: settings.paths.upload_folder.clone(),
            delete_uploaded_files: settings.deletion.delete_uploaded_files,
        }
    }

    /// Run all steps. Individual file failures are logged and skipped; the
    /// stage itself only fails on setup problems worth aborting the tick.
    pub async fn run(&self) {
        if let Err(e) = cleanup_small_files(&self.processing_folder, self.processing.min_file_size_mb).await
        {
            error!(error = %e, "segment cleanup failed");
        }

        if self.processing.skip_video_encoding {
            info!("video encoding disabled, staging raw recordings");
            encode::passthrough_recordings(&self.processing_folder, &self.upload_folder).await;
            return;
        }

        convert::convert_transcripts(
            &self.processing,
            &self.processing_folder,
            self.delete_uploaded_files,
        )
        .await;

        encode::burn_in_videos(
            &self.processing,
            &self.processing_folder,
            &self.upload_folder,
            self.delete_uploaded_files,
        )
        .await;
    }
}

/// Delete finished recordings smaller than the configured minimum, along
/// with their chat sidecars. Files still being written (a `.part` sibling
/// exists) are left alone; a file exactly at the minimum is retained.
pub async fn cleanup_small_files(dir: &Path, min_file_size_mb: u64) -> crate::Result<u32> {
    let min_bytes = min_file_size_mb * 1024 * 1024;
    let mut deleted = 0u32;

    for flv in files_with_extension(dir, "flv").await? {
        if tokio::fs::try_exists(&part_sibling(&flv)).await.unwrap_or(false) {
            continue;
        }

        let Some(size) = file_size(&flv).await else {
            continue;
        };
        if size >= min_bytes {
            continue;
        }

        info!(
            file = %flv.display(),
            size_mb = format_args!("{:.2}", size as f64 / (1024.0 * 1024.0)),
            "deleting undersized recording"
        );

        if let Err(e) = tokio::fs::remove_file(&flv).await {
            error!(file = %flv.display(), error = %e, "failed to delete undersized recording");
            continue;
        }
        deleted += 1;

        let xml = flv.with_extension("xml");
        match tokio::fs::remove_file(&xml).await {
            Ok(()) => info!(file = %xml.display(), "deleted paired transcript"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(file = %xml.display(), "no paired transcript for undersized recording");
            }
            Err(e) => error!(file = %xml.display(), error = %e, "failed to delete transcript"),
        }
    }

    Ok(deleted)
}

/// `X.flv` → `X.flv.part`.
pub(crate) fn part_sibling(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".part");
    PathBuf::from(os)
}
