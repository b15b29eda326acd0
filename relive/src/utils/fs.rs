//! Filesystem helpers tolerant of concurrent writers.

use std::path::{Path, PathBuf};

use tracing::debug;

/// List regular files in `dir` with the given extension (no dot).
///
/// Files disappearing mid-scan are treated as already handled; the upload
/// staging directory is shared with the deleter.
pub async fn files_with_extension(dir: &Path, extension: &str) -> crate::Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        match entry.file_type().await {
            Ok(ft) if ft.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => debug!(path = %path.display(), error = %e, "entry vanished mid-scan"),
        }
    }

    files.sort();
    Ok(files)
}

/// File size in bytes, or None when it no longer exists.
pub async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}
