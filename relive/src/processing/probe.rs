//! Video dimension probe via ffprobe.

use std::path::Path;

use serde::Deserialize;
use tokio::process::Command;

use crate::error::Error;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

/// Width and height of the first video stream.
pub async fn video_dimensions(ffprobe: &str, file: &Path) -> crate::Result<(u32, u32)> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "json",
        ])
        .arg(file)
        .env("LC_ALL", "C")
        .output()
        .await
        .map_err(|e| Error::Processing(format!("failed to run {ffprobe}: {e}")))?;

    if !output.status.success() {
        return Err(Error::Processing(format!(
            "{ffprobe} failed for {}: {}",
            file.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| Error::Processing(format!("malformed ffprobe output: {e}")))?;

    parsed
        .streams
        .first()
        .and_then(|s| Some((s.width?, s.height?)))
        .ok_or_else(|| {
            Error::Processing(format!(
                "ffprobe reported no video dimensions for {}",
                file.display()
            ))
        })
}
