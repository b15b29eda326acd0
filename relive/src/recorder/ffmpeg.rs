//! External stream recorder.
//!
//! Drives ffmpeg to stream-copy the resolved URL into an FLV file for a
//! bounded duration. The wall-clock wait is `max(10, duration + 30)`
//! seconds; on overrun the child is asked to stop gracefully (a `q` on
//! stdin) and killed if it lingers.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::Error;

/// Exit code reported when the wall-clock budget ran out.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FfmpegRecorder {
    binary: String,
}

impl FfmpegRecorder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Record `url` into `output` for `duration`, returning the child's
    /// exit code (or [`TIMEOUT_EXIT_CODE`] when the budget ran out).
    ///
    /// Cancellation triggers the same graceful-stop-then-kill escalation as
    /// a timeout, then reports the child's actual exit code.
    pub async fn record(
        &self,
        url: &str,
        headers: &[(String, String)],
        output: &Path,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> crate::Result<i32> {
        let seconds = duration.as_secs();
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
        ];

        if !headers.is_empty() {
            let header_arg: String = headers
                .iter()
                .map(|(name, value)| format!("{name}: {value}\r\n"))
                .collect();
            args.push("-headers".into());
            args.push(header_arg);
        }

        args.extend([
            "-i".into(),
            url.to_string(),
            "-c".into(),
            "copy".into(),
            "-t".into(),
            seconds.to_string(),
            "-f".into(),
            "flv".into(),
            output.to_string_lossy().into_owned(),
        ]);

        debug!(output = %output.display(), seconds, "starting recorder");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Recording(format!("failed to spawn {}: {e}", self.binary)))?;

        // Drain stderr so the child never blocks on a full pipe.
        if let Some(stderr) = child.stderr.take() {
            let output_name = output.display().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "relive::recorder", output = %output_name, "{line}");
                }
            });
        }

        let budget = Duration::from_secs(seconds.saturating_add(30).max(10));

        tokio::select! {
            waited = tokio::time::timeout(budget, child.wait()) => match waited {
                Ok(Ok(status)) => Ok(status.code().unwrap_or(-1)),
                Ok(Err(e)) => Err(Error::Recording(format!("failed to wait for recorder: {e}"))),
                Err(_) => {
                    warn!(output = %output.display(), "recorder exceeded its time budget");
                    stop_child(&mut child).await;
                    Ok(TIMEOUT_EXIT_CODE)
                }
            },
            _ = cancel.cancelled() => {
                debug!(output = %output.display(), "recorder stop requested");
                let code = stop_child(&mut child).await;
                Ok(code.unwrap_or(-1))
            }
        }
    }
}

/// Graceful-stop-then-kill escalation; returns the exit code if one was
/// observed.
async fn stop_child(child: &mut Child) -> Option<i32> {
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(b"q").await;
        let _ = stdin.flush().await;
        let _ = stdin.shutdown().await;
    }

    match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        Ok(Err(e)) => {
            error!(error = %e, "failed to wait for stopping recorder");
            None
        }
        Err(_) => {
            warn!("recorder ignored graceful stop, killing");
            let _ = child.kill().await;
            child.wait().await.ok().and_then(|s| s.code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Uses /bin/sh as a stand-in child process; the recorder contract only
    // cares about spawn/wait/exit-code plumbing.

    #[tokio::test]
    async fn missing_binary_is_a_recording_error() {
        let recorder = FfmpegRecorder::new("/definitely/not/ffmpeg");
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("x.flv.part");
        let token = CancellationToken::new();

        let result = recorder
            .record("http://example/stream", &[], &out, Duration::from_secs(1), &token)
            .await;
        assert!(matches!(result, Err(Error::Recording(_))));
    }
}
