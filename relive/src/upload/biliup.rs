//! Uploader CLI backend.
//!
//! Drives the external uploader binary (verbs `renew`, `upload`, `append`)
//! and classifies its output: success phrases, the `BV…` identifier when
//! printed synchronously, and the destination's rate-limit code.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::UploadSettings;
use crate::error::Error;
use crate::upload::backend::{
    AppendOutcome, BvidSource, CreateRequest, Submission, UploadBackend,
};
use crate::upload::feed::FeedClient;

/// Destination error code for "submissions too frequent".
pub const RATE_LIMIT_CODE: &str = "21540";

static BVID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"BV[0-9A-Za-z]{10}").unwrap());

/// Phrases any of which mark a successful CLI run (alongside exit code 0).
const SUCCESS_PHRASES: &[&str] = &["投稿成功", "APP接口投稿成功", "稿件修改成功"];

pub struct BiliupCli {
    binary: String,
    cookies_path: PathBuf,
    submit: String,
    line: Option<String>,
    feed: FeedClient,
}

impl BiliupCli {
    pub fn new(settings: &UploadSettings) -> crate::Result<Self> {
        Ok(Self {
            binary: settings.binary_path.clone(),
            cookies_path: settings.cookies_path.clone(),
            submit: settings.submit.clone(),
            line: (!settings.line.is_empty()).then(|| settings.line.clone()),
            feed: FeedClient::new(&settings.cookies_path)?,
        })
    }

    /// Run the CLI and capture interleaved stdout+stderr as one log text.
    async fn run(&self, args: &[String]) -> crate::Result<(bool, String)> {
        debug!(binary = %self.binary, ?args, "running uploader CLI");

        let output = Command::new(&self.binary)
            .args(args)
            .env("LC_ALL", "C")
            .output()
            .await
            .map_err(|e| Error::upload(format!("failed to run {}: {e}", self.binary)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok((output.status.success(), text))
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "-u".to_string(),
            self.cookies_path.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl UploadBackend for BiliupCli {
    async fn check_login(&self) -> crate::Result<bool> {
        let mut args = self.base_args();
        args.push("renew".to_string());

        let (ok, output) = self.run(&args).await?;
        if !ok {
            warn!(output = %snippet(&output), "login check failed");
        }
        Ok(ok)
    }

    async fn create_submission(&self, request: &CreateRequest<'_>) -> crate::Result<BvidSource> {
        let meta = request.meta;
        let mut args = self.base_args();
        args.push("upload".to_string());
        args.push(request.file.to_string_lossy().into_owned());
        args.extend([
            "--submit".to_string(),
            self.submit.clone(),
            "--tid".to_string(),
            meta.tid.to_string(),
            "--title".to_string(),
            request.title.to_string(),
            "--desc".to_string(),
            meta.desc.clone(),
            "--tag".to_string(),
            meta.tag.clone(),
            "--copyright".to_string(),
            "2".to_string(),
        ]);
        if !meta.source.is_empty() {
            args.extend(["--source".to_string(), meta.source.clone()]);
        }
        if !meta.cover.is_empty() {
            args.extend(["--cover".to_string(), meta.cover.clone()]);
        }
        if !meta.dynamic.is_empty() {
            args.extend(["--dynamic".to_string(), meta.dynamic.clone()]);
        }
        if let Some(line) = &self.line {
            args.extend(["--line".to_string(), line.clone()]);
        }

        let (ok, output) = self.run(&args).await?;
        if !(ok && output_indicates_success(&output)) {
            return Err(Error::upload(format!(
                "create submission failed for {}: {}",
                request.file.display(),
                snippet(&output)
            )));
        }

        match extract_bvid(&output) {
            Some(bvid) => {
                info!(bvid = %bvid, "create returned identifier synchronously");
                Ok(BvidSource::Synchronous(bvid))
            }
            None => Ok(BvidSource::Asynchronous),
        }
    }

    async fn append_part(&self, file: &Path, bvid: &str) -> crate::Result<AppendOutcome> {
        let mut args = self.base_args();
        args.push("append".to_string());
        args.extend(["--vid".to_string(), bvid.to_string()]);
        if let Some(line) = &self.line {
            args.extend(["--line".to_string(), line.clone()]);
        }
        args.push(file.to_string_lossy().into_owned());

        let (ok, output) = self.run(&args).await?;

        if output_indicates_rate_limit(&output) {
            return Ok(AppendOutcome::RateLimited);
        }
        if ok && output_indicates_success(&output) {
            return Ok(AppendOutcome::Success);
        }

        Err(Error::upload(format!(
            "append failed for {}: {}",
            file.display(),
            snippet(&output)
        )))
    }

    async fn list_submissions(&self, statuses: &[&str]) -> crate::Result<Vec<Submission>> {
        self.feed.list_submissions(statuses).await
    }
}

/// Exit code 0 alone is not enough; the CLI reports some failures with a
/// zero exit. Look for a success phrase or a zero app-level code in a
/// JSON-ish log line.
pub fn output_indicates_success(output: &str) -> bool {
    if SUCCESS_PHRASES.iter().any(|phrase| output.contains(phrase)) {
        return true;
    }
    output.contains("\"code\": 0") || output.contains("\"code\":0") || output.contains("code: 0")
}

/// First destination identifier in the output, if any.
pub fn extract_bvid(output: &str) -> Option<String> {
    BVID_REGEX.find(output).map(|m| m.as_str().to_string())
}

pub fn output_indicates_rate_limit(output: &str) -> bool {
    output.contains(RATE_LIMIT_CODE)
}

fn snippet(output: &str) -> String {
    let trimmed = output.trim();
    let mut tail: Vec<&str> = trimmed.lines().rev().take(3).collect();
    tail.reverse();
    tail.join(" | ")
}
