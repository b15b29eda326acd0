//! Destination backend abstraction.

use std::path::Path;

use async_trait::async_trait;

use crate::config::UploadMeta;

/// How the identifier of a just-created submission is obtained.
///
/// Some backends print it synchronously in the create output; others only
/// expose it later through the submissions listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BvidSource {
    Synchronous(String),
    Asynchronous,
}

/// Result of an append attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Success,
    /// The destination rejected the part for being submitted too
    /// frequently; retry after a cooldown.
    RateLimited,
}

/// One entry of the destination's "my submissions" listing.
#[derive(Debug, Clone)]
pub struct Submission {
    pub title: String,
    pub bvid: String,
}

pub struct CreateRequest<'a> {
    pub file: &'a Path,
    pub title: &'a str,
    pub meta: &'a UploadMeta,
}

#[async_trait]
pub trait UploadBackend: Send + Sync {
    /// Verify the stored credentials still work.
    async fn check_login(&self) -> crate::Result<bool>;

    /// Create a new submission from a single file.
    async fn create_submission(&self, request: &CreateRequest<'_>) -> crate::Result<BvidSource>;

    /// Append one file as a further part of an existing submission.
    async fn append_part(&self, file: &Path, bvid: &str) -> crate::Result<AppendOutcome>;

    /// List own submissions in the given status set.
    async fn list_submissions(&self, statuses: &[&str]) -> crate::Result<Vec<Submission>>;
}
