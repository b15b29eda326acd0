mod errors;
mod session_repository;
mod uploaded_video_repository;

pub use errors::{RepositoryError, RepositoryResult};
pub use session_repository::{OfflineOutcome, SessionRepository, SqliteSessionRepository};
pub use uploaded_video_repository::{SqliteUploadedVideoRepository, UploadedVideoRepository};
