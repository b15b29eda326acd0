pub mod backend;
pub mod biliup;
pub mod feed;
pub mod grouping;
pub mod orchestrator;

pub use backend::{AppendOutcome, BvidSource, CreateRequest, Submission, UploadBackend};
pub use orchestrator::{UploadOrchestrator, UploadRunConfig, sweep_deletable_artifacts};
