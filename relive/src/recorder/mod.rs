pub mod ffmpeg;
pub mod pipeline;
pub mod service;

pub use ffmpeg::FfmpegRecorder;
pub use pipeline::{SegmentSpec, finalize_target, run_segment};
