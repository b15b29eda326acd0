//! Per-streamer recording loop.
//!
//! Strictly sequential per streamer: a new segment starts only after the
//! previous resolve → record → finalize cycle completes. Streamers are
//! fully independent of each other.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use danmaku::{ChatCollector, CollectorConfig};
use douyu::StreamResolver;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::StreamerSettings;
use crate::recorder::ffmpeg::FfmpegRecorder;
use crate::recorder::pipeline::{SegmentSpec, run_segment};
use crate::time::local_now;
use crate::utils::filename::segment_basename;

/// Everything one recording loop needs; shared read-only across streamers.
pub struct RecordingContext {
    pub resolver: Arc<StreamResolver>,
    pub recorder: FfmpegRecorder,
    pub collector_config: CollectorConfig,
    pub processing_folder: PathBuf,
    pub segment_duration: Duration,
    pub retry_delay: Duration,
}

/// Record segments while the cached live state says the streamer is on air.
///
/// `live_rx` is fed by the streamer's status monitor; this loop never polls
/// the platform itself.
pub async fn record_streamer(
    ctx: Arc<RecordingContext>,
    streamer: StreamerSettings,
    mut live_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    info!(streamer = %streamer.name, room_id = %streamer.room_id, "recording loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if !*live_rx.borrow() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = live_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }

        let stream = match ctx.resolver.resolve(&streamer.room_id).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    streamer = %streamer.name,
                    error = %e,
                    "stream resolution failed, retrying after delay"
                );
                if !sleep_cancellable(ctx.retry_delay, &cancel).await {
                    break;
                }
                continue;
            }
        };

        let base = segment_basename(&streamer.name, local_now());
        let spec = SegmentSpec {
            flv_part: ctx.processing_folder.join(format!("{base}.flv.part")),
            xml_part: ctx.processing_folder.join(format!("{base}.xml.part")),
            duration: ctx.segment_duration,
        };

        info!(streamer = %streamer.name, segment = %base, "recording segment");
        let collector = ChatCollector::new(ctx.collector_config.clone());

        match run_segment(
            &ctx.recorder,
            &collector,
            &streamer.room_id,
            &stream,
            &spec,
            &cancel,
        )
        .await
        {
            Ok(0) => {}
            Ok(code) => {
                warn!(
                    streamer = %streamer.name,
                    segment = %base,
                    code,
                    "segment ended with nonzero exit code, retrying after delay"
                );
                if !sleep_cancellable(ctx.retry_delay, &cancel).await {
                    break;
                }
            }
            Err(e) => {
                error!(streamer = %streamer.name, segment = %base, error = %e, "segment failed");
                if !sleep_cancellable(ctx.retry_delay, &cancel).await {
                    break;
                }
            }
        }
    }

    info!(streamer = %streamer.name, "recording loop stopped");
}

/// Sleep unless cancelled; false means the loop should exit.
async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}
