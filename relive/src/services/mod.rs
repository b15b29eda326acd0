//! Service wiring and scheduled jobs.
//!
//! Owns the scheduler and connects the per-streamer live-state monitors,
//! recording loops, the periodic pipeline tick, and the sweepers.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Settings, StreamerSettings, UploadBackendKind};
use crate::database::repositories::{
    OfflineOutcome, SessionRepository, SqliteSessionRepository, SqliteUploadedVideoRepository,
    UploadedVideoRepository,
};
use crate::error::Error;
use crate::monitor::{LiveStateMonitor, RoomStatusProbe};
use crate::processing::ProcessingStage;
use crate::recorder::FfmpegRecorder;
use crate::recorder::service::{RecordingContext, record_streamer};
use crate::scheduler::Scheduler;
use crate::time::local_now;
use crate::upload::biliup::BiliupCli;
use crate::upload::{UploadBackend, UploadOrchestrator, UploadRunConfig, sweep_deletable_artifacts};

/// Stale-session horizon: open sessions older than this get capped.
const STALE_SESSION_HORIZON_HOURS: i64 = 24;

/// Cap applied to a stale session: start time plus this many hours.
const STALE_SESSION_CAP_HOURS: i64 = 12;

/// Sweep period for stale sessions.
const STALE_SWEEP_PERIOD: Duration = Duration::from_secs(12 * 60 * 60);

/// Delay between a going-offline edge and the post-stream pipeline run.
const POST_STREAM_PIPELINE_DELAY: Duration = Duration::from_secs(3 * 60);

/// Shared, read-only application context.
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub sessions: Arc<dyn SessionRepository>,
    pub videos: Arc<dyn UploadedVideoRepository>,
    /// Cached live state per streamer, fed by each monitor task.
    pub live_flags: Arc<DashMap<String, watch::Receiver<bool>>>,
}

pub struct Services {
    scheduler: Arc<Scheduler>,
}

impl Services {
    pub async fn start(settings: Settings, pool: SqlitePool) -> crate::Result<Self> {
        tokio::fs::create_dir_all(&settings.paths.processing_folder).await?;
        tokio::fs::create_dir_all(&settings.paths.upload_folder).await?;

        let settings = Arc::new(settings);
        let scheduler = Arc::new(Scheduler::new());

        let ctx = Arc::new(AppContext {
            settings: settings.clone(),
            sessions: Arc::new(SqliteSessionRepository::new(pool.clone())),
            videos: Arc::new(SqliteUploadedVideoRepository::new(pool)),
            live_flags: Arc::new(DashMap::new()),
        });

        let resolver = Arc::new(douyu::StreamResolver::new(
            douyu::default_client().map_err(douyu::DouyuError::from)?,
            douyu::ResolverConfig {
                base_url: settings.stream.base_url.clone(),
                did: settings.stream.did.clone(),
                cdn: settings.stream.cdn.clone(),
                rate: settings.stream.rate,
            },
        ));

        let recording_ctx = Arc::new(RecordingContext {
            resolver,
            recorder: FfmpegRecorder::new(settings.processing.ffmpeg_path.clone()),
            collector_config: danmaku::CollectorConfig {
                ws_url: settings.chat.ws_url.clone(),
                heartbeat: Duration::from_secs(settings.chat.heartbeat_seconds),
            },
            processing_folder: settings.paths.processing_folder.clone(),
            segment_duration: Duration::from_secs(settings.recording.segment_minutes * 60),
            retry_delay: Duration::from_secs(settings.recording.retry_delay_seconds),
        });

        for streamer in settings.streamers.clone() {
            let (live_tx, live_rx) = watch::channel(false);
            ctx.live_flags.insert(streamer.name.clone(), live_rx.clone());

            {
                let ctx = ctx.clone();
                let scheduler_handle = scheduler.clone();
                let streamer = streamer.clone();
                scheduler.spawn_job(&format!("live_check_{}", streamer.name), move |token| {
                    monitor_streamer(ctx, scheduler_handle, streamer, live_tx, token)
                });
            }

            if settings.recording.enabled {
                let recording_ctx = recording_ctx.clone();
                scheduler.spawn_job(&format!("record_{}", streamer.name), move |token| {
                    record_streamer(recording_ctx, streamer, live_rx, token)
                });
            }
        }

        {
            let ctx = ctx.clone();
            scheduler.spawn_periodic(
                "pipeline_tick",
                Duration::from_secs(settings.schedule.interval_minutes * 60),
                true,
                move |token| run_pipeline_tick(ctx.clone(), token),
            );
        }

        {
            let sessions = ctx.sessions.clone();
            scheduler.spawn_periodic("stale_sweeper", STALE_SWEEP_PERIOD, false, move |_| {
                sweep_stale_sessions(sessions.clone())
            });
        }

        info!(
            streamers = settings.streamers.len(),
            recording = settings.recording.enabled,
            "services started"
        );

        Ok(Self { scheduler })
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

/// Per-streamer monitor task: initialize the cache, then poll on the
/// configured interval, applying session edits on every edge.
async fn monitor_streamer(
    ctx: Arc<AppContext>,
    scheduler: Arc<Scheduler>,
    streamer: StreamerSettings,
    live_tx: watch::Sender<bool>,
    token: CancellationToken,
) {
    let client = match douyu::default_client() {
        Ok(client) => client,
        Err(e) => {
            error!(streamer = %streamer.name, error = %e, "cannot build status client");
            return;
        }
    };

    let probe = RoomStatusProbe::new(
        client,
        ctx.settings.stream.base_url.clone(),
        streamer.room_id.clone(),
        streamer.name.clone(),
    );
    let mut monitor = LiveStateMonitor::new(streamer.name.clone(), Box::new(probe));

    monitor.initialize().await;
    let _ = live_tx.send(monitor.is_live());

    let interval =
        Duration::from_secs(ctx.settings.schedule.stream_status_check_interval * 60);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some((old, new)) = monitor.detect_change().await else {
            debug!(streamer = %streamer.name, live = monitor.is_live(), "no live state change");
            continue;
        };

        info!(streamer = %streamer.name, old, new, "live state changed");
        let _ = live_tx.send(new);
        apply_edge(&ctx, &streamer.name, new).await;

        if !new && ctx.settings.schedule.process_after_stream_end {
            info!(
                streamer = %streamer.name,
                "stream ended, scheduling pipeline run in 3 minutes"
            );
            let tick_ctx = ctx.clone();
            scheduler.spawn_once_after(
                &format!("post_stream_pipeline_{}", streamer.name),
                POST_STREAM_PIPELINE_DELAY,
                move |token| run_pipeline_tick(tick_ctx, token),
            );
        }
    }
}

/// Apply the session edits for one live-state edge.
async fn apply_edge(ctx: &AppContext, streamer_name: &str, went_live: bool) {
    let now = local_now();

    if went_live {
        let adjusted =
            now - chrono::Duration::minutes(ctx.settings.schedule.stream_start_time_adjustment);
        match ctx.sessions.record_going_live(streamer_name, adjusted).await {
            Ok((session, closed)) => {
                if !closed.is_empty() {
                    warn!(
                        streamer = streamer_name,
                        ?closed,
                        "found sessions still open at a going-live edge, closed them"
                    );
                }
                info!(
                    streamer = streamer_name,
                    session_id = session.id,
                    start = %adjusted,
                    "session opened (start adjusted backward)"
                );
            }
            Err(e) => error!(streamer = streamer_name, error = %e, "failed to open session"),
        }
    } else {
        match ctx.sessions.record_going_offline(streamer_name, now).await {
            Ok(OfflineOutcome::Closed { session_id }) => {
                info!(streamer = streamer_name, session_id, end = %now, "session closed");
            }
            Ok(OfflineOutcome::InsertedEndOnly { session_id }) => {
                warn!(
                    streamer = streamer_name,
                    session_id,
                    "offline edge without an open session, recorded end time only"
                );
            }
            Err(e) => error!(streamer = streamer_name, error = %e, "failed to close session"),
        }
    }
}

/// One pipeline tick: processing, then upload (when enabled), then the
/// delayed-deletion sweep.
pub async fn run_pipeline_tick(ctx: Arc<AppContext>, _token: CancellationToken) {
    let started = std::time::Instant::now();
    info!("pipeline tick started");

    if ctx.settings.schedule.process_after_stream_end {
        let live: Vec<String> = ctx
            .live_flags
            .iter()
            .filter(|entry| *entry.value().borrow())
            .map(|entry| entry.key().clone())
            .collect();
        if !live.is_empty() {
            info!(
                streamers = ?live,
                "streamer live and post-stream-only processing configured, skipping tick"
            );
            return;
        }
    }

    ProcessingStage::new(&ctx.settings).run().await;

    let run_config = UploadRunConfig::from_settings(&ctx.settings);

    if ctx.settings.schedule.scheduled_upload_enabled {
        match build_backend(&ctx.settings) {
            Ok(backend) => {
                let orchestrator = UploadOrchestrator::new(
                    backend,
                    ctx.videos.clone(),
                    ctx.sessions.clone(),
                    run_config.clone(),
                );
                if let Err(e) = orchestrator.run().await {
                    error!(error = %e, "upload run failed");
                }
            }
            Err(e) => error!(error = %e, "cannot build upload backend"),
        }
    } else {
        info!("scheduled upload disabled, skipping identifier backfill and upload");
    }

    if let Err(e) = sweep_deletable_artifacts(ctx.videos.as_ref(), &run_config).await {
        error!(error = %e, "delayed-deletion sweep failed");
    }

    info!(
        elapsed_secs = format_args!("{:.2}", started.elapsed().as_secs_f64()),
        "pipeline tick finished"
    );
}

fn build_backend(settings: &Settings) -> crate::Result<Box<dyn UploadBackend>> {
    match settings.upload.backend {
        UploadBackendKind::Auto | UploadBackendKind::BiliupCli => {
            Ok(Box::new(BiliupCli::new(&settings.upload)?))
        }
        UploadBackendKind::Bilitool => Err(Error::config(
            "the bilitool backend is not built in; use backend = \"biliup_cli\"",
        )),
    }
}

/// Cap open sessions that have been running longer than the stale horizon.
async fn sweep_stale_sessions(sessions: Arc<dyn SessionRepository>) {
    let now = local_now();
    let cutoff = now - chrono::Duration::hours(STALE_SESSION_HORIZON_HOURS);

    let stale = match sessions.open_sessions_started_before(cutoff).await {
        Ok(stale) => stale,
        Err(e) => {
            error!(error = %e, "stale-session scan failed");
            return;
        }
    };

    if stale.is_empty() {
        debug!("no stale open sessions");
        return;
    }

    for session in stale {
        let Some(start) = session.start_time else {
            continue;
        };
        let end = (start + chrono::Duration::hours(STALE_SESSION_CAP_HOURS)).min(now);
        match sessions.close_session(session.id, end).await {
            Ok(()) => info!(
                session_id = session.id,
                streamer = %session.streamer_name,
                end = %end,
                "capped stale open session"
            ),
            Err(e) => error!(session_id = session.id, error = %e, "failed to cap stale session"),
        }
    }
}
