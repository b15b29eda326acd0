//! relive - livestream capture and republish pipeline.

use std::path::PathBuf;

use relive::config::Settings;
use relive::database;
use relive::logging::init_logging;
use relive::services::Services;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path = PathBuf::from(
        std::env::var("RELIVE_CONFIG").unwrap_or_else(|_| "relive.toml".to_string()),
    );
    let settings = Settings::load(&config_path)
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;

    let _log_guard = init_logging(&settings.paths.log_dir)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    info!(version = env!("CARGO_PKG_VERSION"), config = %config_path.display(), "starting relive");

    info!(database = %settings.paths.database_url, "connecting to database");
    let pool = database::create_pool(&settings.paths.database_url).await?;

    let services = Services::start(settings, pool).await?;
    info!("relive started");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = wait_for_sigterm() => {
            info!("received SIGTERM, shutting down");
        }
    }

    services.shutdown().await;
    info!("relive stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "cannot register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // No SIGTERM outside unix; Ctrl+C above covers shutdown.
    std::future::pending::<()>().await;
}
