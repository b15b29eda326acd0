//! Per-streamer live-state machine.
//!
//! A [`LiveStateMonitor`] owns the cached status for one streamer and turns
//! raw polls into edge events. The platform call sits behind [`StatusProbe`]
//! so the state machine is testable without a network.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{error, info, warn};

/// One status poll: live, offline, or unknown (network/parse failure).
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn check(&self) -> Option<bool>;
}

/// Probe backed by the platform room-status endpoint.
pub struct RoomStatusProbe {
    client: Client,
    base_url: String,
    room_id: String,
    streamer_name: String,
}

impl RoomStatusProbe {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        room_id: impl Into<String>,
        streamer_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            room_id: room_id.into(),
            streamer_name: streamer_name.into(),
        }
    }
}

#[async_trait]
impl StatusProbe for RoomStatusProbe {
    async fn check(&self) -> Option<bool> {
        match douyu::room::is_room_live(&self.client, &self.base_url, &self.room_id).await {
            Ok(live) => Some(live),
            Err(e) => {
                error!(
                    streamer = %self.streamer_name,
                    room_id = %self.room_id,
                    error = %e,
                    "live status check failed"
                );
                None
            }
        }
    }
}

/// Cached live state with edge detection.
pub struct LiveStateMonitor {
    streamer_name: String,
    probe: Box<dyn StatusProbe>,
    last_status: Option<bool>,
}

impl LiveStateMonitor {
    pub fn new(streamer_name: impl Into<String>, probe: Box<dyn StatusProbe>) -> Self {
        Self {
            streamer_name: streamer_name.into(),
            probe,
            last_status: None,
        }
    }

    /// Cached status; offline until initialized.
    pub fn is_live(&self) -> bool {
        self.last_status.unwrap_or(false)
    }

    /// Fill the cache with one poll; unknown defaults to offline.
    pub async fn initialize(&mut self) {
        match self.probe.check().await {
            Some(status) => {
                self.last_status = Some(status);
                info!(
                    streamer = %self.streamer_name,
                    live = status,
                    "initialized live status"
                );
            }
            None => {
                self.last_status = Some(false);
                warn!(
                    streamer = %self.streamer_name,
                    "initial status unknown, defaulting to offline"
                );
            }
        }
    }

    /// Poll once and report `(old, new)` when the state flipped.
    ///
    /// Unknown results leave the cache untouched and report no change; the
    /// first call without [`initialize`] only seeds the cache.
    pub async fn detect_change(&mut self) -> Option<(bool, bool)> {
        let current = self.probe.check().await?;

        let Some(previous) = self.last_status else {
            self.last_status = Some(current);
            return None;
        };

        if current != previous {
            self.last_status = Some(current);
            return Some((previous, current));
        }

        None
    }
}
