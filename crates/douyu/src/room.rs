//! Room-status endpoint.

use reqwest::Client;

use crate::error::{DouyuError, Result};
use crate::models::BetardResponse;

/// Check whether a room is live.
///
/// Live means the room is showing (`show_status == 1`) and not replaying a
/// recording loop (`videoLoop == 0`). Network and parse failures surface as
/// errors; the caller decides how to treat an unknown state.
pub async fn is_room_live(client: &Client, base_url: &str, room_id: &str) -> Result<bool> {
    let base = base_url.trim_end_matches('/');
    let response = client
        .get(format!("{base}/betard/{room_id}"))
        .header(reqwest::header::USER_AGENT, crate::DEFAULT_UA)
        .header(reqwest::header::REFERER, base)
        .header(reqwest::header::ORIGIN, base)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(DouyuError::protocol(format!(
            "room status endpoint returned {}",
            response.status()
        )));
    }

    let body = response.text().await?;
    let info: BetardResponse = serde_json::from_str(&body).map_err(|e| {
        DouyuError::protocol(format!(
            "malformed room status response: {e} - body: {}",
            crate::resolver::body_snippet(&body)
        ))
    })?;

    Ok(info.room.show_status == 1 && info.room.video_loop == 0)
}
