//! Douyu platform client.
//!
//! Covers the three platform touch points the recorder needs:
//! - [`stt`]: the binary chat wire codec (length-prefixed key/value frames),
//! - [`resolver`]: signed resolution of a playable stream URL,
//! - [`room`]: the room-status endpoint used for live polling.

mod error;
mod models;
pub mod resolver;
pub mod room;
pub mod stt;

pub use error::{DouyuError, Result};
pub use models::{EncryptionData, H5PlayData};
pub use resolver::{ResolvedStream, ResolverConfig, StreamResolver, sign};

use std::time::Duration;

/// Default desktop User-Agent for API requests.
pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Default device ID accepted by the platform for anonymous sessions.
pub const DEFAULT_DID: &str = "10000000000000000000000000001501";

/// Default request timeout for platform API calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a reqwest client with the defaults the platform endpoints expect.
pub fn default_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(DEFAULT_UA)
        .build()
}

/// Pick a random desktop User-Agent string.
///
/// The platform occasionally rate-limits a fixed UA; rotating per key bundle
/// keeps the signing UA and the play request UA consistent with each other.
pub(crate) fn random_desktop_user_agent() -> String {
    use rand::RngExt;
    let agents = [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ];
    let mut rng = rand::rng();
    agents[rng.random_range(0..agents.len())].to_string()
}
