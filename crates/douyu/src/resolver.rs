//! Signed stream-URL resolution.
//!
//! The platform hands out playable URLs only to requests carrying an `auth`
//! signature derived from a short-lived key bundle. The bundle is fetched
//! from the encryption endpoint and cached until just before its
//! server-reported expiry; a 403 from the play endpoint invalidates the cache
//! and earns exactly one retry with a fresh bundle.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::error::{DouyuError, Result};
use crate::models::{EncryptionData, EncryptionResponse, H5PlayData, H5PlayResponse};
use crate::random_desktop_user_agent;

/// Refresh this many seconds ahead of the server-side expiry so a bundle
/// never goes stale mid-segment.
const EXPIRY_MARGIN_SECS: i64 = 5;

/// Cache lifetime when the server does not report an expiry.
const FALLBACK_TTL_SECS: u64 = 300;

/// Client API version string expected by the play endpoint.
const PLAY_API_VER: &str = "219032101";

/// Resolver knobs; everything has a platform-sensible default.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub base_url: String,
    pub did: String,
    pub cdn: String,
    pub rate: i64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.douyu.com".to_string(),
            did: crate::DEFAULT_DID.to_string(),
            cdn: "hw-h5".to_string(),
            rate: 0,
        }
    }
}

/// A playable URL plus the headers a downstream fetcher must send.
#[derive(Debug, Clone)]
pub struct ResolvedStream {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct CachedKeyBundle {
    data: EncryptionData,
    valid_until: u64,
    user_agent: String,
}

impl CachedKeyBundle {
    fn is_valid(&self, now: u64) -> bool {
        now < self.valid_until
    }
}

/// Resolves playable stream URLs, caching the signing key bundle in between.
pub struct StreamResolver {
    client: Client,
    config: ResolverConfig,
    key_cache: Mutex<Option<CachedKeyBundle>>,
}

impl StreamResolver {
    pub fn new(client: Client, mut config: ResolverConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            client,
            config,
            key_cache: Mutex::new(None),
        }
    }

    /// Resolve the stream URL for a room.
    ///
    /// Retries exactly once after a 403, with a freshly fetched key bundle.
    pub async fn resolve(&self, room_id: &str) -> Result<ResolvedStream> {
        for attempt in 0..2 {
            if attempt == 1 {
                debug!(room_id, "play request rejected, refreshing key bundle");
                self.invalidate_key();
            }

            let bundle = self.key_bundle().await?;
            let ts = unix_now();
            let auth = sign(room_id, ts, &bundle.data);

            let mut params: HashMap<&str, String> = HashMap::new();
            params.insert("cdn", self.config.cdn.clone());
            params.insert("rate", self.config.rate.to_string());
            params.insert("ver", PLAY_API_VER.to_string());
            params.insert("iar", "0".to_string());
            params.insert("ive", "0".to_string());
            params.insert("rid", room_id.to_string());
            params.insert("hevc", "0".to_string());
            params.insert("fa", "0".to_string());
            params.insert("sov", "0".to_string());
            params.insert("enc_data", bundle.data.enc_data.clone());
            params.insert("tt", ts.to_string());
            params.insert("did", self.config.did.clone());
            params.insert("auth", auth);

            let response = self
                .client
                .post(format!(
                    "{}/lapi/live/getH5PlayV1/{room_id}",
                    self.config.base_url
                ))
                .header(reqwest::header::USER_AGENT, &bundle.user_agent)
                .header(reqwest::header::REFERER, &self.config.base_url)
                .header(reqwest::header::ORIGIN, &self.config.base_url)
                .query(&params)
                .form(&params)
                .send()
                .await?;

            if response.status() == StatusCode::FORBIDDEN {
                if attempt == 0 {
                    continue;
                }
                return Err(DouyuError::auth("play endpoint returned 403 after key refresh"));
            }

            let body = response.text().await?;
            let play: H5PlayResponse = serde_json::from_str(&body).map_err(|e| {
                DouyuError::protocol(format!(
                    "malformed play response: {e} - body: {}",
                    body_snippet(&body)
                ))
            })?;

            if play.error != 0 {
                return Err(DouyuError::protocol(format!(
                    "play endpoint error {}: {}",
                    play.error, play.msg
                )));
            }

            let data = play
                .data
                .ok_or_else(|| DouyuError::protocol("play response carried no data"))?;

            let url = stream_url_from(&data)?;
            return Ok(ResolvedStream {
                url,
                headers: self.request_headers(&bundle.user_agent),
            });
        }

        Err(DouyuError::auth("play request retry exhausted"))
    }

    /// Headers a stream fetcher (ffmpeg) must present to the CDN.
    fn request_headers(&self, user_agent: &str) -> Vec<(String, String)> {
        vec![
            ("User-Agent".to_string(), user_agent.to_string()),
            ("Referer".to_string(), self.config.base_url.clone()),
            ("Origin".to_string(), self.config.base_url.clone()),
        ]
    }

    async fn key_bundle(&self) -> Result<CachedKeyBundle> {
        let now = unix_now();
        if let Some(cached) = self.key_cache.lock().as_ref()
            && cached.is_valid(now)
        {
            return Ok(cached.clone());
        }

        let fresh = self.fetch_key_bundle().await?;
        *self.key_cache.lock() = Some(fresh.clone());
        Ok(fresh)
    }

    async fn fetch_key_bundle(&self) -> Result<CachedKeyBundle> {
        let user_agent = random_desktop_user_agent();

        let response = self
            .client
            .get(format!(
                "{}/wgapi/livenc/liveweb/websec/getEncryption",
                self.config.base_url
            ))
            .query(&[("did", self.config.did.as_str())])
            .header(reqwest::header::USER_AGENT, &user_agent)
            .header(reqwest::header::REFERER, &self.config.base_url)
            .send()
            .await?;

        let body = response.text().await?;
        let parsed: EncryptionResponse = serde_json::from_str(&body).map_err(|e| {
            DouyuError::protocol(format!(
                "malformed encryption response: {e} - body: {}",
                body_snippet(&body)
            ))
        })?;

        if parsed.error != 0 {
            return Err(DouyuError::protocol(format!(
                "encryption endpoint error {}: {}",
                parsed.error, parsed.msg
            )));
        }

        let data = parsed
            .data
            .ok_or_else(|| DouyuError::protocol("encryption response carried no data"))?;

        debug!(
            rand_str = %data.rand_str,
            enc_time = data.enc_time,
            is_special = data.is_special,
            "fetched key bundle"
        );

        Ok(CachedKeyBundle {
            valid_until: key_valid_until(unix_now(), data.expire_at),
            data,
            user_agent,
        })
    }

    fn invalidate_key(&self) {
        *self.key_cache.lock() = None;
    }
}

/// Compute the `auth` signature for a play request.
///
/// The chain is: `secret := rand_str`, then `enc_time` rounds of
/// `secret := md5(secret || key)`, then
/// `auth := md5(secret || key || salt)` where `salt` is empty for special
/// keys and `room_id || ts` otherwise.
pub fn sign(room_id: &str, ts: u64, data: &EncryptionData) -> String {
    let mut secret = data.rand_str.clone();
    for _ in 0..data.enc_time {
        secret = md5_hex(&format!("{}{}", secret, data.key));
    }

    let salt = if data.is_special {
        String::new()
    } else {
        format!("{room_id}{ts}")
    };

    md5_hex(&format!("{}{}{}", secret, data.key, salt))
}

/// How long a bundle stays usable: `max(0, expire_at − margin)` when the
/// server reports an expiry, else a short fixed TTL from now.
fn key_valid_until(now: u64, expire_at: Option<i64>) -> u64 {
    match expire_at {
        Some(at) if at > 0 => (at - EXPIRY_MARGIN_SECS).max(0) as u64,
        _ => now + FALLBACK_TTL_SECS,
    }
}

fn stream_url_from(data: &H5PlayData) -> Result<String> {
    if let (Some(base), Some(live)) = (&data.rtmp_url, &data.rtmp_live) {
        return Ok(join_url(base, live));
    }
    if let (Some(base), Some(live)) = (&data.hls_url, &data.hls_live) {
        warn!("play response carried no rtmp stream, falling back to hls");
        return Ok(join_url(base, live));
    }
    Err(DouyuError::protocol("play response carried no stream url"))
}

fn join_url(base: &str, live: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), live.trim_start_matches('/'))
}

/// Truncate a body for error messages without splitting a UTF-8 character.
pub(crate) fn body_snippet(body: &str) -> &str {
    let mut end = body.len().min(300);
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_data(is_special: bool) -> EncryptionData {
        serde_json::from_value(serde_json::json!({
            "rand_str": "RAND",
            "enc_time": 2,
            "key": "KEY",
            "is_special": is_special,
            "enc_data": "ENC",
        }))
        .unwrap()
    }

    #[test]
    fn sign_matches_iterated_md5_chain() {
        let data = key_data(false);

        let round1 = md5_hex("RANDKEY");
        let round2 = md5_hex(&format!("{round1}KEY"));
        let expected = md5_hex(&format!("{round2}KEY12341700000000"));

        assert_eq!(sign("1234", 1_700_000_000, &data), expected);
    }

    #[test]
    fn sign_is_deterministic() {
        let data = key_data(false);
        let a = sign("1234", 1_700_000_000, &data);
        let b = sign("1234", 1_700_000_000, &data);
        assert_eq!(a, b);
    }

    #[test]
    fn sign_special_key_drops_salt() {
        let data = key_data(true);
        let round1 = md5_hex("RANDKEY");
        let round2 = md5_hex(&format!("{round1}KEY"));
        let expected = md5_hex(&format!("{round2}KEY"));

        // Room and timestamp must not influence the signature.
        assert_eq!(sign("1234", 1_700_000_000, &data), expected);
        assert_eq!(sign("9999", 42, &data), expected);
    }

    #[test]
    fn key_validity_prefers_server_expiry() {
        assert_eq!(key_valid_until(100, Some(1_000)), 995);
        assert_eq!(key_valid_until(100, Some(3)), 0);
        assert_eq!(key_valid_until(100, None), 400);
        assert_eq!(key_valid_until(100, Some(0)), 400);
    }

    #[test]
    fn body_snippet_respects_char_boundaries() {
        let body = "错".repeat(200);
        let snippet = body_snippet(&body);
        assert!(snippet.len() <= 300);
        assert!(body.starts_with(snippet));
    }

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("https://a/b/", "/c.flv"), "https://a/b/c.flv");
        assert_eq!(join_url("https://a/b", "c.flv"), "https://a/b/c.flv");
    }
}
