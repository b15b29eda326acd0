//! Destination submissions listing.
//!
//! The CLI has no listing verb, so identifier discovery reads the member
//! archives endpoint directly, authenticated with the same cookies file the
//! CLI uses.

use std::path::Path;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::Error;
use crate::upload::backend::Submission;

const ARCHIVES_URL: &str = "https://member.bilibili.com/x/web/archives";

#[derive(Debug, Deserialize)]
struct ArchivesResponse {
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<ArchivesData>,
}

#[derive(Debug, Deserialize)]
struct ArchivesData {
    #[serde(default)]
    arc_audits: Vec<ArcAudit>,
}

#[derive(Debug, Deserialize)]
struct ArcAudit {
    #[serde(rename = "Archive")]
    archive: Option<Archive>,
}

#[derive(Debug, Deserialize)]
struct Archive {
    #[serde(default)]
    title: String,
    #[serde(default)]
    bvid: String,
}

pub struct FeedClient {
    client: Client,
    cookie_header: String,
}

impl FeedClient {
    pub fn new(cookies_path: &Path) -> crate::Result<Self> {
        let cookie_header = load_cookie_header(cookies_path)?;
        let client = douyu::default_client().map_err(douyu::DouyuError::from)?;
        Ok(Self {
            client,
            cookie_header,
        })
    }

    /// Own submissions in the given statuses, later statuses taking
    /// precedence on title collisions.
    pub async fn list_submissions(&self, statuses: &[&str]) -> crate::Result<Vec<Submission>> {
        let mut merged: Vec<Submission> = Vec::new();

        for status in statuses {
            let response = self
                .client
                .get(ARCHIVES_URL)
                .query(&[("status", *status), ("pn", "1"), ("ps", "20")])
                .header(reqwest::header::COOKIE, &self.cookie_header)
                .send()
                .await
                .map_err(|e| Error::upload(format!("submissions listing failed: {e}")))?;

            let body: ArchivesResponse = response
                .json()
                .await
                .map_err(|e| Error::upload(format!("malformed submissions listing: {e}")))?;

            if body.code != 0 {
                return Err(Error::upload(format!(
                    "submissions listing error {}: {}",
                    body.code, body.message
                )));
            }

            let Some(data) = body.data else { continue };
            for audit in data.arc_audits {
                let Some(archive) = audit.archive else { continue };
                if archive.bvid.is_empty() || archive.title.is_empty() {
                    continue;
                }
                merged.retain(|s| s.title != archive.title);
                merged.push(Submission {
                    title: archive.title,
                    bvid: archive.bvid,
                });
            }
        }

        debug!(count = merged.len(), "fetched submissions listing");
        Ok(merged)
    }
}

/// Build a `Cookie` header from the uploader's cookies file.
///
/// Accepts the uploader's native format (`cookie_info.cookies` list of
/// name/value pairs) or a flat string map.
fn load_cookie_header(path: &Path) -> crate::Result<String> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!("cannot read cookies file {}: {e}", path.display()))
    })?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| Error::config(format!("invalid cookies file {}: {e}", path.display())))?;

    let mut pairs: Vec<(String, String)> = Vec::new();

    if let Some(cookies) = value
        .get("cookie_info")
        .and_then(|info| info.get("cookies"))
        .and_then(|c| c.as_array())
    {
        for cookie in cookies {
            if let (Some(name), Some(val)) = (
                cookie.get("name").and_then(|n| n.as_str()),
                cookie.get("value").and_then(|v| v.as_str()),
            ) {
                pairs.push((name.to_string(), val.to_string()));
            }
        }
    } else if let Some(map) = value.as_object() {
        for (name, val) in map {
            if let Some(val) = val.as_str() {
                pairs.push((name.clone(), val.to_string()));
            }
        }
    }

    if pairs.is_empty() {
        return Err(Error::config(format!(
            "cookies file {} carries no cookies",
            path.display()
        )));
    }

    Ok(pairs
        .into_iter()
        .map(|(name, val)| format!("{name}={val}"))
        .collect::<Vec<_>>()
        .join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_uploader_native_cookie_format() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cookies.json");
        std::fs::write(
            &path,
            r#"{"cookie_info":{"cookies":[
                {"name":"SESSDATA","value":"abc"},
                {"name":"bili_jct","value":"def"}
            ]}}"#,
        )
        .unwrap();

        let header = load_cookie_header(&path).unwrap();
        assert_eq!(header, "SESSDATA=abc; bili_jct=def");
    }

    #[test]
    fn loads_flat_cookie_map() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cookies.json");
        std::fs::write(&path, r#"{"SESSDATA":"abc"}"#).unwrap();

        assert_eq!(load_cookie_header(&path).unwrap(), "SESSDATA=abc");
    }

    #[test]
    fn empty_cookie_file_is_a_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cookies.json");
        std::fs::write(&path, r#"{}"#).unwrap();

        assert!(load_cookie_header(&path).is_err());
    }

    #[test]
    fn archives_response_parses() {
        let json = r#"{
            "code": 0,
            "data": {"arc_audits": [
                {"Archive": {"title": "t1", "bvid": "BV1xx411c7mD"}},
                {"Archive": {"title": "", "bvid": "BV1yy411c7mD"}}
            ]}
        }"#;
        let parsed: ArchivesResponse = serde_json::from_str(json).unwrap();
        let audits = parsed.data.unwrap().arc_audits;
        assert_eq!(audits.len(), 2);
        assert_eq!(audits[0].archive.as_ref().unwrap().bvid, "BV1xx411c7mD");
    }
}
