#![allow(dead_code)]

use serde::Deserialize;

/// Response from the encryption key endpoint
/// (`/wgapi/livenc/liveweb/websec/getEncryption`).
#[derive(Debug, Clone, Deserialize)]
pub struct EncryptionResponse {
    pub error: i32,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Option<EncryptionData>,
}

/// Key material for request signing.
#[derive(Debug, Clone, Deserialize)]
pub struct EncryptionData {
    /// Random seed for the iterated hash chain.
    pub rand_str: String,
    /// Number of MD5 iterations.
    pub enc_time: u32,
    /// Hash chain key.
    pub key: String,
    /// Special keys drop the room/timestamp salt.
    #[serde(default, deserialize_with = "deserialize_bool_or_int")]
    pub is_special: bool,
    /// Opaque blob echoed back in the play request.
    pub enc_data: String,
    /// Server-authoritative expiry (unix seconds), when supplied.
    #[serde(default, deserialize_with = "deserialize_opt_i64")]
    pub expire_at: Option<i64>,
}

/// Response from the play endpoint (`/lapi/live/getH5PlayV1/{rid}`).
#[derive(Debug, Deserialize)]
pub struct H5PlayResponse {
    pub error: i32,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Option<H5PlayData>,
}

/// Stream location: either an RTMP/FLV pair or an HLS pair.
#[derive(Debug, Clone, Deserialize)]
pub struct H5PlayData {
    #[serde(default)]
    pub rtmp_url: Option<String>,
    #[serde(default)]
    pub rtmp_live: Option<String>,
    #[serde(default)]
    pub hls_url: Option<String>,
    #[serde(default)]
    pub hls_live: Option<String>,
}

/// Response from the room-status endpoint (`/betard/{rid}`).
#[derive(Debug, Deserialize)]
pub struct BetardResponse {
    pub room: BetardRoom,
}

#[derive(Debug, Deserialize)]
pub struct BetardRoom {
    pub show_status: u64,
    #[serde(rename = "videoLoop", default)]
    pub video_loop: u64,
}

/// Accept a boolean or a 0/1 integer; the API is inconsistent across rooms.
fn deserialize_bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Visitor;

    struct BoolOrIntVisitor;

    impl Visitor<'_> for BoolOrIntVisitor {
        type Value = bool;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a boolean or integer (0/1)")
        }

        fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<bool, E> {
            Ok(v != 0)
        }
    }

    deserializer.deserialize_any(BoolOrIntVisitor)
}

/// Accept an integer, a numeric string, or null; anything else becomes None.
fn deserialize_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Visitor;

    struct OptI64Visitor;

    impl Visitor<'_> for OptI64Visitor {
        type Value = Option<i64>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("an integer, a numeric string, or null")
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(i64::try_from(v).ok())
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.parse().ok())
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(OptI64Visitor)
}
