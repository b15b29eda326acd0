//! STT (Serialized Text Transport) codec.
//!
//! The chat endpoint frames every message as:
//!
//! ```text
//! | length (u32 LE) | length (u32 LE) | opcode 689 (u32 LE) | payload | NUL |
//! ```
//!
//! where `length = payload_len + 1 (NUL) + 8` — it covers the second length
//! field and the opcode but not the leading length field itself. The payload
//! is a slash-separated list of `key@=value` tokens with a required trailing
//! slash. Inside values, `@` is escaped as `@A` and `/` as `@S`.

use bytes::{BufMut, Bytes, BytesMut};
use rustc_hash::FxHashMap;

/// Wire opcode for text frames, little-endian.
const OPCODE: u32 = 689;

/// Fixed header bytes preceding the payload: len + len + opcode.
const HEADER_SIZE: usize = 12;

/// Escape `@` as `@A` and `/` as `@S` inside a token value.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '@' => out.push_str("@A"),
            '/' => out.push_str("@S"),
            _ => out.push(c),
        }
    }
    out
}

/// Undo [`escape`]. `@S` must be unescaped before `@A` would re-create it,
/// so the replacement order matters.
pub fn unescape(s: &str) -> String {
    s.replace("@S", "/").replace("@A", "@")
}

/// Pack a single payload into a binary frame.
///
/// A trailing `/` is appended when missing; the wire format requires it.
pub fn pack(payload: &str) -> Bytes {
    let mut payload = payload.to_string();
    if !payload.ends_with('/') {
        payload.push('/');
    }

    let body = payload.as_bytes();
    // length covers payload + NUL + second length field + opcode
    let length = (body.len() + 1 + 8) as u32;

    let mut buf = BytesMut::with_capacity(body.len() + HEADER_SIZE + 1);
    buf.put_u32_le(length);
    buf.put_u32_le(length);
    buf.put_u32_le(OPCODE);
    buf.put_slice(body);
    buf.put_u8(0x00);
    buf.freeze()
}

/// Iterate over every payload in a possibly-concatenated buffer.
///
/// The reported length excludes the leading length field, so each iteration
/// advances `length + 4` bytes. A truncated or undersized tail ends the
/// iteration silently; this never fails.
pub fn iter_payloads(data: &[u8]) -> Payloads<'_> {
    Payloads { data, offset: 0 }
}

/// Iterator returned by [`iter_payloads`].
pub struct Payloads<'a> {
    data: &'a [u8],
    offset: usize,
}

impl Iterator for Payloads<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let rest = self.data.get(self.offset..)?;
        if rest.len() < 4 {
            return None;
        }

        let length = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let packet_size = length + 4;
        if packet_size <= HEADER_SIZE || rest.len() < packet_size {
            return None;
        }

        let payload = &rest[HEADER_SIZE..packet_size];
        // Truncate at the NUL terminator; garbage after it is ignored.
        let payload = payload
            .split(|&b| b == 0x00)
            .next()
            .unwrap_or_default();

        self.offset += packet_size;
        Some(String::from_utf8_lossy(payload).into_owned())
    }
}

/// Parse a payload into a key → unescaped-value map.
///
/// Tokens without a `@=` separator are skipped; a malformed token never
/// fails the whole parse.
pub fn parse_kv(payload: &str) -> FxHashMap<String, String> {
    let mut map = FxHashMap::default();
    for token in payload.split('/') {
        if token.is_empty() {
            continue;
        }
        if let Some((key, value)) = token.split_once("@=") {
            map.insert(key.to_string(), unescape(value));
        }
    }
    map
}
