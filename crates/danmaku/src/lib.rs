//! Live chat collection.
//!
//! [`ChatCollector`] holds a websocket open against the platform chat
//! endpoint for a bounded duration and appends every chat message to a
//! [`ChatXmlWriter`] transcript alongside the video segment being recorded.

mod collector;
mod error;
mod writer;

pub use collector::{ChatCollector, CollectorConfig};
pub use error::{DanmakuError, Result};
pub use writer::{ChatEntry, ChatXmlWriter, escape_xml};
