//! Append-only chat transcript writer.
//!
//! Produces the fixed chat-XML dialect downstream converters expect:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <i>
//! <d p="12.34,1,25,16777215,1700000000,0,0,0">message text</d>
//! </i>
//! ```
//!
//! The `p` attribute fields are: offset seconds from segment start (two
//! decimals), display mode, font size, decimal RGB color, unix seconds,
//! pool, uid, row id. Text is XML-escaped. The writer flushes after every
//! entry so a crash mid-segment still leaves a parseable prefix.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::Result;

const DEFAULT_MODE: u8 = 1;
const DEFAULT_FONT_SIZE: u32 = 25;
const DEFAULT_COLOR: u32 = 16_777_215;

/// One transcript entry.
#[derive(Debug, Clone)]
pub struct ChatEntry {
    pub offset_seconds: f64,
    pub text: String,
    pub mode: u8,
    pub font_size: u32,
    pub color: u32,
    pub timestamp: i64,
    pub pool: u8,
    pub uid: u64,
    pub row_id: u64,
}

impl ChatEntry {
    /// Entry with the dialect defaults (scrolling, size 25, white) stamped
    /// with the current unix time.
    pub fn new(offset_seconds: f64, text: impl Into<String>) -> Self {
        Self {
            offset_seconds,
            text: text.into(),
            mode: DEFAULT_MODE,
            font_size: DEFAULT_FONT_SIZE,
            color: DEFAULT_COLOR,
            timestamp: Utc::now().timestamp(),
            pool: 0,
            uid: 0,
            row_id: 0,
        }
    }
}

/// Single-writer transcript file. Not safe for concurrent writes.
pub struct ChatXmlWriter {
    path: PathBuf,
    file: Option<File>,
    entry_count: u64,
}

impl ChatXmlWriter {
    /// Create the file (parent directories included) and write the header.
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = File::create(path).await?;
        file.write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<i>\n")
            .await?;
        file.flush().await?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            entry_count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Append one entry and flush.
    pub async fn write_entry(&mut self, entry: &ChatEntry) -> Result<()> {
        if let Some(file) = &mut self.file {
            file.write_all(format_entry(entry).as_bytes()).await?;
            file.flush().await?;
            self.entry_count += 1;
        }
        Ok(())
    }

    /// Write the root end tag and close the file.
    pub async fn finalize(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.write_all(b"</i>\n").await?;
            file.flush().await?;
        }
        Ok(())
    }
}

fn format_entry(entry: &ChatEntry) -> String {
    format!(
        "<d p=\"{:.2},{},{},{},{},{},{},{}\">{}</d>\n",
        entry.offset_seconds,
        entry.mode,
        entry.font_size,
        entry.color,
        entry.timestamp,
        entry.pool,
        entry.uid,
        entry.row_id,
        escape_xml(&entry.text),
    )
}

/// Escape the five XML special characters.
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
