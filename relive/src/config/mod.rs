//! Typed configuration tree.
//!
//! Loaded once at startup from a TOML file (`RELIVE_CONFIG`, default
//! `relive.toml`); every knob has a default so an empty file is a valid,
//! if useless, configuration. The upload section is passed by value into the
//! upload orchestrator at tick boundaries rather than re-read mid-run.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub paths: PathsSettings,
    #[serde(default)]
    pub processing: ProcessingSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub recording: RecordingSettings,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub upload: UploadSettings,
    #[serde(default)]
    pub deletion: DeletionSettings,
    #[serde(default)]
    pub streamers: Vec<StreamerSettings>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let settings: Settings = toml::from_str(&content)
            .map_err(|e| Error::config(format!("invalid config file {}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        for streamer in &self.streamers {
            if streamer.name.is_empty() {
                return Err(Error::config("streamer name must not be empty"));
            }
            if streamer.room_id.is_empty() {
                return Err(Error::config(format!(
                    "streamer {} has no room_id",
                    streamer.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSettings {
    #[serde(default = "default_processing_folder")]
    pub processing_folder: PathBuf,
    #[serde(default = "default_upload_folder")]
    pub upload_folder: PathBuf,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for PathsSettings {
    fn default() -> Self {
        Self {
            processing_folder: default_processing_folder(),
            upload_folder: default_upload_folder(),
            database_url: default_database_url(),
            log_dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingSettings {
    /// Finished segments smaller than this are deleted as unusable.
    #[serde(default = "default_min_file_size_mb")]
    pub min_file_size_mb: u64,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_sc_font_size")]
    pub sc_font_size: u32,
    /// Skip burn-in entirely and republish raw `.flv` files.
    #[serde(default)]
    pub skip_video_encoding: bool,
    #[serde(default = "default_danmaku_suffix")]
    pub danmaku_title_suffix: String,
    #[serde(default = "default_no_danmaku_suffix")]
    pub no_danmaku_title_suffix: String,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    /// XML→ASS converter binary.
    #[serde(default = "default_converter_path")]
    pub converter_path: String,
    /// Converter argument template; `{input}`, `{output}`, `{width}`,
    /// `{height}`, `{font_size}` and `{sc_font_size}` are substituted.
    #[serde(default = "default_converter_args")]
    pub converter_args: Vec<String>,
    /// QSV device node, e.g. `/dev/dri/renderD128`. Empty uses `qsv=hw`.
    #[serde(default)]
    pub qsv_device: String,
    /// Optional fonts directory for the subtitles filter.
    #[serde(default)]
    pub fonts_dir: String,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            min_file_size_mb: default_min_file_size_mb(),
            font_size: default_font_size(),
            sc_font_size: default_sc_font_size(),
            skip_video_encoding: false,
            danmaku_title_suffix: default_danmaku_suffix(),
            no_danmaku_title_suffix: default_no_danmaku_suffix(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            converter_path: default_converter_path(),
            converter_args: default_converter_args(),
            qsv_device: String::new(),
            fonts_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_schedule_interval")]
    pub interval_minutes: u64,
    #[serde(default = "default_status_check_interval")]
    pub stream_status_check_interval: u64,
    /// Minutes subtracted from an observed going-live instant, and the
    /// buffer widening upload grouping intervals. One knob covers both.
    #[serde(default = "default_start_time_adjustment")]
    pub stream_start_time_adjustment: i64,
    #[serde(default)]
    pub process_after_stream_end: bool,
    #[serde(default = "default_true")]
    pub scheduled_upload_enabled: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval_minutes: default_schedule_interval(),
            stream_status_check_interval: default_status_check_interval(),
            stream_start_time_adjustment: default_start_time_adjustment(),
            process_after_stream_end: false,
            scheduled_upload_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_segment_minutes")]
    pub segment_minutes: u64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            segment_minutes: default_segment_minutes(),
            retry_delay_seconds: default_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_stream_base_url")]
    pub base_url: String,
    #[serde(default = "default_cdn")]
    pub cdn: String,
    #[serde(default)]
    pub rate: i64,
    #[serde(default = "default_did")]
    pub did: String,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            base_url: default_stream_base_url(),
            cdn: default_cdn(),
            rate: 0,
            did: default_did(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            heartbeat_seconds: default_heartbeat_seconds(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadBackendKind {
    Auto,
    BiliupCli,
    Bilitool,
}

impl Default for UploadBackendKind {
    fn default() -> Self {
        Self::Auto
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadSettings {
    #[serde(default)]
    pub backend: UploadBackendKind,
    #[serde(default = "default_uploader_binary")]
    pub binary_path: String,
    #[serde(default = "default_cookies_path")]
    pub cookies_path: PathBuf,
    #[serde(default = "default_submit_mode")]
    pub submit: String,
    /// Optional upload line override passed to the CLI.
    #[serde(default)]
    pub line: String,
    #[serde(default = "default_rate_limit_cooldown")]
    pub rate_limit_cooldown_seconds: u64,
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_append_max_retries: u32,
    #[serde(default)]
    pub meta: UploadMeta,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            backend: UploadBackendKind::default(),
            binary_path: default_uploader_binary(),
            cookies_path: default_cookies_path(),
            submit: default_submit_mode(),
            line: String::new(),
            rate_limit_cooldown_seconds: default_rate_limit_cooldown(),
            rate_limit_append_max_retries: default_rate_limit_retries(),
            meta: UploadMeta::default(),
        }
    }
}

/// Destination submission metadata; `title` may contain a `{time}`
/// placeholder.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadMeta {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tid: u32,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub dynamic: String,
    #[serde(default)]
    pub desc: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeletionSettings {
    #[serde(default)]
    pub delete_uploaded_files: bool,
    #[serde(default = "default_delete_delay_hours")]
    pub delay_hours: i64,
}

impl Default for DeletionSettings {
    fn default() -> Self {
        Self {
            delete_uploaded_files: false,
            delay_hours: default_delete_delay_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamerSettings {
    pub name: String,
    pub room_id: String,
}

fn default_true() -> bool {
    true
}

fn default_processing_folder() -> PathBuf {
    PathBuf::from("processing")
}

fn default_upload_folder() -> PathBuf {
    PathBuf::from("upload")
}

fn default_database_url() -> String {
    "sqlite:relive.db?mode=rwc".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_min_file_size_mb() -> u64 {
    10
}

fn default_font_size() -> u32 {
    50
}

fn default_sc_font_size() -> u32 {
    48
}

fn default_danmaku_suffix() -> String {
    "(弹幕版)".to_string()
}

fn default_no_danmaku_suffix() -> String {
    "(无弹幕版)".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_converter_path() -> String {
    "DanmakuFactory".to_string()
}

fn default_converter_args() -> Vec<String> {
    [
        "-i", "{input}", "-o", "{output}", "-r", "{width}x{height}", "-s", "{font_size}",
        "--sc-fontsize", "{sc_font_size}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_schedule_interval() -> u64 {
    60
}

fn default_status_check_interval() -> u64 {
    10
}

fn default_start_time_adjustment() -> i64 {
    10
}

fn default_segment_minutes() -> u64 {
    60
}

fn default_retry_delay() -> u64 {
    10
}

fn default_stream_base_url() -> String {
    "https://www.douyu.com".to_string()
}

fn default_cdn() -> String {
    "hw-h5".to_string()
}

fn default_did() -> String {
    douyu::DEFAULT_DID.to_string()
}

fn default_ws_url() -> String {
    "wss://danmuproxy.douyu.com:8506/".to_string()
}

fn default_heartbeat_seconds() -> u64 {
    30
}

fn default_uploader_binary() -> String {
    "biliup".to_string()
}

fn default_cookies_path() -> PathBuf {
    PathBuf::from("cookies.json")
}

fn default_submit_mode() -> String {
    "app".to_string()
}

fn default_rate_limit_cooldown() -> u64 {
    300
}

fn default_rate_limit_retries() -> u32 {
    1
}

fn default_delete_delay_hours() -> i64 {
    24
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_gets_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.processing.min_file_size_mb, 10);
        assert_eq!(settings.schedule.interval_minutes, 60);
        assert_eq!(settings.schedule.stream_start_time_adjustment, 10);
        assert_eq!(settings.recording.segment_minutes, 60);
        assert_eq!(settings.upload.rate_limit_cooldown_seconds, 300);
        assert_eq!(settings.deletion.delay_hours, 24);
        assert!(settings.schedule.scheduled_upload_enabled);
        assert!(!settings.processing.skip_video_encoding);
        assert!(settings.streamers.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let settings: Settings = toml::from_str(
            r#"
            [paths]
            processing_folder = "/data/processing"
            upload_folder = "/data/upload"

            [processing]
            skip_video_encoding = true
            min_file_size_mb = 100

            [schedule]
            process_after_stream_end = true

            [upload]
            backend = "biliup_cli"
            line = "ws"

            [upload.meta]
            title = "直播录像 {time}"
            tid = 171

            [[streamers]]
            name = "洞主"
            room_id = "251783"
            "#,
        )
        .unwrap();

        assert!(settings.processing.skip_video_encoding);
        assert_eq!(settings.processing.min_file_size_mb, 100);
        assert_eq!(settings.upload.backend, UploadBackendKind::BiliupCli);
        assert_eq!(settings.upload.meta.tid, 171);
        assert_eq!(settings.streamers.len(), 1);
        assert_eq!(settings.streamers[0].room_id, "251783");
    }

    #[test]
    fn streamer_without_room_id_is_rejected() {
        let settings: Settings = toml::from_str(
            r#"
            [[streamers]]
            name = "x"
            room_id = ""
            "#,
        )
        .unwrap();
        assert!(settings.validate().is_err());
    }
}
