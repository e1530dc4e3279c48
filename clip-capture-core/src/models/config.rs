use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::CaptureError;
use crate::storage::avi_writer::{clip_size_bound, MAX_AVI_BYTES};
use super::media::{AudioFormat, VideoFormat};

pub const MIN_RETENTION_SECS: u32 = 5;
pub const MAX_RETENTION_SECS: u32 = 60;
pub const DEFAULT_RETENTION_SECS: u32 = 15;

/// Largest accepted capture size (8K UHD).
pub const MAX_WIDTH: u32 = 7680;
pub const MAX_HEIGHT: u32 = 4320;
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// How much history the rolling buffer keeps, in whole seconds (5..=60).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionWindow(u32);

impl RetentionWindow {
    pub fn new(secs: u32) -> Result<Self, CaptureError> {
        if !(MIN_RETENTION_SECS..=MAX_RETENTION_SECS).contains(&secs) {
            return Err(CaptureError::ConfigurationFailed(format!(
                "retention must be between {} and {} seconds, got {}",
                MIN_RETENTION_SECS, MAX_RETENTION_SECS, secs
            )));
        }
        Ok(Self(secs))
    }

    pub fn secs(&self) -> u32 {
        self.0
    }

    /// Buffer capacity in frames at the given cadence.
    pub fn frame_capacity(&self, fps: u32) -> usize {
        self.0 as usize * fps as usize
    }
}

impl Default for RetentionWindow {
    fn default() -> Self {
        Self(DEFAULT_RETENTION_SECS)
    }
}

/// Output container for exported clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipContainer {
    /// RIFF AVI with raw BGR video and PCM audio, written in-process.
    Avi,
    /// H.264/AAC MP4 produced by piping frames into ffmpeg.
    Mp4,
}

impl ClipContainer {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Avi => "avi",
            Self::Mp4 => "mp4",
        }
    }
}

/// Configuration for a recorder session.
///
/// Every field has a default, so a JSON config file only needs the keys it
/// wants to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub video: VideoFormat,
    pub audio: AudioFormat,

    /// Initial retention window in seconds (5..=60).
    pub retention_secs: u32,

    /// Directory clips are written to; created on first export.
    pub output_directory: PathBuf,

    /// File name prefix, followed by a local timestamp.
    pub file_prefix: String,

    pub container: ClipContainer,

    pub enable_microphone: bool,
    pub enable_system_audio: bool,

    /// Write a `.metadata.json` sidecar next to each clip.
    pub write_metadata: bool,

    /// ffmpeg executable used for the MP4 container.
    pub ffmpeg_path: PathBuf,
}

impl RecorderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.video.width == 0 || self.video.height == 0 {
            return Err("video resolution must be non-zero".into());
        }
        if self.video.width % 2 != 0 || self.video.height % 2 != 0 {
            return Err(format!(
                "video resolution must be even, got {}x{}",
                self.video.width, self.video.height
            ));
        }
        if self.video.width > MAX_WIDTH || self.video.height > MAX_HEIGHT {
            return Err(format!(
                "video resolution exceeds maximum supported ({}x{}), got {}x{}",
                MAX_WIDTH, MAX_HEIGHT, self.video.width, self.video.height
            ));
        }
        if !(1..=60).contains(&self.video.fps) {
            return Err(format!("fps must be between 1 and 60, got {}", self.video.fps));
        }
        if !(1..=MAX_SAMPLE_RATE).contains(&self.audio.sample_rate) {
            return Err(format!(
                "sample rate must be between 1 and {} Hz, got {}",
                MAX_SAMPLE_RATE, self.audio.sample_rate
            ));
        }
        if ![1, 2].contains(&self.audio.channels) {
            return Err(format!("unsupported channel count: {}", self.audio.channels));
        }
        if self.audio.bit_depth != 16 {
            return Err(format!("unsupported bit depth: {}", self.audio.bit_depth));
        }
        if self.file_prefix.trim().is_empty() {
            return Err("file prefix must not be empty".into());
        }
        let retention = RetentionWindow::new(self.retention_secs).map_err(|e| e.to_string())?;
        if self.container == ClipContainer::Avi {
            self.check_avi_size(retention)?;
        }
        Ok(())
    }

    /// A full buffer must fit in one AVI file, or exports of it would fail.
    fn check_avi_size(&self, retention: RetentionWindow) -> Result<(), String> {
        let frames = retention.frame_capacity(self.video.fps);
        let audio = self.audio_enabled().then_some(&self.audio);
        let bytes = clip_size_bound(&self.video, audio, frames);
        if bytes > MAX_AVI_BYTES {
            return Err(format!(
                "a {} s clip at {}x{} @ {} fps needs {:.1} GiB, over the 4 GiB AVI limit; \
                 use the mp4 container or lower the resolution, frame rate or retention",
                retention.secs(),
                self.video.width,
                self.video.height,
                self.video.fps,
                bytes as f64 / (1u64 << 30) as f64
            ));
        }
        Ok(())
    }

    pub fn retention(&self) -> Result<RetentionWindow, CaptureError> {
        RetentionWindow::new(self.retention_secs)
    }

    pub fn audio_enabled(&self) -> bool {
        self.enable_microphone || self.enable_system_audio
    }

    /// Load a config from a JSON file. Missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, CaptureError> {
        let json = fs::read_to_string(path).map_err(|e| {
            CaptureError::ConfigurationFailed(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|e| {
            CaptureError::ConfigurationFailed(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        Ok(config)
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            video: VideoFormat::default(),
            audio: AudioFormat::default(),
            retention_secs: DEFAULT_RETENTION_SECS,
            output_directory: PathBuf::from("recordings"),
            file_prefix: "clip".into(),
            container: ClipContainer::Avi,
            enable_microphone: false,
            enable_system_audio: false,
            write_metadata: true,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}
