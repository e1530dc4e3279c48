use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::ClipContainer;
use super::error::ExportError;
use super::media::{AudioFormat, AudioTrackType, VideoFormat};

/// Returned when a clip has been written and finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportResult {
    pub file_path: PathBuf,
    pub frame_count: usize,
    pub duration_secs: f64,
    pub checksum: String,
    pub metadata: ClipMetadata,
}

/// Outcome of one export job, as delivered to the UI.
pub type ExportOutcome = Result<ExportResult, ExportError>;

/// Audio track description stored in clip metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrackInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    /// Devices mixed into the single track.
    pub sources: Vec<AudioTrackType>,
}

impl AudioTrackInfo {
    pub fn new(format: &AudioFormat, sources: Vec<AudioTrackType>) -> Self {
        Self {
            sample_rate: format.sample_rate,
            channels: format.channels,
            bit_depth: format.bit_depth,
            sources,
        }
    }
}

/// Sidecar metadata written next to an exported clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipMetadata {
    pub id: String,
    pub created_at: String,
    pub file_path: String,
    pub container: ClipContainer,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frame_count: usize,
    pub duration_secs: f64,
    pub checksum: String,
    pub audio: Option<AudioTrackInfo>,
}

impl ClipMetadata {
    pub fn new(
        file_path: &str,
        container: ClipContainer,
        video: &VideoFormat,
        frame_count: usize,
        checksum: &str,
        audio: Option<AudioTrackInfo>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            file_path: file_path.to_string(),
            container,
            width: video.width,
            height: video.height,
            fps: video.fps,
            frame_count,
            duration_secs: frame_count as f64 / video.fps.max(1) as f64,
            checksum: checksum.to_string(),
            audio,
        }
    }
}
