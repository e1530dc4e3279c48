use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Bytes per pixel of the frame pixel format (packed BGR, 8 bits per channel).
pub const BYTES_PER_PIXEL: usize = 3;

/// Fixed output resolution and cadence for a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    /// Target time between two captured frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    /// Size in bytes of one tightly packed BGR24 frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 15,
        }
    }
}

/// PCM layout used for every audio block in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Bit depth of the exported PCM track. Blocks are held as f32 in memory.
    pub bit_depth: u16,
}

impl AudioFormat {
    /// Audio frames captured per video tick, so block `i` lines up with frame `i`.
    pub fn frames_per_block(&self, fps: u32) -> usize {
        (self.sample_rate as f64 / fps.max(1) as f64).round() as usize
    }

    /// Audio frames covering `duration`, rounded to the nearest frame.
    pub fn frames_for(&self, duration: Duration) -> usize {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as usize
    }

    /// Interleaved sample count of one block.
    pub fn samples_per_block(&self, fps: u32) -> usize {
        self.frames_per_block(fps) * self.channels as usize
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bit_depth / 8
    }

    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            bit_depth: 16,
        }
    }
}

/// One captured screen image, already resized to the session resolution.
///
/// Pixels are packed BGR24, rows top-down with no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, CaptureError> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(CaptureError::CaptureUnavailable(format!(
                "frame buffer is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self { width, height, data })
    }

    /// A frame filled with a single BGR colour.
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * BYTES_PER_PIXEL);
        for _ in 0..pixels {
            data.extend_from_slice(&bgr);
        }
        Self { width, height, data }
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.width as usize * BYTES_PER_PIXEL;
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    pub fn matches(&self, format: &VideoFormat) -> bool {
        self.width == format.width && self.height == format.height
    }
}

/// A fixed-size chunk of interleaved f32 PCM covering one video tick.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioBlock {
    pub fn silent(format: &AudioFormat, frames: usize) -> Self {
        Self {
            samples: vec![0.0; frames * format.channels as usize],
            channels: format.channels,
            sample_rate: format.sample_rate,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Loudness of the most recent audio block, for level meters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioLevels {
    pub rms: f32,
    pub peak: f32,
}

/// Which capture device an audio track came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioTrackType {
    Mic,
    System,
}

/// An audio endpoint available for capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub id: String,
    pub name: String,
    pub source_type: AudioTrackType,
    pub is_default: bool,
}

/// What one capture tick stores in the rolling buffer.
///
/// The frame and its audio are evicted together, which keeps frame index and
/// block index aligned for the whole retained history. Payloads are behind
/// `Arc` so taking a snapshot only bumps reference counts.
#[derive(Debug, Clone)]
pub struct ClipSample {
    pub frame: Arc<Frame>,
    pub audio: Option<Arc<AudioBlock>>,
}

impl ClipSample {
    pub fn new(frame: Frame, audio: Option<AudioBlock>) -> Self {
        Self {
            frame: Arc::new(frame),
            audio: audio.map(Arc::new),
        }
    }
}
