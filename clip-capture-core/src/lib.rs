//! # clip-capture-core
//!
//! Platform-agnostic instant-replay core.
//!
//! Keeps the last N seconds of the screen (and optionally microphone and
//! system audio) in a bounded in-memory history and writes that history to a
//! video file on demand. Platform backends implement `FrameSource` and
//! `AudioSource` and plug into the generic `ClipSession`.
//!
//! ## Architecture
//!
//! ```text
//! clip-capture-core (this crate)
//! ├── traits/       ← FrameSource, AudioSource, ClipEncoder, ClipDelegate
//! ├── models/       ← CaptureError, ExportError, CaptureState, RecorderConfig, Frame, ClipSnapshot, etc.
//! ├── processing/   ← RollingBuffer, SampleQueue, StereoMixer
//! ├── session/      ← CaptureLoop, ClipSession, ClipRecorder (command channel)
//! └── storage/      ← Exporter, AVI writer/inspector, ffmpeg MP4 encoder, WAV, metadata
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

#[cfg(test)]
mod test_support;

// Re-export key types at crate root for convenience.
pub use models::config::{ClipContainer, RecorderConfig, RetentionWindow};
pub use models::error::{CaptureError, ExportError};
pub use models::export_result::{AudioTrackInfo, ClipMetadata, ExportOutcome, ExportResult};
pub use models::media::{
    AudioBlock, AudioDevice, AudioFormat, AudioLevels, AudioTrackType, ClipSample, Frame, VideoFormat,
};
pub use models::snapshot::ClipSnapshot;
pub use models::state::CaptureState;
pub use processing::rolling_buffer::RollingBuffer;
pub use processing::sample_queue::SampleQueue;
pub use processing::stereo_mixer::{StereoMixer, StreamResampler};
pub use session::clip_session::ClipSession;
pub use session::recorder::{ClipRecorder, RecorderCommand, RecorderStatus};
pub use storage::avi_encoder::AviEncoder;
pub use storage::avi_writer::{inspect as inspect_avi, AviInfo};
pub use storage::exporter::Exporter;
pub use storage::ffmpeg_encoder::FfmpegEncoder;
pub use traits::audio_source::AudioSource;
pub use traits::clip_delegate::{ChannelDelegate, ClipDelegate, RecorderEvent};
pub use traits::clip_encoder::ClipEncoder;
pub use traits::frame_source::FrameSource;
