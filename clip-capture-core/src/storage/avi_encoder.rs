use std::path::Path;

use super::avi_writer::{clip_size_bound, AviWriter, MAX_AVI_BYTES};
use super::wav_format::sample_pcm;
use crate::models::error::ExportError;
use crate::models::snapshot::ClipSnapshot;
use crate::traits::clip_encoder::ClipEncoder;

/// In-process encoder producing uncompressed AVI (BGR24 video, PCM audio).
///
/// Each frame is followed by its tick's audio block, so the two streams
/// interleave one-to-one and stay aligned by index.
#[derive(Debug, Default, Clone, Copy)]
pub struct AviEncoder;

impl ClipEncoder for AviEncoder {
    fn encode(&self, snapshot: &ClipSnapshot, path: &Path) -> Result<usize, ExportError> {
        let bytes = clip_size_bound(&snapshot.video, snapshot.audio.as_ref(), snapshot.frame_count());
        if bytes > MAX_AVI_BYTES {
            return Err(ExportError::EncoderInitFailed(format!(
                "{} frames at {}x{} need {} bytes, over the 4 GiB AVI limit",
                snapshot.frame_count(),
                snapshot.video.width,
                snapshot.video.height,
                bytes
            )));
        }
        let mut writer = AviWriter::create(path, snapshot.video, snapshot.audio)?;
        for sample in &snapshot.samples {
            writer.write_frame(&sample.frame)?;
            if let Some(audio) = &snapshot.audio {
                writer.write_audio(&sample_pcm(sample, audio, snapshot.video.fps))?;
            }
        }
        Ok(writer.finish()? as usize)
    }

    fn name(&self) -> &'static str {
        "avi"
    }
}
