/// WAV file format utilities and per-sample PCM layout.
///
/// The MP4 path hands the clip's audio to ffmpeg as a standalone WAV file;
/// the AVI path embeds the same PCM chunks directly.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::models::error::ExportError;
use crate::models::media::{AudioFormat, ClipSample};
use crate::processing::stereo_mixer::StereoMixer;

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Generate a 44-byte WAV RIFF header.
///
/// Format: PCM (format code 1), little-endian.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (PCM format chunk size)
/// [20-21]  1 (PCM format code)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * channels * bit_depth / 8
/// [32-33]  block_align = channels * bit_depth / 8
/// [34-35]  bit_depth
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: &AudioFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let mut header = [0u8; WAV_HEADER_SIZE];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&(36 + data_size).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.bytes_per_second().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&format.bit_depth.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// 16-bit PCM for one buffered sample, exactly one block long.
///
/// Samples captured without audio (or with a short block) are filled with
/// silence so block `i` always covers the duration of frame `i`.
pub fn sample_pcm(sample: &ClipSample, format: &AudioFormat, fps: u32) -> Vec<u8> {
    let len = format.samples_per_block(fps);
    let mut samples = sample
        .audio
        .as_ref()
        .map(|block| block.samples.clone())
        .unwrap_or_default();
    samples.resize(len, 0.0);
    StereoMixer::convert_to_int16_pcm(&samples)
}

/// Write the audio track of `samples` to a standalone WAV file.
pub fn write_wav(path: &Path, format: &AudioFormat, samples: &[ClipSample], fps: u32) -> Result<u64, ExportError> {
    let block_bytes = format.samples_per_block(fps) * 2;
    let data_size = u32::try_from(block_bytes * samples.len())
        .map_err(|_| ExportError::WriteFailed("audio track exceeds 4 GiB".into()))?;

    let file = File::create(path)
        .map_err(|e| ExportError::EncoderInitFailed(format!("failed to create {}: {}", path.display(), e)))?;
    let mut writer = BufWriter::new(file);
    let write_failed = |e: std::io::Error| ExportError::WriteFailed(format!("failed to write audio track: {}", e));

    writer.write_all(&generate_wav_header(format, data_size)).map_err(write_failed)?;
    for sample in samples {
        writer.write_all(&sample_pcm(sample, format, fps)).map_err(write_failed)?;
    }
    writer.flush().map_err(write_failed)?;
    Ok(WAV_HEADER_SIZE as u64 + data_size as u64)
}
