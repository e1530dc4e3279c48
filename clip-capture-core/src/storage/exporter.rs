use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};

use super::avi_encoder::AviEncoder;
use super::ffmpeg_encoder::FfmpegEncoder;
use super::metadata::write_metadata;
use crate::models::config::{ClipContainer, RecorderConfig};
use crate::models::error::ExportError;
use crate::models::export_result::{AudioTrackInfo, ClipMetadata, ExportOutcome, ExportResult};
use crate::models::snapshot::ClipSnapshot;
use crate::traits::clip_encoder::ClipEncoder;

/// Turns a [`ClipSnapshot`] into a finished, checksummed clip on disk.
///
/// Output goes to `<destination>.part` first and is renamed only after the
/// encoder has finalized it, so a file at the destination path is always
/// complete. Any failure removes the partial file.
pub struct Exporter {
    encoder: Arc<dyn ClipEncoder>,
    container: ClipContainer,
    output_directory: PathBuf,
    file_prefix: String,
    write_metadata: bool,
}

impl Exporter {
    pub fn new(
        encoder: Arc<dyn ClipEncoder>,
        container: ClipContainer,
        output_directory: impl Into<PathBuf>,
        file_prefix: impl Into<String>,
    ) -> Self {
        Self {
            encoder,
            container,
            output_directory: output_directory.into(),
            file_prefix: file_prefix.into(),
            write_metadata: true,
        }
    }

    /// Pick the encoder for `config.container`.
    pub fn from_config(config: &RecorderConfig) -> Self {
        let encoder: Arc<dyn ClipEncoder> = match config.container {
            ClipContainer::Avi => Arc::new(AviEncoder),
            ClipContainer::Mp4 => Arc::new(FfmpegEncoder::new(config.ffmpeg_path.clone())),
        };
        Self::new(
            encoder,
            config.container,
            config.output_directory.clone(),
            config.file_prefix.clone(),
        )
        .with_metadata(config.write_metadata)
    }

    pub fn with_metadata(mut self, enabled: bool) -> Self {
        self.write_metadata = enabled;
        self
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn encoder_name(&self) -> &'static str {
        self.encoder.name()
    }

    /// Encode `snapshot` into `destination`.
    ///
    /// An empty snapshot fails with `EmptyBuffer` and touches nothing on disk.
    pub fn export(&self, snapshot: &ClipSnapshot, destination: &Path) -> ExportOutcome {
        if snapshot.is_empty() {
            return Err(ExportError::EmptyBuffer);
        }

        let partial = partial_path(destination);
        log::info!(
            "exporting {} frames ({:.1}s) to {} with {}",
            snapshot.frame_count(),
            snapshot.duration_secs(),
            destination.display(),
            self.encoder.name()
        );

        let finished = self
            .encoder
            .encode(snapshot, &partial)
            .and_then(|frames| Ok((frames, sha256_file(&partial)?)))
            .and_then(|written| {
                fs::rename(&partial, destination)
                    .map_err(|e| ExportError::WriteFailed(format!("failed to finalize clip: {}", e)))?;
                Ok(written)
            });

        let (frame_count, checksum) = match finished {
            Ok(written) => written,
            Err(e) => {
                discard_partial(&partial);
                log::error!("export to {} failed: {}", destination.display(), e);
                return Err(e);
            }
        };

        let audio = snapshot
            .audio
            .as_ref()
            .map(|format| AudioTrackInfo::new(format, snapshot.audio_sources.clone()));
        let metadata = ClipMetadata::new(
            &destination.to_string_lossy(),
            self.container,
            &snapshot.video,
            frame_count,
            &checksum,
            audio,
        );
        if self.write_metadata {
            if let Err(e) = write_metadata(&metadata, destination) {
                log::warn!("clip saved but metadata sidecar failed: {}", e);
            }
        }

        log::info!("exported {} frames to {}", frame_count, destination.display());
        Ok(ExportResult {
            file_path: destination.to_path_buf(),
            frame_count,
            duration_secs: frame_count as f64 / snapshot.video.fps.max(1) as f64,
            checksum,
            metadata,
        })
    }

    /// Export into the output directory under a fresh timestamped name.
    pub fn export_to_directory(&self, snapshot: &ClipSnapshot) -> ExportOutcome {
        if snapshot.is_empty() {
            return Err(ExportError::EmptyBuffer);
        }
        fs::create_dir_all(&self.output_directory).map_err(|e| {
            ExportError::EncoderInitFailed(format!(
                "failed to create output directory {}: {}",
                self.output_directory.display(),
                e
            ))
        })?;

        // Claim the name by creating its partial file, so concurrent exports
        // in the same second end up with distinct suffixes.
        let now = Local::now();
        let destination = loop {
            let candidate = self.clip_path(now);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(partial_path(&candidate))
            {
                Ok(_) => break candidate,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(ExportError::EncoderInitFailed(format!(
                        "failed to create {}: {}",
                        candidate.display(),
                        e
                    )))
                }
            }
        };
        self.export(snapshot, &destination)
    }

    /// `<dir>/<prefix>_YYYYMMDD_HHMMSS.<ext>`, with `_2`, `_3`, ... appended
    /// while that name (or its partial file) already exists.
    pub fn clip_path(&self, at: DateTime<Local>) -> PathBuf {
        let stem = format!("{}_{}", self.file_prefix, at.format("%Y%m%d_%H%M%S"));
        let extension = self.container.extension();

        let mut candidate = self.output_directory.join(format!("{}.{}", stem, extension));
        let mut suffix = 2;
        while candidate.exists() || partial_path(&candidate).exists() {
            candidate = self
                .output_directory
                .join(format!("{}_{}.{}", stem, suffix, extension));
            suffix += 1;
        }
        candidate
    }
}

/// `clip.avi` → `clip.avi.part`
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

fn discard_partial(partial: &Path) {
    match fs::remove_file(partial) {
        Ok(()) => log::info!("removed partial file {}", partial.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("failed to remove partial file {}: {}", partial.display(), e),
    }
}

/// SHA-256 hex digest of a file, streamed in 64 KiB reads.
pub fn sha256_file(path: &Path) -> Result<String, ExportError> {
    let read_failed = |e: io::Error| ExportError::WriteFailed(format!("failed to read file for checksum: {}", e));
    let mut file = File::open(path).map_err(read_failed)?;
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut chunk).map_err(read_failed)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
