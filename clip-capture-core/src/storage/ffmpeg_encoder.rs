/// MP4 export by piping raw frames into an external ffmpeg process.
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use super::wav_format::write_wav;
use crate::models::error::ExportError;
use crate::models::snapshot::ClipSnapshot;
use crate::traits::clip_encoder::ClipEncoder;

/// H.264/AAC encoder backed by the `ffmpeg` executable.
///
/// Audio is first written to a temporary WAV next to the output, then muxed
/// by ffmpeg while BGR24 frames stream in over stdin.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Build the ffmpeg argument list for `snapshot`.
    pub fn to_ffmpeg_args(&self, snapshot: &ClipSnapshot, audio_track: Option<&Path>, output: &Path) -> Vec<String> {
        let video = &snapshot.video;
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "bgr24".into(),
            "-s".into(),
            format!("{}x{}", video.width, video.height),
            "-r".into(),
            video.fps.to_string(),
            "-i".into(),
            "pipe:0".into(),
        ];
        if let Some(track) = audio_track {
            args.extend(["-i".into(), track.display().to_string()]);
        }
        args.extend([
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "veryfast".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ]);
        if audio_track.is_some() {
            args.extend(["-c:a".into(), "aac".into(), "-b:a".into(), "160k".into()]);
        }
        args.extend(["-f".into(), "mp4".into(), output.display().to_string()]);
        args
    }

    fn run(&self, snapshot: &ClipSnapshot, audio_track: Option<&Path>, path: &Path) -> Result<usize, ExportError> {
        let args = self.to_ffmpeg_args(snapshot, audio_track, path);
        log::debug!("spawning {} {}", self.ffmpeg_path.display(), args.join(" "));

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ExportError::EncoderInitFailed(format!("failed to spawn {}: {}", self.ffmpeg_path.display(), e))
            })?;

        // Drain stderr so a chatty ffmpeg never blocks on a full pipe.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut output = String::new();
                let _ = stderr.read_to_string(&mut output);
                output
            })
        });

        let mut written = 0usize;
        let mut pipe_error = None;
        if let Some(mut stdin) = child.stdin.take() {
            for sample in &snapshot.samples {
                if let Err(e) = stdin.write_all(&sample.frame.data) {
                    pipe_error = Some(e);
                    break;
                }
                written += 1;
            }
            // dropping stdin signals EOF
        }

        let status = child
            .wait()
            .map_err(|e| ExportError::WriteFailed(format!("failed to wait for ffmpeg: {}", e)))?;
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(ExportError::WriteFailed(format!(
                "ffmpeg exited with {}: {}",
                status,
                stderr.trim()
            )));
        }
        if let Some(e) = pipe_error {
            return Err(ExportError::WriteFailed(format!("failed to pipe frames to ffmpeg: {}", e)));
        }
        Ok(written)
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl ClipEncoder for FfmpegEncoder {
    fn encode(&self, snapshot: &ClipSnapshot, path: &Path) -> Result<usize, ExportError> {
        let audio_track = match &snapshot.audio {
            Some(format) => {
                let track = path.with_extension("audio.wav");
                if let Err(e) = write_wav(&track, format, &snapshot.samples, snapshot.video.fps) {
                    let _ = std::fs::remove_file(&track);
                    return Err(e);
                }
                Some(track)
            }
            None => None,
        };

        let result = self.run(snapshot, audio_track.as_deref(), path);

        if let Some(track) = audio_track {
            if let Err(e) = std::fs::remove_file(&track) {
                log::warn!("failed to remove temporary audio track {}: {}", track.display(), e);
            }
        }
        result
    }

    fn name(&self) -> &'static str {
        "ffmpeg-mp4"
    }
}
