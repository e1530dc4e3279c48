use std::path::Path;

use crate::models::error::ExportError;
use crate::models::snapshot::ClipSnapshot;

/// Writes a snapshot to a finished video file.
///
/// Implemented by `AviEncoder` (in-process) and `FfmpegEncoder` (MP4).
pub trait ClipEncoder: Send + Sync {
    /// Encode every sample of `snapshot`, in order, into `path`.
    ///
    /// Returns the number of frames written. `path` may be left partially
    /// written on error; the caller discards it.
    fn encode(&self, snapshot: &ClipSnapshot, path: &Path) -> Result<usize, ExportError>;

    fn name(&self) -> &'static str;
}
