use std::fs;
use std::path::{Path, PathBuf};

use crate::models::error::ExportError;
use crate::models::export_result::ClipMetadata;

/// `clip_20250101_120000.avi` → `clip_20250101_120000.metadata.json`
pub fn metadata_path(clip_path: &Path) -> PathBuf {
    clip_path.with_extension("metadata.json")
}

/// Write clip metadata as a JSON sidecar file next to the clip.
pub fn write_metadata(metadata: &ClipMetadata, clip_path: &Path) -> Result<PathBuf, ExportError> {
    let path = metadata_path(clip_path);
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| ExportError::WriteFailed(format!("failed to serialize metadata: {}", e)))?;
    fs::write(&path, json).map_err(|e| ExportError::WriteFailed(format!("failed to write metadata: {}", e)))?;
    Ok(path)
}

/// Read clip metadata from its JSON sidecar file.
pub fn read_metadata(clip_path: &Path) -> Result<ClipMetadata, ExportError> {
    let json = fs::read_to_string(metadata_path(clip_path))
        .map_err(|e| ExportError::WriteFailed(format!("failed to read metadata: {}", e)))?;
    serde_json::from_str(&json).map_err(|e| ExportError::WriteFailed(format!("failed to parse metadata: {}", e)))
}
