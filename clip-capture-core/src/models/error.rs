use thiserror::Error;

/// Errors raised while configuring or running a capture session.
///
/// Source failures (`CaptureUnavailable`, `DeviceUnavailable`) are fail-stop:
/// the capture loop halts and the session returns to idle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("screen capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Errors raised while writing a clip to disk.
///
/// None of these touch the live buffer, so a failed export can be retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    #[error("nothing to export: the clip buffer is empty")]
    EmptyBuffer,

    #[error("encoder initialization failed: {0}")]
    EncoderInitFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),
}
