use crate::models::error::CaptureError;
use crate::models::media::{Frame, VideoFormat};

/// Something that can grab the current screen contents.
///
/// Implemented by:
/// - `ScreenFrameSource` (clip-capture-desktop, xcap)
/// - test fakes in `test_support`
///
/// Called only from the capture thread.
pub trait FrameSource: Send {
    /// Capture one full-screen image resized to `format.width` x `format.height`.
    ///
    /// An error means the source is gone (display change, permission
    /// revoked) and ends the capture session.
    fn capture(&mut self, format: &VideoFormat) -> Result<Frame, CaptureError>;

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}
