use std::time::Duration;

use crate::models::error::CaptureError;
use crate::models::media::{AudioBlock, AudioDevice, AudioFormat, AudioTrackType};

/// A microphone or system-loopback capture device.
///
/// Implemented by:
/// - `CpalAudioSource::microphone` / `CpalAudioSource::system_loopback`
///   (clip-capture-desktop)
/// - test fakes in `test_support`
///
/// `open` and `close` are called by the session on the control thread,
/// `read` only from the capture thread.
pub trait AudioSource: Send {
    fn track_type(&self) -> AudioTrackType;

    /// Start delivering audio converted to `format`.
    ///
    /// Fails with `DeviceUnavailable` if the device cannot be opened.
    fn open(&mut self, format: &AudioFormat) -> Result<(), CaptureError>;

    /// Return one block covering `block_duration` of audio
    /// (`AudioFormat::frames_for(block_duration)` frames), waiting up to
    /// `block_duration` for the device and padding with silence if it
    /// under-delivers.
    fn read(&mut self, block_duration: Duration) -> Result<AudioBlock, CaptureError>;

    /// Release the device. Safe to call when not open.
    fn close(&mut self);

    fn device_info(&self) -> AudioDevice;
}
