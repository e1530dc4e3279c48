//! Screen capture via xcap.

use clip_capture_core::models::error::CaptureError;
use clip_capture_core::models::media::{Frame, VideoFormat, BYTES_PER_PIXEL};
use clip_capture_core::traits::frame_source::FrameSource;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use xcap::Monitor;

/// Which monitor to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSelection {
    Primary,
    /// Position in `xcap::Monitor::all()`.
    Index(usize),
}

/// Captures a whole monitor and scales it to the session resolution.
///
/// The monitor is looked up again on every capture, so a display that is
/// unplugged or rearranged surfaces as `CaptureUnavailable` on the next tick.
pub struct ScreenFrameSource {
    selection: MonitorSelection,
    filter: FilterType,
}

impl ScreenFrameSource {
    pub fn primary() -> Self {
        Self::new(MonitorSelection::Primary)
    }

    pub fn monitor(index: usize) -> Self {
        Self::new(MonitorSelection::Index(index))
    }

    pub fn new(selection: MonitorSelection) -> Self {
        Self {
            selection,
            filter: FilterType::Lanczos3,
        }
    }

    fn find_monitor(&self) -> Result<Monitor, CaptureError> {
        let monitors = Monitor::all()
            .map_err(|e| CaptureError::CaptureUnavailable(format!("failed to list monitors: {}", e)))?;
        let found = match self.selection {
            MonitorSelection::Primary => {
                let mut monitors = monitors;
                let primary = monitors.iter().position(|m| m.is_primary()).unwrap_or(0);
                (primary < monitors.len()).then(|| monitors.swap_remove(primary))
            }
            MonitorSelection::Index(index) => monitors.into_iter().nth(index),
        };
        found.ok_or_else(|| CaptureError::CaptureUnavailable(format!("monitor {:?} not found", self.selection)))
    }
}

impl FrameSource for ScreenFrameSource {
    fn capture(&mut self, format: &VideoFormat) -> Result<Frame, CaptureError> {
        let monitor = self.find_monitor()?;
        let captured = monitor
            .capture_image()
            .map_err(|e| CaptureError::CaptureUnavailable(format!("screen capture failed: {}", e)))?;

        // Rebuild from raw bytes so the frame pipeline only depends on our own
        // `image` version.
        let (width, height) = (captured.width(), captured.height());
        let rgba = RgbaImage::from_raw(width, height, captured.into_raw()).ok_or_else(|| {
            CaptureError::CaptureUnavailable(format!("capture buffer does not match {}x{}", width, height))
        })?;

        let scaled = if rgba.dimensions() == (format.width, format.height) {
            rgba
        } else {
            imageops::resize(&rgba, format.width, format.height, self.filter)
        };
        frame_from_rgba(&scaled)
    }

    fn describe(&self) -> String {
        match self.selection {
            MonitorSelection::Primary => "primary monitor".into(),
            MonitorSelection::Index(i) => format!("monitor {}", i),
        }
    }
}

/// Repack RGBA pixels as BGR24, dropping alpha.
pub fn frame_from_rgba(image: &RgbaImage) -> Result<Frame, CaptureError> {
    let mut data = Vec::with_capacity(image.width() as usize * image.height() as usize * BYTES_PER_PIXEL);
    for pixel in image.pixels() {
        let [r, g, b, _] = pixel.0;
        data.extend_from_slice(&[b, g, r]);
    }
    Frame::new(image.width(), image.height(), data)
}
