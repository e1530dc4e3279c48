//! Deterministic sources, encoders and delegates for session tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::error::{CaptureError, ExportError};
use crate::models::export_result::ExportOutcome;
use crate::models::media::{AudioBlock, AudioDevice, AudioFormat, AudioTrackType, Frame, VideoFormat};
use crate::models::snapshot::ClipSnapshot;
use crate::models::state::CaptureState;
use crate::traits::audio_source::AudioSource;
use crate::traits::clip_delegate::{ClipDelegate, RecorderEvent};
use crate::traits::clip_encoder::ClipEncoder;
use crate::traits::frame_source::FrameSource;

/// Frame number stamped into the first pixel by [`CountingFrameSource`].
pub fn frame_label(frame: &Frame) -> u32 {
    u32::from_le_bytes([frame.data[0], frame.data[1], frame.data[2], 0])
}

/// Produces frames labelled 1, 2, 3, ... in their first pixel.
pub struct CountingFrameSource {
    captured: Arc<AtomicU64>,
    fail_after: Option<u64>,
}

impl CountingFrameSource {
    pub fn new() -> Self {
        Self {
            captured: Arc::new(AtomicU64::new(0)),
            fail_after: None,
        }
    }

    /// Number of successful captures so far, shared with the source.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.captured)
    }
}

impl FrameSource for CountingFrameSource {
    fn capture(&mut self, format: &VideoFormat) -> Result<Frame, CaptureError> {
        let captured = self.captured.load(Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| captured >= limit) {
            return Err(CaptureError::CaptureUnavailable("display disconnected".into()));
        }
        let label = (captured + 1) as u32;
        let bytes = label.to_le_bytes();
        let mut frame = Frame::filled(format.width, format.height, [0, 0, 0]);
        frame.data[..3].copy_from_slice(&bytes[..3]);
        self.captured.store(captured + 1, Ordering::SeqCst);
        Ok(frame)
    }

    fn describe(&self) -> String {
        "counting test source".into()
    }
}

/// A display that disappears after a fixed number of frames.
pub struct FailingFrameSource;

impl FailingFrameSource {
    pub fn after(frames: u64) -> CountingFrameSource {
        CountingFrameSource {
            captured: Arc::new(AtomicU64::new(0)),
            fail_after: Some(frames),
        }
    }
}

/// Constant-level audio that answers immediately.
pub struct ToneAudioSource {
    track: AudioTrackType,
    level: f32,
    format: Option<AudioFormat>,
    open: Arc<AtomicBool>,
}

impl ToneAudioSource {
    pub fn new(track: AudioTrackType, level: f32) -> Self {
        Self {
            track,
            level,
            format: None,
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the session currently has this source open.
    pub fn open_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.open)
    }
}

impl AudioSource for ToneAudioSource {
    fn track_type(&self) -> AudioTrackType {
        self.track
    }

    fn open(&mut self, format: &AudioFormat) -> Result<(), CaptureError> {
        self.format = Some(*format);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, block_duration: Duration) -> Result<AudioBlock, CaptureError> {
        let format = self
            .format
            .filter(|_| self.open.load(Ordering::SeqCst))
            .ok_or_else(|| CaptureError::DeviceUnavailable("tone source is not open".into()))?;
        let frames = format.frames_for(block_duration);
        Ok(AudioBlock {
            samples: vec![self.level; frames * format.channels as usize],
            channels: format.channels,
            sample_rate: format.sample_rate,
        })
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn device_info(&self) -> AudioDevice {
        AudioDevice {
            id: "tone".into(),
            name: "Test tone".into(),
            source_type: self.track,
            is_default: true,
        }
    }
}

/// An audio device that cannot be opened, or that dies mid-session.
pub struct FailingAudioSource {
    track: AudioTrackType,
    fail_on_open: bool,
    reads_before_failure: u64,
    reads: u64,
}

impl FailingAudioSource {
    pub fn on_open(track: AudioTrackType) -> Self {
        Self {
            track,
            fail_on_open: true,
            reads_before_failure: 0,
            reads: 0,
        }
    }

    pub fn after_reads(track: AudioTrackType, reads: u64) -> Self {
        Self {
            track,
            fail_on_open: false,
            reads_before_failure: reads,
            reads: 0,
        }
    }
}

impl AudioSource for FailingAudioSource {
    fn track_type(&self) -> AudioTrackType {
        self.track
    }

    fn open(&mut self, _format: &AudioFormat) -> Result<(), CaptureError> {
        if self.fail_on_open {
            return Err(CaptureError::DeviceUnavailable("no such device".into()));
        }
        Ok(())
    }

    fn read(&mut self, _block_duration: Duration) -> Result<AudioBlock, CaptureError> {
        if self.reads >= self.reads_before_failure {
            return Err(CaptureError::DeviceUnavailable("device unplugged".into()));
        }
        self.reads += 1;
        Ok(AudioBlock::silent(&AudioFormat::default(), 16))
    }

    fn close(&mut self) {}

    fn device_info(&self) -> AudioDevice {
        AudioDevice {
            id: "failing".into(),
            name: "Failing device".into(),
            source_type: self.track,
            is_default: false,
        }
    }
}

/// Leaves a few bytes behind, then fails like a full disk.
pub struct BrokenEncoder;

impl ClipEncoder for BrokenEncoder {
    fn encode(&self, _snapshot: &ClipSnapshot, path: &Path) -> Result<usize, ExportError> {
        std::fs::write(path, b"RIFF").map_err(|e| ExportError::WriteFailed(e.to_string()))?;
        Err(ExportError::WriteFailed("no space left on device".into()))
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

/// Records every notification for later assertions.
#[derive(Default)]
pub struct CollectingDelegate {
    events: Mutex<Vec<RecorderEvent>>,
}

impl CollectingDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RecorderEvent> {
        self.events.lock().clone()
    }

    pub fn states(&self) -> Vec<CaptureState> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RecorderEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<CaptureError> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RecorderEvent::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn exports(&self) -> Vec<ExportOutcome> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RecorderEvent::ExportFinished(outcome) => Some(outcome.clone()),
                _ => None,
            })
            .collect()
    }

    /// Poll until `done` holds or `timeout` passes. Returns whether it held.
    pub fn wait_until(&self, timeout: Duration, done: impl Fn(&[RecorderEvent]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.events.lock()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl ClipDelegate for CollectingDelegate {
    fn on_state_changed(&self, state: &CaptureState) {
        self.events.lock().push(RecorderEvent::StateChanged(*state));
    }

    fn on_error(&self, error: &CaptureError) {
        self.events.lock().push(RecorderEvent::Error(error.clone()));
    }

    fn on_export_finished(&self, outcome: &ExportOutcome) {
        self.events.lock().push(RecorderEvent::ExportFinished(outcome.clone()));
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
