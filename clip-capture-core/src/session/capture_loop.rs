use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::error::CaptureError;
use crate::models::media::{AudioBlock, AudioFormat, AudioLevels, ClipSample, VideoFormat};
use crate::models::state::CaptureState;
use crate::processing::rolling_buffer::RollingBuffer;
use crate::processing::stereo_mixer::StereoMixer;
use crate::traits::audio_source::AudioSource;
use crate::traits::clip_delegate::ClipDelegate;
use crate::traits::frame_source::FrameSource;

/// Devices driven by the capture thread.
///
/// The capture thread holds this lock for its whole run, so the session can
/// only touch the sources (open/close audio) while capture is idle.
pub struct CaptureSources {
    pub frame: Box<dyn FrameSource>,
    pub microphone: Option<Box<dyn AudioSource>>,
    pub system_audio: Option<Box<dyn AudioSource>>,
}

/// Everything one run of the capture thread needs.
pub struct LoopContext {
    pub sources: Arc<Mutex<CaptureSources>>,
    pub buffer: Arc<Mutex<RollingBuffer<ClipSample>>>,
    pub video: VideoFormat,
    /// Session audio format, `None` for video-only.
    pub audio: Option<AudioFormat>,
    pub use_microphone: bool,
    pub use_system_audio: bool,
    pub delegate: Option<Arc<dyn ClipDelegate>>,
}

/// State shared between the control side and the capture thread.
struct Shared {
    state: Mutex<CaptureState>,
    running: AtomicBool,
    frames_captured: AtomicU64,
    levels: Mutex<AudioLevels>,
}

/// Drives the sources at the target frame rate on a dedicated thread.
///
/// `idle → running → stopping → idle`; a source error ends the run
/// immediately (`running → idle`) and is reported through the delegate.
pub struct CaptureLoop {
    shared: Arc<Shared>,
    delegate: Option<Arc<dyn ClipDelegate>>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureLoop {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CaptureState::Idle),
                running: AtomicBool::new(false),
                frames_captured: AtomicU64::new(0),
                levels: Mutex::new(AudioLevels::default()),
            }),
            delegate: None,
            handle: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.shared.state.lock()
    }

    /// Frames pushed since the last `start`.
    pub fn frames_captured(&self) -> u64 {
        self.shared.frames_captured.load(Ordering::SeqCst)
    }

    /// Levels of the most recent audio block.
    pub fn levels(&self) -> AudioLevels {
        *self.shared.levels.lock()
    }

    /// Spawn the capture thread. Idle → Running.
    pub fn start(&mut self, context: LoopContext) -> Result<(), CaptureError> {
        self.reap();
        {
            let mut state = self.shared.state.lock();
            if !state.is_idle() {
                return Err(CaptureError::InvalidState(format!(
                    "cannot start capture while {}",
                    state.label()
                )));
            }
            *state = CaptureState::Running;
        }

        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.frames_captured.store(0, Ordering::SeqCst);
        *self.shared.levels.lock() = AudioLevels::default();
        self.delegate = context.delegate.clone();
        // Announce before spawning: a source that fails on its first tick
        // reports Idle from the capture thread.
        self.notify(CaptureState::Running);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("clip-capture".into())
            .spawn(move || run(&shared, context));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                *self.shared.state.lock() = CaptureState::Idle;
                self.notify(CaptureState::Idle);
                Err(CaptureError::Unknown(format!("failed to spawn capture thread: {}", e)))
            }
        }
    }

    /// Signal the thread and block until it has exited. Running → Stopping → Idle.
    ///
    /// Nothing is pushed into the buffer after this returns. Safe to call
    /// when idle, including after a fail-stop.
    pub fn stop(&mut self) {
        let was_running = {
            let mut state = self.shared.state.lock();
            if state.is_running() {
                *state = CaptureState::Stopping;
                true
            } else {
                false
            }
        };
        if was_running {
            self.notify(CaptureState::Stopping);
        }

        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::error!("capture thread panicked");
            }
        }

        if was_running {
            *self.shared.state.lock() = CaptureState::Idle;
            self.notify(CaptureState::Idle);
        }
    }

    /// Join a thread that already ended on its own (fail-stop).
    pub fn reap(&mut self) {
        if self.handle.as_ref().is_some_and(|h| h.is_finished()) {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn notify(&self, state: CaptureState) {
        if let Some(ref delegate) = self.delegate {
            delegate.on_state_changed(&state);
        }
    }
}

impl Default for CaptureLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: &Shared, context: LoopContext) {
    let interval = context.video.frame_interval();
    let mixer = context.audio.map(StereoMixer::new);
    let mut sources = context.sources.lock();
    log::info!(
        "capture started: {} at {}x{} {} fps",
        sources.frame.describe(),
        context.video.width,
        context.video.height,
        context.video.fps
    );

    while shared.running.load(Ordering::SeqCst) {
        let tick_start = Instant::now();

        let sample = match capture_tick(&mut sources, &context, mixer.as_ref(), interval) {
            Ok(sample) => sample,
            Err(e) => {
                fail_stop(shared, &context, &mut sources, e);
                return;
            }
        };
        if let Some(ref audio) = sample.audio {
            *shared.levels.lock() = StereoMixer::levels(audio);
        }
        context.buffer.lock().push(sample);
        shared.frames_captured.fetch_add(1, Ordering::SeqCst);

        sleep_until(shared, tick_start + interval);
    }

    log::info!(
        "capture stopped after {} frames",
        shared.frames_captured.load(Ordering::SeqCst)
    );
}

/// One frame plus, when audio is on, the audio covering the same tick.
fn capture_tick(
    sources: &mut CaptureSources,
    context: &LoopContext,
    mixer: Option<&StereoMixer>,
    interval: Duration,
) -> Result<ClipSample, CaptureError> {
    let frame = sources.frame.capture(&context.video)?;
    if !frame.matches(&context.video) {
        return Err(CaptureError::CaptureUnavailable(format!(
            "source produced {}x{}, expected {}x{}",
            frame.width, frame.height, context.video.width, context.video.height
        )));
    }

    let Some(mixer) = mixer else {
        return Ok(ClipSample::new(frame, None));
    };

    let microphone = read_block(sources.microphone.as_deref_mut(), context.use_microphone, interval)?;
    let system = read_block(sources.system_audio.as_deref_mut(), context.use_system_audio, interval)?;
    let audio = match (microphone, system) {
        (Some(mic), Some(system)) => Some(mixer.combine(&mic, &system)),
        (Some(single), None) | (None, Some(single)) => Some(AudioBlock {
            samples: mixer.conform(&single.samples, single.sample_rate, single.channels),
            channels: mixer.target.channels,
            sample_rate: mixer.target.sample_rate,
        }),
        (None, None) => None,
    };
    Ok(ClipSample::new(frame, audio))
}

fn read_block(
    source: Option<&mut (dyn AudioSource + 'static)>,
    enabled: bool,
    interval: Duration,
) -> Result<Option<AudioBlock>, CaptureError> {
    match source {
        Some(source) if enabled => source.read(interval).map(Some),
        _ => Ok(None),
    }
}

/// Sleep toward `deadline`, waking early if `stop` unparks the thread.
fn sleep_until(shared: &Shared, deadline: Instant) {
    loop {
        if !shared.running.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::park_timeout(deadline - now);
    }
}

fn fail_stop(shared: &Shared, context: &LoopContext, sources: &mut CaptureSources, error: CaptureError) {
    log::error!(
        "capture failed after {} frames, stopping: {}",
        shared.frames_captured.load(Ordering::SeqCst),
        error
    );
    shared.running.store(false, Ordering::SeqCst);

    if let Some(source) = sources.microphone.as_mut() {
        source.close();
    }
    if let Some(source) = sources.system_audio.as_mut() {
        source.close();
    }

    let reverted = {
        let mut state = shared.state.lock();
        let was_running = state.is_running();
        *state = CaptureState::Idle;
        was_running
    };

    if let Some(ref delegate) = context.delegate {
        delegate.on_error(&error);
        if reverted {
            delegate.on_state_changed(&CaptureState::Idle);
        }
    }
}
