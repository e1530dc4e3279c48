use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::capture_loop::{CaptureLoop, CaptureSources, LoopContext};
use crate::models::config::{RecorderConfig, RetentionWindow};
use crate::models::error::{CaptureError, ExportError};
use crate::models::export_result::ExportOutcome;
use crate::models::media::{AudioDevice, AudioFormat, AudioLevels, AudioTrackType, ClipSample};
use crate::models::snapshot::ClipSnapshot;
use crate::models::state::CaptureState;
use crate::processing::rolling_buffer::RollingBuffer;
use crate::storage::exporter::Exporter;
use crate::traits::audio_source::AudioSource;
use crate::traits::clip_delegate::ClipDelegate;
use crate::traits::frame_source::FrameSource;

/// One recording session: rolling history of the screen (and optionally
/// audio) plus on-demand export of that history.
///
/// ```text
/// [FrameSource] ──┐
/// [Mic]    ──┐    ├→ [CaptureLoop] → [RollingBuffer] ─snapshot→ [Exporter] → clip
/// [System] ──┴────┘
/// ```
///
/// The capture thread is the only writer of the buffer. Snapshots copy the
/// buffer under its lock (reference-count bumps only), so export never
/// holds up capture beyond that copy.
pub struct ClipSession {
    config: RecorderConfig,
    retention: RetentionWindow,
    use_microphone: bool,
    use_system_audio: bool,
    buffer: Arc<Mutex<RollingBuffer<ClipSample>>>,
    sources: Arc<Mutex<CaptureSources>>,
    capture: CaptureLoop,
    exporter: Arc<Exporter>,
    delegate: Option<Arc<dyn ClipDelegate>>,
    exports: Vec<JoinHandle<()>>,
    devices: Vec<AudioDevice>,
}

impl ClipSession {
    pub fn new(
        config: RecorderConfig,
        frame_source: Box<dyn FrameSource>,
        microphone: Option<Box<dyn AudioSource>>,
        system_audio: Option<Box<dyn AudioSource>>,
    ) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        let retention = config.retention()?;
        let capacity = retention.frame_capacity(config.video.fps);
        let devices = microphone
            .iter()
            .chain(system_audio.iter())
            .map(|source| source.device_info())
            .collect();

        Ok(Self {
            retention,
            use_microphone: config.enable_microphone,
            use_system_audio: config.enable_system_audio,
            buffer: Arc::new(Mutex::new(RollingBuffer::new(capacity))),
            sources: Arc::new(Mutex::new(CaptureSources {
                frame: frame_source,
                microphone,
                system_audio,
            })),
            capture: CaptureLoop::new(),
            exporter: Arc::new(Exporter::from_config(&config)),
            delegate: None,
            exports: Vec::new(),
            devices,
            config,
        })
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn ClipDelegate>) {
        self.delegate = Some(delegate);
    }

    /// Replace the exporter used by later exports.
    pub fn set_exporter(&mut self, exporter: Exporter) {
        self.exporter = Arc::new(exporter);
    }

    pub fn state(&self) -> CaptureState {
        self.capture.state()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn retention(&self) -> RetentionWindow {
        self.retention
    }

    /// `(microphone, system_audio)` as selected for the next start.
    pub fn audio_selection(&self) -> (bool, bool) {
        (self.use_microphone, self.use_system_audio)
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.lock().capacity()
    }

    pub fn audio_levels(&self) -> AudioLevels {
        self.capture.levels()
    }

    /// Audio devices this session was built with, selected or not.
    pub fn audio_devices(&self) -> &[AudioDevice] {
        &self.devices
    }

    /// Open the selected audio devices and start capturing.
    ///
    /// If a selected device is missing or fails to open, the session stays
    /// idle and returns `DeviceUnavailable`; devices already opened are closed.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        self.capture.reap();
        let state = self.capture.state();
        if !state.is_idle() {
            return Err(CaptureError::InvalidState(format!(
                "cannot start capture while {}",
                state.label()
            )));
        }

        self.open_audio()?;

        let audio_enabled = self.use_microphone || self.use_system_audio;
        let context = LoopContext {
            sources: Arc::clone(&self.sources),
            buffer: Arc::clone(&self.buffer),
            video: self.config.video,
            audio: audio_enabled.then_some(self.config.audio),
            use_microphone: self.use_microphone,
            use_system_audio: self.use_system_audio,
            delegate: self.delegate.clone(),
        };
        if let Err(e) = self.capture.start(context) {
            self.close_audio();
            return Err(e);
        }

        log::info!(
            "session started: {}s retention ({} frames), microphone {}, system audio {}",
            self.retention.secs(),
            self.capacity(),
            on_off(self.use_microphone),
            on_off(self.use_system_audio)
        );
        Ok(())
    }

    /// Stop capturing and release audio devices. Buffered frames are kept.
    ///
    /// Blocks until the capture thread has exited.
    pub fn stop(&mut self) {
        self.capture.stop();
        self.close_audio();
    }

    /// Change the retention window. Rejected while capture runs; discards
    /// the buffered history.
    pub fn set_retention(&mut self, secs: u32) -> Result<(), CaptureError> {
        self.ensure_not_running("change retention")?;
        let retention = RetentionWindow::new(secs)?;
        self.check_candidate(RecorderConfig {
            retention_secs: secs,
            ..self.config.clone()
        })?;
        let capacity = retention.frame_capacity(self.config.video.fps);

        self.retention = retention;
        self.config.retention_secs = secs;
        self.buffer.lock().resize(capacity);
        log::info!("retention set to {}s ({} frames), buffer cleared", secs, capacity);
        Ok(())
    }

    fn check_candidate(&self, candidate: RecorderConfig) -> Result<(), CaptureError> {
        candidate.validate().map_err(CaptureError::ConfigurationFailed)
    }

    /// Choose which audio devices the next run records. Rejected while
    /// capture runs; discards the buffered history.
    pub fn set_audio(&mut self, microphone: bool, system_audio: bool) -> Result<(), CaptureError> {
        self.ensure_not_running("change audio sources")?;
        self.check_candidate(RecorderConfig {
            enable_microphone: microphone,
            enable_system_audio: system_audio,
            ..self.config.clone()
        })?;
        self.use_microphone = microphone;
        self.use_system_audio = system_audio;
        self.config.enable_microphone = microphone;
        self.config.enable_system_audio = system_audio;
        self.buffer.lock().clear();
        log::info!(
            "audio set to microphone {}, system audio {}, buffer cleared",
            on_off(microphone),
            on_off(system_audio)
        );
        Ok(())
    }

    /// Immutable copy of the current history, oldest first.
    pub fn snapshot(&self) -> ClipSnapshot {
        let samples = self.buffer.lock().snapshot();
        let audio = (self.use_microphone || self.use_system_audio).then_some(self.config.audio);

        let mut sources = Vec::new();
        if self.use_microphone {
            sources.push(AudioTrackType::Mic);
        }
        if self.use_system_audio {
            sources.push(AudioTrackType::System);
        }
        ClipSnapshot::new(samples, self.config.video, audio).with_audio_sources(sources)
    }

    /// Export the current history on the calling thread.
    pub fn export_now(&self) -> ExportOutcome {
        self.exporter.export_to_directory(&self.snapshot())
    }

    /// Snapshot now, encode on a background thread, and report the outcome
    /// through `ClipDelegate::on_export_finished`.
    pub fn trigger_export(&mut self) {
        self.exports.retain(|handle| !handle.is_finished());

        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            log::warn!("export requested with an empty buffer");
            self.notify_export(&Err(ExportError::EmptyBuffer));
            return;
        }

        let exporter = Arc::clone(&self.exporter);
        let delegate = self.delegate.clone();
        let spawned = thread::Builder::new().name("clip-export".into()).spawn(move || {
            let outcome = exporter.export_to_directory(&snapshot);
            if let Some(delegate) = delegate {
                delegate.on_export_finished(&outcome);
            }
        });

        match spawned {
            Ok(handle) => self.exports.push(handle),
            Err(e) => self.notify_export(&Err(ExportError::EncoderInitFailed(format!(
                "failed to spawn export worker: {}",
                e
            )))),
        }
    }

    /// Block until every triggered export has finished.
    pub fn wait_for_exports(&mut self) {
        for handle in self.exports.drain(..) {
            if handle.join().is_err() {
                log::error!("export worker panicked");
            }
        }
    }

    /// Stop capture and let in-flight exports finish.
    pub fn shutdown(&mut self) {
        self.stop();
        self.wait_for_exports();
    }

    /// Surface a failure that happened outside the capture thread.
    pub fn report_error(&self, error: &CaptureError) {
        log::error!("{}", error);
        if let Some(ref delegate) = self.delegate {
            delegate.on_error(error);
        }
    }

    fn notify_export(&self, outcome: &ExportOutcome) {
        if let Some(ref delegate) = self.delegate {
            delegate.on_export_finished(outcome);
        }
    }

    fn ensure_not_running(&self, action: &str) -> Result<(), CaptureError> {
        let state = self.capture.state();
        if state.is_idle() {
            Ok(())
        } else {
            Err(CaptureError::InvalidState(format!(
                "cannot {} while capture is {}; stop it first",
                action,
                state.label()
            )))
        }
    }

    fn open_audio(&mut self) -> Result<(), CaptureError> {
        let format = self.config.audio;
        let mut sources = self.sources.lock();

        if self.use_microphone {
            open_device(sources.microphone.as_deref_mut(), "microphone", &format)?;
        }
        if self.use_system_audio {
            if let Err(e) = open_device(sources.system_audio.as_deref_mut(), "system audio", &format) {
                if let Some(mic) = sources.microphone.as_mut() {
                    mic.close();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn close_audio(&mut self) {
        let mut sources = self.sources.lock();
        if let Some(source) = sources.microphone.as_mut() {
            source.close();
        }
        if let Some(source) = sources.system_audio.as_mut() {
            source.close();
        }
    }
}

impl Drop for ClipSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_device(
    source: Option<&mut (dyn AudioSource + 'static)>,
    label: &str,
    format: &AudioFormat,
) -> Result<(), CaptureError> {
    let source = source.ok_or_else(|| CaptureError::DeviceUnavailable(format!("no {} device available", label)))?;
    source.open(format).map_err(|e| match e {
        CaptureError::DeviceUnavailable(_) => e,
        other => CaptureError::DeviceUnavailable(format!("{}: {}", label, other)),
    })?;
    log::info!("opened {}: {}", label, source.device_info().name);
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::models::config::ClipContainer;
    use crate::models::media::VideoFormat;
    use crate::storage::avi_writer::inspect;
    use crate::storage::avi_encoder::AviEncoder;
    use crate::test_support::{
        frame_label, wait_for, BrokenEncoder, CollectingDelegate, CountingFrameSource, FailingAudioSource,
        FailingFrameSource, ToneAudioSource,
    };
    use crate::traits::clip_delegate::RecorderEvent;

    const WAIT: Duration = Duration::from_secs(5);

    fn config(dir: &Path, fps: u32) -> RecorderConfig {
        RecorderConfig {
            video: VideoFormat::new(8, 6, fps),
            output_directory: dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn video_session(dir: &Path, fps: u32) -> (ClipSession, Arc<std::sync::atomic::AtomicU64>) {
        let source = CountingFrameSource::new();
        let counter = source.counter();
        let session = ClipSession::new(config(dir, fps), Box::new(source), None, None).unwrap();
        (session, counter)
    }

    #[test]
    fn retention_that_overflows_an_avi_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = RecorderConfig {
            video: VideoFormat::new(1920, 1080, 15),
            retention_secs: 30,
            output_directory: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mut session = ClipSession::new(config, Box::new(CountingFrameSource::new()), None, None).unwrap();

        let err = session.set_retention(60).unwrap_err();

        assert!(matches!(err, CaptureError::ConfigurationFailed(ref m) if m.contains("mp4")));
        assert_eq!(session.retention().secs(), 30);
        assert_eq!(session.capacity(), 450);
        assert_eq!(session.config().retention_secs, 30);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = config(dir.path(), 15);
        bad.retention_secs = 2;
        let err = ClipSession::new(bad, Box::new(CountingFrameSource::new()), None, None)
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::ConfigurationFailed(_)));
    }

    #[test]
    fn lists_the_devices_it_was_built_with() {
        let dir = tempfile::tempdir().unwrap();
        let session = ClipSession::new(
            config(dir.path(), 15),
            Box::new(CountingFrameSource::new()),
            Some(Box::new(ToneAudioSource::new(AudioTrackType::Mic, 0.1))),
            None,
        )
        .unwrap();
        let devices = session.audio_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].source_type, AudioTrackType::Mic);
        assert_eq!(session.audio_selection(), (false, false));
    }

    #[test]
    fn capacity_follows_retention_and_fps() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = video_session(dir.path(), 15);
        assert_eq!(session.capacity(), 225);

        session.set_retention(30).unwrap();
        session.set_retention(10).unwrap();
        assert_eq!(session.capacity(), 150);
        assert_eq!(session.buffered_frames(), 0);
        assert_eq!(session.retention().secs(), 10);
    }

    #[test]
    fn set_retention_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = video_session(dir.path(), 15);
        assert!(matches!(
            session.set_retention(61),
            Err(CaptureError::ConfigurationFailed(_))
        ));
        assert_eq!(session.capacity(), 225);
    }

    #[test]
    fn changes_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = video_session(dir.path(), 30);
        session.start().unwrap();

        assert!(matches!(session.set_retention(10), Err(CaptureError::InvalidState(_))));
        assert!(matches!(session.set_audio(true, false), Err(CaptureError::InvalidState(_))));
        assert!(matches!(session.start(), Err(CaptureError::InvalidState(_))));

        session.stop();
        assert!(session.set_retention(10).is_ok());
    }

    #[test]
    fn resize_after_capture_discards_history() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, counter) = video_session(dir.path(), 60);
        session.start().unwrap();
        assert!(wait_for(WAIT, || counter.load(Ordering::SeqCst) >= 10));
        session.stop();
        assert!(session.buffered_frames() >= 10);

        session.set_retention(20).unwrap();
        assert_eq!(session.buffered_frames(), 0);
        assert_eq!(session.capacity(), 1200);
    }

    #[test]
    fn stop_then_export_keeps_every_buffered_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, counter) = video_session(dir.path(), 60);
        session.start().unwrap();
        assert!(wait_for(WAIT, || counter.load(Ordering::SeqCst) >= 80));
        session.stop();

        let buffered = session.buffered_frames();
        assert!(buffered >= 80);
        assert_eq!(buffered as u64, counter.load(Ordering::SeqCst));

        let result = session.export_now().unwrap();
        assert_eq!(result.frame_count, buffered);

        let info = inspect(&result.file_path).unwrap();
        assert_eq!(info.video_chunks as usize, buffered);
        assert_eq!(info.total_frames as usize, buffered);
        let expected = buffered as f64 / 60.0;
        assert!((info.duration_secs() - expected).abs() <= 1.0 / 60.0);
    }

    #[test]
    fn snapshot_while_capturing_is_ordered_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, counter) = video_session(dir.path(), 60);
        session.start().unwrap();

        let mut last_len = 0;
        for _ in 0..20 {
            let snapshot = session.snapshot();
            assert!(snapshot.frame_count() <= session.capacity());
            let labels: Vec<u32> = snapshot.samples.iter().map(|s| frame_label(&s.frame)).collect();
            assert!(labels.windows(2).all(|w| w[1] == w[0] + 1));
            assert!(snapshot.frame_count() >= last_len);
            last_len = snapshot.frame_count();
            std::thread::sleep(Duration::from_millis(10));
        }
        session.stop();
        assert!(counter.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn empty_export_is_distinct_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("clips");
        let session = ClipSession::new(config(&out, 15), Box::new(CountingFrameSource::new()), None, None).unwrap();

        assert_eq!(session.export_now().unwrap_err(), ExportError::EmptyBuffer);
        assert!(!out.exists());
    }

    #[test]
    fn trigger_export_reports_once() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, counter) = video_session(dir.path(), 60);
        let delegate = CollectingDelegate::new();
        session.set_delegate(delegate.clone());

        session.start().unwrap();
        assert!(wait_for(WAIT, || counter.load(Ordering::SeqCst) >= 5));
        session.trigger_export();
        session.wait_for_exports();
        session.stop();

        let exports = delegate.exports();
        assert_eq!(exports.len(), 1);
        let result = exports[0].as_ref().unwrap();
        assert!(result.file_path.exists());
        assert!(result.frame_count >= 5);
    }

    #[test]
    fn trigger_export_on_empty_buffer_reports_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = video_session(dir.path(), 15);
        let delegate = CollectingDelegate::new();
        session.set_delegate(delegate.clone());

        session.trigger_export();

        assert_eq!(delegate.exports(), vec![Err(ExportError::EmptyBuffer)]);
    }

    #[test]
    fn failed_export_leaves_buffer_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, counter) = video_session(dir.path(), 60);
        session.set_exporter(Exporter::new(Arc::new(BrokenEncoder), ClipContainer::Avi, dir.path(), "clip"));

        session.start().unwrap();
        assert!(wait_for(WAIT, || counter.load(Ordering::SeqCst) >= 10));
        session.stop();
        let buffered = session.buffered_frames();

        assert!(matches!(session.export_now(), Err(ExportError::WriteFailed(_))));
        assert_eq!(session.buffered_frames(), buffered);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        session.set_exporter(Exporter::new(Arc::new(AviEncoder), ClipContainer::Avi, dir.path(), "clip"));
        let retry = session.export_now().unwrap();
        assert_eq!(retry.frame_count, buffered);
    }

    #[test]
    fn source_failure_stops_session_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let mut session =
            ClipSession::new(config(dir.path(), 60), Box::new(FailingFrameSource::after(4)), None, None).unwrap();
        let delegate = CollectingDelegate::new();
        session.set_delegate(delegate.clone());

        session.start().unwrap();
        assert!(delegate.wait_until(WAIT, |events| {
            events
                .iter()
                .any(|e| matches!(e, RecorderEvent::StateChanged(CaptureState::Idle)))
        }));

        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(session.buffered_frames(), 4);
        assert!(matches!(
            delegate.errors().as_slice(),
            [CaptureError::CaptureUnavailable(_)]
        ));
        // frames captured before the failure are still exportable
        assert_eq!(session.export_now().unwrap().frame_count, 4);
    }

    #[test]
    fn missing_microphone_aborts_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 15);
        cfg.enable_microphone = true;
        let mut session = ClipSession::new(cfg, Box::new(CountingFrameSource::new()), None, None).unwrap();

        assert!(matches!(session.start(), Err(CaptureError::DeviceUnavailable(_))));
        assert_eq!(session.state(), CaptureState::Idle);
    }

    #[test]
    fn failing_system_audio_closes_opened_microphone() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 15);
        cfg.enable_microphone = true;
        cfg.enable_system_audio = true;
        let mic = ToneAudioSource::new(AudioTrackType::Mic, 0.1);
        let mic_open = mic.open_flag();
        let mut session = ClipSession::new(
            cfg,
            Box::new(CountingFrameSource::new()),
            Some(Box::new(mic)),
            Some(Box::new(FailingAudioSource::on_open(AudioTrackType::System))),
        )
        .unwrap();

        assert!(matches!(session.start(), Err(CaptureError::DeviceUnavailable(_))));
        assert_eq!(session.state(), CaptureState::Idle);
        assert!(!mic_open.load(Ordering::SeqCst));

        // video-only still works
        session.set_audio(false, false).unwrap();
        session.start().unwrap();
        session.stop();
    }

    #[test]
    fn mixed_audio_is_exported_alongside_video() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 30);
        cfg.enable_microphone = true;
        cfg.enable_system_audio = true;
        let mic = ToneAudioSource::new(AudioTrackType::Mic, 0.2);
        let mic_open = mic.open_flag();
        let source = CountingFrameSource::new();
        let counter = source.counter();
        let mut session = ClipSession::new(
            cfg,
            Box::new(source),
            Some(Box::new(mic)),
            Some(Box::new(ToneAudioSource::new(AudioTrackType::System, 0.3))),
        )
        .unwrap();

        session.start().unwrap();
        assert!(mic_open.load(Ordering::SeqCst));
        assert!(wait_for(WAIT, || counter.load(Ordering::SeqCst) >= 6));
        session.stop();
        assert!(!mic_open.load(Ordering::SeqCst));

        let levels = session.audio_levels();
        assert!((levels.peak - 0.5).abs() < 1e-3);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.audio_sources, vec![AudioTrackType::Mic, AudioTrackType::System]);

        let result = session.export_now().unwrap();
        let info = inspect(&result.file_path).unwrap();
        let format = AudioFormat::default();
        assert_eq!(info.streams, 2);
        assert_eq!(
            info.audio_bytes,
            (result.frame_count * format.samples_per_block(30) * 2) as u64
        );
        assert_eq!(result.metadata.audio.unwrap().sources.len(), 2);
    }

    #[test]
    fn drop_stops_capture() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, counter) = video_session(dir.path(), 60);
        session.start().unwrap();
        assert!(wait_for(WAIT, || counter.load(Ordering::SeqCst) >= 2));
        drop(session);

        let after_drop = counter.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), after_drop);
    }
}
