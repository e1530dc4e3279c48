//! Microphone and system-audio capture via cpal.
//!
//! Each open source owns a dedicated thread that builds the cpal stream,
//! keeps it alive, and drops it on close. Device callbacks convert whatever
//! the endpoint delivers to the session format with a [`StreamResampler`]
//! that carries its phase across callbacks, and push the result into a
//! [`SampleQueue`]; the capture loop pulls fixed blocks from the queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clip_capture_core::models::error::CaptureError;
use clip_capture_core::models::media::{AudioBlock, AudioDevice, AudioFormat, AudioTrackType};
use clip_capture_core::processing::sample_queue::SampleQueue;
use clip_capture_core::processing::stereo_mixer::StreamResampler;
use clip_capture_core::traits::audio_source::AudioSource;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};

use crate::devices;

/// How long `open` waits for the stream thread to report.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Seconds of audio the queue holds before dropping the oldest samples.
const QUEUE_SECONDS: usize = 2;

/// A cpal capture endpoint.
///
/// `system_loopback` opens an input stream on an output device, which WASAPI
/// serves as loopback capture. Hosts without loopback support fail `open`
/// with `DeviceUnavailable`; on PulseAudio/PipeWire pick the sink's monitor
/// with `microphone_named` instead.
pub struct CpalAudioSource {
    track: AudioTrackType,
    device_name: Option<String>,
    format: Option<AudioFormat>,
    queue: Option<Arc<SampleQueue>>,
    running: Arc<AtomicBool>,
    stream_handle: Option<JoinHandle<()>>,
    opened: Option<AudioDevice>,
}

impl CpalAudioSource {
    /// The host's default input device.
    pub fn microphone() -> Self {
        Self::new(AudioTrackType::Mic, None)
    }

    pub fn microphone_named(name: impl Into<String>) -> Self {
        Self::new(AudioTrackType::Mic, Some(name.into()))
    }

    /// Loopback capture of the host's default output device.
    pub fn system_loopback() -> Self {
        Self::new(AudioTrackType::System, None)
    }

    pub fn system_loopback_named(name: impl Into<String>) -> Self {
        Self::new(AudioTrackType::System, Some(name.into()))
    }

    fn new(track: AudioTrackType, device_name: Option<String>) -> Self {
        Self {
            track,
            device_name,
            format: None,
            queue: None,
            running: Arc::new(AtomicBool::new(false)),
            stream_handle: None,
            opened: None,
        }
    }
}

impl AudioSource for CpalAudioSource {
    fn track_type(&self) -> AudioTrackType {
        self.track
    }

    fn open(&mut self, format: &AudioFormat) -> Result<(), CaptureError> {
        self.close();

        let queue = Arc::new(SampleQueue::new(
            format.sample_rate as usize * format.channels as usize * QUEUE_SECONDS,
        ));
        self.running.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = mpsc::channel();
        let running = Arc::clone(&self.running);
        let stream_queue = Arc::clone(&queue);
        let track = self.track;
        let device_name = self.device_name.clone();
        let target = *format;

        let handle = thread::Builder::new()
            .name(format!("cpal-{}-capture", track_label(track)))
            .spawn(move || stream_thread(track, device_name, target, stream_queue, running, ready_tx))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CaptureError::Unknown(format!("failed to spawn audio thread: {}", e))
            })?;
        self.stream_handle = Some(handle);

        let opened = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err(CaptureError::DeviceUnavailable(format!(
                "{} device did not start within {:?}",
                track_label(self.track),
                OPEN_TIMEOUT
            ))),
        };
        match opened {
            Ok(device) => {
                log::info!("Opened {} '{}'", track_label(self.track), device.name);
                self.opened = Some(device);
                self.format = Some(*format);
                self.queue = Some(queue);
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn read(&mut self, block_duration: Duration) -> Result<AudioBlock, CaptureError> {
        let (Some(format), Some(queue)) = (self.format, self.queue.as_ref()) else {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} device is not open",
                track_label(self.track)
            )));
        };
        let len = format.frames_for(block_duration) * format.channels as usize;
        let samples = queue.pop_block(len, block_duration).map_err(CaptureError::DeviceUnavailable)?;
        Ok(AudioBlock {
            samples,
            channels: format.channels,
            sample_rate: format.sample_rate,
        })
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.stream_handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::error!("{} stream thread panicked", track_label(self.track));
            }
        }
        if let Some(queue) = self.queue.take() {
            let dropped = queue.dropped();
            if dropped > 0 {
                log::warn!("{} capture dropped {} samples", track_label(self.track), dropped);
            }
        }
        self.format = None;
    }

    fn device_info(&self) -> AudioDevice {
        if let Some(ref device) = self.opened {
            return device.clone();
        }
        let name = self.device_name.clone().unwrap_or_else(|| match self.track {
            AudioTrackType::Mic => "Default Microphone".into(),
            AudioTrackType::System => "Default Output (loopback)".into(),
        });
        let mut device = devices::describe(self.track, name, None);
        device.is_default = self.device_name.is_none();
        device
    }
}

impl Drop for CpalAudioSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn track_label(track: AudioTrackType) -> &'static str {
    match track {
        AudioTrackType::Mic => "microphone",
        AudioTrackType::System => "system-audio",
    }
}

/// Owns the cpal stream for its whole life. Streams are not `Send` on every
/// host, so they never leave this thread.
fn stream_thread(
    track: AudioTrackType,
    device_name: Option<String>,
    target: AudioFormat,
    queue: Arc<SampleQueue>,
    running: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<AudioDevice, CaptureError>>,
) {
    let stream = match build_stream(track, device_name.as_deref(), target, Arc::clone(&queue)) {
        Ok((stream, device)) => {
            let _ = ready.send(Ok(device));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while running.load(Ordering::SeqCst) {
        thread::park_timeout(Duration::from_millis(100));
    }

    if let Err(e) = stream.pause() {
        log::debug!("pausing {} stream failed: {}", track_label(track), e);
    }
    drop(stream);
    log::debug!("{} stream closed", track_label(track));
}

fn build_stream(
    track: AudioTrackType,
    device_name: Option<&str>,
    target: AudioFormat,
    queue: Arc<SampleQueue>,
) -> Result<(cpal::Stream, AudioDevice), CaptureError> {
    let device = devices::find_endpoint(track, device_name)?;
    let name = device.name().unwrap_or_else(|_| "unknown".into());

    let supported = match track {
        AudioTrackType::Mic => device.default_input_config(),
        AudioTrackType::System => device.default_output_config(),
    }
    .map_err(|e| CaptureError::DeviceUnavailable(format!("'{}' has no usable config: {}", name, e)))?;

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    log::debug!(
        "'{}' native format: {} Hz, {} ch, {:?}",
        name,
        config.sample_rate.0,
        config.channels,
        sample_format
    );

    let stream = match sample_format {
        SampleFormat::F32 => input_stream::<f32>(&device, &config, target, queue),
        SampleFormat::I16 => input_stream::<i16>(&device, &config, target, queue),
        SampleFormat::U16 => input_stream::<u16>(&device, &config, target, queue),
        SampleFormat::I32 => input_stream::<i32>(&device, &config, target, queue),
        other => {
            return Err(CaptureError::DeviceUnavailable(format!(
                "'{}' uses unsupported sample format {:?}",
                name, other
            )))
        }
    }
    .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to open '{}': {}", name, e)))?;

    stream
        .play()
        .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to start '{}': {}", name, e)))?;

    let mut info = devices::describe(track, name, None);
    info.is_default = device_name.is_none();
    Ok((stream, info))
}

fn input_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    target: AudioFormat,
    queue: Arc<SampleQueue>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut resampler = StreamResampler::new(config.sample_rate.0, target);
    let source_channels = config.channels;
    let error_queue = Arc::clone(&queue);

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let samples = to_f32(data);
            queue.push(&resampler.process(&samples, source_channels));
        },
        move |err| {
            log::error!("audio stream error: {}", err);
            error_queue.fail(format!("audio stream failed: {}", err));
        },
        None,
    )
}

fn to_f32<T>(data: &[T]) -> Vec<f32>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    data.iter().map(|&s| s.to_sample::<f32>()).collect()
}
