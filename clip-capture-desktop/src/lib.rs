//! # clip-capture-desktop
//!
//! Desktop capture backends for clip-capture-core.
//!
//! Provides:
//! - `ScreenFrameSource` — full-monitor capture via `xcap`, Lanczos3 resize via `image`
//! - `CpalAudioSource` — microphone capture and system-audio loopback via `cpal`
//! - `devices` — monitor and audio endpoint listing
//!
//! ## Usage
//! ```ignore
//! use clip_capture_core::{ClipSession, RecorderConfig};
//! use clip_capture_desktop::{CpalAudioSource, ScreenFrameSource};
//!
//! let screen = ScreenFrameSource::primary();
//! let mic = CpalAudioSource::microphone();
//! let session = ClipSession::new(RecorderConfig::default(), Box::new(screen), Some(Box::new(mic)), None)?;
//! ```

pub mod audio;
pub mod devices;
pub mod screen;

pub use audio::CpalAudioSource;
pub use devices::{list_input_devices, list_monitors, list_output_devices, MonitorInfo};
pub use screen::ScreenFrameSource;
