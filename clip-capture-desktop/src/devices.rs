//! Monitor and audio endpoint enumeration.

use clip_capture_core::models::error::CaptureError;
use clip_capture_core::models::media::{AudioDevice, AudioTrackType};
use cpal::traits::{DeviceTrait, HostTrait};
use xcap::Monitor;

/// A display that `ScreenFrameSource::monitor` can capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorInfo {
    /// Position in the list, as accepted by `ScreenFrameSource::monitor`.
    pub index: usize,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub is_primary: bool,
}

pub fn list_monitors() -> Result<Vec<MonitorInfo>, CaptureError> {
    let monitors = Monitor::all()
        .map_err(|e| CaptureError::CaptureUnavailable(format!("failed to list monitors: {}", e)))?;
    Ok(monitors
        .iter()
        .enumerate()
        .map(|(index, m)| MonitorInfo {
            index,
            name: m.name().to_string(),
            width: m.width(),
            height: m.height(),
            is_primary: m.is_primary(),
        })
        .collect())
}

/// Capture endpoints (microphones, and on some hosts monitor sources).
pub fn list_input_devices() -> Result<Vec<AudioDevice>, CaptureError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to enumerate input devices: {}", e)))?;
    Ok(describe_all(devices, AudioTrackType::Mic, default_name.as_deref()))
}

/// Render endpoints, which are the loopback sources for system audio.
pub fn list_output_devices() -> Result<Vec<AudioDevice>, CaptureError> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let devices = host
        .output_devices()
        .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to enumerate output devices: {}", e)))?;
    Ok(describe_all(devices, AudioTrackType::System, default_name.as_deref()))
}

fn describe_all(
    devices: impl Iterator<Item = cpal::Device>,
    track: AudioTrackType,
    default_name: Option<&str>,
) -> Vec<AudioDevice> {
    devices
        .filter_map(|d| match d.name() {
            Ok(name) => Some(name),
            Err(e) => {
                log::debug!("skipping unnamed {:?} device: {}", track, e);
                None
            }
        })
        .map(|name| describe(track, name, default_name))
        .collect()
}

/// Build an [`AudioDevice`] for a named cpal endpoint.
///
/// cpal exposes no stable device ids, so the id is the track prefix plus the
/// endpoint name.
pub fn describe(track: AudioTrackType, name: String, default_name: Option<&str>) -> AudioDevice {
    let prefix = match track {
        AudioTrackType::Mic => "input",
        AudioTrackType::System => "output",
    };
    AudioDevice {
        id: format!("{}:{}", prefix, name),
        is_default: default_name == Some(name.as_str()),
        name,
        source_type: track,
    }
}

/// Resolve the endpoint for `track`: the named device, or the host default.
pub(crate) fn find_endpoint(track: AudioTrackType, name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    let kind = match track {
        AudioTrackType::Mic => "input",
        AudioTrackType::System => "output",
    };

    let Some(name) = name else {
        let device = match track {
            AudioTrackType::Mic => host.default_input_device(),
            AudioTrackType::System => host.default_output_device(),
        };
        return device.ok_or_else(|| CaptureError::DeviceUnavailable(format!("no default {} device", kind)));
    };

    let devices = match track {
        AudioTrackType::Mic => host.input_devices(),
        AudioTrackType::System => host.output_devices(),
    }
    .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to enumerate {} devices: {}", kind, e)))?;

    devices
        .into_iter()
        .find(|d| d.name().is_ok_and(|n| n == name))
        .ok_or_else(|| CaptureError::DeviceUnavailable(format!("{} device '{}' not found", kind, name)))
}
