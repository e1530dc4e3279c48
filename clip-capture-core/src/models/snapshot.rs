use super::media::{AudioFormat, AudioTrackType, ClipSample, VideoFormat};

/// Point-in-time, immutable copy of the rolling buffer, oldest sample first.
///
/// Exporters only ever see this type, never the live buffer, so an export can
/// run while capture keeps pushing.
#[derive(Debug, Clone)]
pub struct ClipSnapshot {
    pub samples: Vec<ClipSample>,
    pub video: VideoFormat,
    /// Present when the retained samples carry audio.
    pub audio: Option<AudioFormat>,
    /// Devices mixed into the audio track.
    pub audio_sources: Vec<AudioTrackType>,
}

impl ClipSnapshot {
    pub fn new(samples: Vec<ClipSample>, video: VideoFormat, audio: Option<AudioFormat>) -> Self {
        let audio = audio.filter(|_| samples.iter().any(|s| s.audio.is_some()));
        Self {
            samples,
            video,
            audio,
            audio_sources: Vec::new(),
        }
    }

    pub fn with_audio_sources(mut self, sources: Vec<AudioTrackType>) -> Self {
        if self.audio.is_some() {
            self.audio_sources = sources;
        }
        self
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length at the session frame rate.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.video.fps.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::media::{AudioBlock, Frame};

    fn sample(with_audio: bool) -> ClipSample {
        let audio = AudioFormat::default();
        ClipSample::new(
            Frame::filled(2, 2, [0, 0, 0]),
            with_audio.then(|| AudioBlock::silent(&audio, 4)),
        )
    }

    #[test]
    fn duration_follows_frame_rate() {
        let samples = (0..45).map(|_| sample(false)).collect();
        let snapshot = ClipSnapshot::new(samples, VideoFormat::new(2, 2, 15), None);
        assert_eq!(snapshot.frame_count(), 45);
        assert!((snapshot.duration_secs() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn audio_format_dropped_when_no_sample_has_audio() {
        let samples = vec![sample(false), sample(false)];
        let snapshot = ClipSnapshot::new(samples, VideoFormat::new(2, 2, 15), Some(AudioFormat::default()));
        assert!(snapshot.audio.is_none());

        let samples = vec![sample(false), sample(true)];
        let snapshot = ClipSnapshot::new(samples, VideoFormat::new(2, 2, 15), Some(AudioFormat::default()));
        assert_eq!(snapshot.audio, Some(AudioFormat::default()));
    }

    #[test]
    fn empty_snapshot() {
        let snapshot = ClipSnapshot::new(Vec::new(), VideoFormat::default(), None);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.duration_secs(), 0.0);
    }
}
