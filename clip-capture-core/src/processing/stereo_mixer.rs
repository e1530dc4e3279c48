use crate::models::media::{AudioBlock, AudioFormat, AudioLevels};

/// Pure-math audio conversion and mixing toward one session format.
///
/// Microphone and system audio end up in a single track:
/// for stereo output `L = mic + system_L`, `R = mic + system_R` with the mic
/// downmixed to mono and centred; for mono output the two are summed.
/// Out-of-range sums are clamped when converting to PCM.
#[derive(Debug, Clone)]
pub struct StereoMixer {
    pub target: AudioFormat,
}

impl StereoMixer {
    pub fn new(target: AudioFormat) -> Self {
        Self { target }
    }

    /// Convert a device buffer to the target channel count and sample rate.
    pub fn conform(&self, samples: &[f32], source_rate: u32, source_channels: u16) -> Vec<f32> {
        let remapped = remap_channels(samples, source_channels as usize, self.target.channels as usize);
        self.resample(&remapped, self.target.channels as usize, source_rate)
    }

    /// Linear-interpolation resampling of interleaved audio to the target rate.
    ///
    /// Returns the input unchanged if the rates already match.
    pub fn resample(&self, samples: &[f32], channels: usize, source_rate: u32) -> Vec<f32> {
        if source_rate == self.target.sample_rate || samples.is_empty() || channels == 0 {
            return samples.to_vec();
        }

        let frame_count = samples.len() / channels;
        let ratio = self.target.sample_rate as f64 / source_rate as f64;
        let output_frames = (frame_count as f64 * ratio) as usize;
        let mut output = vec![0.0f32; output_frames * channels];

        for i in 0..output_frames {
            let position = i as f64 / ratio;
            let index = position as usize;
            let fraction = (position - index as f64) as f32;

            for ch in 0..channels {
                output[i * channels + ch] = if index + 1 < frame_count {
                    samples[index * channels + ch] * (1.0 - fraction)
                        + samples[(index + 1) * channels + ch] * fraction
                } else if index < frame_count {
                    samples[index * channels + ch]
                } else {
                    0.0
                };
            }
        }
        output
    }

    /// Mix a microphone block with a system-audio block into one block.
    ///
    /// The longer block sets the length; the shorter one is padded with silence.
    pub fn combine(&self, mic: &AudioBlock, system: &AudioBlock) -> AudioBlock {
        let channels = self.target.channels as usize;
        let frames = mic.frame_count().max(system.frame_count());
        let mic_mono = remap_channels(&mic.samples, mic.channels as usize, 1);
        let system = remap_channels(&system.samples, system.channels as usize, channels);

        let mut samples = vec![0.0f32; frames * channels];
        for frame in 0..frames {
            let voice = mic_mono.get(frame).copied().unwrap_or(0.0);
            for ch in 0..channels {
                let index = frame * channels + ch;
                samples[index] = voice + system.get(index).copied().unwrap_or(0.0);
            }
        }

        AudioBlock {
            samples,
            channels: self.target.channels,
            sample_rate: self.target.sample_rate,
        }
    }

    /// Convert f32 samples in `[-1.0, 1.0]` to 16-bit little-endian PCM.
    ///
    /// Clamps out-of-range values. Output length is `samples.len() * 2` bytes.
    pub fn convert_to_int16_pcm(samples: &[f32]) -> Vec<u8> {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            data.extend_from_slice(&value.to_le_bytes());
        }
        data
    }

    /// RMS of the samples, 0.0..=1.0 for normalized audio.
    pub fn rms_level(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    pub fn peak_level(samples: &[f32]) -> f32 {
        samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
    }

    pub fn levels(block: &AudioBlock) -> AudioLevels {
        AudioLevels {
            rms: Self::rms_level(&block.samples),
            peak: Self::peak_level(&block.samples),
        }
    }
}

/// Re-lay interleaved audio from `from` channels to `to` channels.
///
/// Down to mono averages every channel; mono up-mixes by duplication; other
/// layouts keep the leading channels and fill missing ones from channel 0.
pub fn remap_channels(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let frame_count = samples.len() / from;
    let mut output = Vec::with_capacity(frame_count * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            output.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for ch in 0..to {
                output.push(if ch < from { frame[ch] } else { frame[0] });
            }
        }
    }
    output
}

/// Resampler for a continuous device stream delivered in arbitrary chunks.
///
/// Keeps the read position (exact, in units of `1 / target_rate` source
/// frames) and the last source frame between calls, so chunk boundaries
/// neither drop samples nor restart the interpolation.
#[derive(Debug, Clone)]
pub struct StreamResampler {
    source_rate: u32,
    target: AudioFormat,
    position: u64,
    carry: Vec<f32>,
}

impl StreamResampler {
    pub fn new(source_rate: u32, target: AudioFormat) -> Self {
        Self {
            source_rate,
            target,
            position: 0,
            carry: Vec::new(),
        }
    }

    /// Convert the next chunk of interleaved device audio to the target format.
    pub fn process(&mut self, samples: &[f32], source_channels: u16) -> Vec<f32> {
        let channels = self.target.channels as usize;
        let remapped = remap_channels(samples, source_channels as usize, channels);
        if self.source_rate == self.target.sample_rate || self.source_rate == 0 || channels == 0 {
            return remapped;
        }

        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(&remapped);
        let frames = input.len() / channels;
        if frames == 0 {
            return Vec::new();
        }

        let target_rate = self.target.sample_rate as u64;
        let mut output = Vec::with_capacity((frames * channels) * target_rate as usize / self.source_rate as usize + channels);
        loop {
            let index = (self.position / target_rate) as usize;
            if index + 1 >= frames {
                break;
            }
            let fraction = (self.position % target_rate) as f32 / target_rate as f32;
            let (current, next) = (&input[index * channels..], &input[(index + 1) * channels..]);
            for ch in 0..channels {
                output.push(current[ch] + (next[ch] - current[ch]) * fraction);
            }
            self.position += self.source_rate as u64;
        }

        // rebase onto the frame carried into the next call
        self.position -= (frames as u64 - 1) * target_rate;
        self.carry = input[(frames - 1) * channels..frames * channels].to_vec();
        output
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn stereo_44k() -> AudioFormat {
        AudioFormat {
            sample_rate: 44100,
            channels: 2,
            bit_depth: 16,
        }
    }

    fn block(samples: Vec<f32>, channels: u16) -> AudioBlock {
        AudioBlock {
            samples,
            channels,
            sample_rate: 44100,
        }
    }

    #[test]
    fn combine_centres_mic_over_system_stereo() {
        let mixer = StereoMixer::new(stereo_44k());
        // mic is stereo on the wire; both channels equal so mono == 0.5, 0.3
        let mic = block(vec![0.5, 0.5, 0.3, 0.3], 2);
        let system = block(vec![0.1, 0.2, 0.3, 0.4], 2);

        let mixed = mixer.combine(&mic, &system);

        assert_eq!(mixed.channels, 2);
        assert_eq!(mixed.frame_count(), 2);
        assert_relative_eq!(mixed.samples[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(mixed.samples[1], 0.7, epsilon = 1e-6);
        assert_relative_eq!(mixed.samples[2], 0.6, epsilon = 1e-6);
        assert_relative_eq!(mixed.samples[3], 0.7, epsilon = 1e-6);
    }

    #[test]
    fn combine_pads_shorter_source() {
        let mixer = StereoMixer::new(stereo_44k());
        let mic = block(vec![0.2, 0.2, 0.4, 0.4, 0.1, 0.1], 2);
        let system = block(vec![0.1, 0.1], 2);

        let mixed = mixer.combine(&mic, &system);

        assert_eq!(mixed.frame_count(), 3);
        assert_relative_eq!(mixed.samples[4], 0.1, epsilon = 1e-6);
        assert_relative_eq!(mixed.samples[5], 0.1, epsilon = 1e-6);
    }

    #[test]
    fn combine_mono_sums() {
        let mixer = StereoMixer::new(AudioFormat {
            channels: 1,
            ..stereo_44k()
        });
        let mixed = mixer.combine(&block(vec![0.25, 0.5], 1), &block(vec![0.25, -0.5], 1));
        assert_eq!(mixed.samples, vec![0.5, 0.0]);
    }

    #[test]
    fn remap_downmix_and_upmix() {
        let mono = remap_channels(&[0.2, 0.8, 0.4, 0.6], 2, 1);
        assert_eq!(mono.len(), 2);
        assert_relative_eq!(mono[0], 0.5, epsilon = 1e-6);
        assert_relative_eq!(mono[1], 0.5, epsilon = 1e-6);
        assert_eq!(remap_channels(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
        // 4-channel device into stereo keeps the front pair
        assert_eq!(remap_channels(&[1.0, 2.0, 3.0, 4.0], 4, 2), vec![1.0, 2.0]);
    }

    #[test]
    fn conform_converts_mono_22k_to_stereo_44k() {
        let mixer = StereoMixer::new(stereo_44k());
        let mono: Vec<f32> = vec![0.5; 441];

        let out = mixer.conform(&mono, 22050, 1);

        // 441 frames at 22.05 kHz → 882 frames at 44.1 kHz, stereo
        assert_eq!(out.len(), 882 * 2);
        assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn resample_same_rate_is_passthrough() {
        let mixer = StereoMixer::new(stereo_44k());
        let samples = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(mixer.resample(&samples, 2, 44100), samples);
    }

    #[test]
    fn resample_upsample_interpolates() {
        let mixer = StereoMixer::new(AudioFormat {
            sample_rate: 48000,
            channels: 1,
            bit_depth: 16,
        });
        let out = mixer.resample(&[0.0, 1.0], 1, 24000);
        assert_eq!(out.len(), 4);
        assert_relative_eq!(out[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(out[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn levels_of_square_wave() {
        let levels = StereoMixer::levels(&block(vec![0.5, -0.5, 0.5, -0.5], 2));
        assert_relative_eq!(levels.rms, 0.5, epsilon = 1e-6);
        assert_relative_eq!(levels.peak, 0.5, epsilon = 1e-6);
        assert_eq!(StereoMixer::rms_level(&[]), 0.0);
        assert_relative_eq!(StereoMixer::peak_level(&[0.1, -0.7, 0.3]), 0.7, epsilon = 1e-6);
    }

    #[test]
    fn pcm_conversion_clamps() {
        let pcm = StereoMixer::convert_to_int16_pcm(&[0.0, 1.0, -1.0, 2.0, -3.0]);
        assert_eq!(pcm.len(), 10);
        let values: Vec<i16> = pcm.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect();
        assert_eq!(values, vec![0, i16::MAX, -i16::MAX, i16::MAX, -i16::MAX]);
    }

    fn mono(rate: u32) -> AudioFormat {
        AudioFormat {
            sample_rate: rate,
            channels: 1,
            bit_depth: 16,
        }
    }

    #[test]
    fn stream_resampler_keeps_the_long_run_rate() {
        let mut resampler = StreamResampler::new(48000, mono(44100));
        let chunk = vec![0.25f32; 480];

        let produced: usize = (0..100).map(|_| resampler.process(&chunk, 1).len()).sum();

        // one second in, one second out (less the frame still held back)
        assert!((44099..=44100).contains(&produced), "produced {}", produced);
    }

    #[test]
    fn chunk_boundaries_do_not_change_the_output() {
        let ramp: Vec<f32> = (0..4800).map(|i| i as f32 / 4800.0).collect();

        let whole = StreamResampler::new(48000, mono(44100)).process(&ramp, 1);

        for chunk_len in [1, 7, 480, 1000] {
            let mut resampler = StreamResampler::new(48000, mono(44100));
            let split: Vec<f32> = ramp.chunks(chunk_len).flat_map(|c| resampler.process(c, 1)).collect();
            assert_eq!(split, whole, "chunk length {}", chunk_len);
        }
    }

    #[test]
    fn stream_resampler_remaps_and_passes_through_matching_rates() {
        let mut resampler = StreamResampler::new(44100, stereo_44k());
        assert_eq!(resampler.process(&[0.5, -0.5], 1), vec![0.5, 0.5, -0.5, -0.5]);

        let mut upsampler = StreamResampler::new(22050, mono(44100));
        let out: Vec<f32> = [[0.0f32, 1.0], [2.0, 3.0]]
            .iter()
            .flat_map(|c| upsampler.process(c, 1))
            .collect();
        assert_eq!(out.len(), 6);
        assert_relative_eq!(out[1], 0.5);
        assert_relative_eq!(out[3], 1.5);
        assert_relative_eq!(out[5], 2.5);
    }
}
