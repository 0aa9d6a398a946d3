//! PCM frames and utterances

use std::time::Duration;

/// Scale factor between 16-bit PCM and normalized float samples
const I16_SCALE: f32 = 32768.0;

/// A fixed-length chunk of mono 16-bit PCM audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioFrame {
    /// Wrap raw samples captured at `sample_rate`
    #[must_use]
    pub const fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Raw PCM samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of samples in the frame
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame carries no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample rate the frame was captured at
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Mean absolute sample amplitude, in 16-bit units
    #[must_use]
    pub fn energy(&self) -> f32 {
        mean_abs_amplitude(&self.samples)
    }

    /// Consume the frame, returning its samples
    #[must_use]
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

/// One captured utterance, normalized to `[-1, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Utterance {
    /// Concatenate frames in capture order and normalize them
    #[must_use]
    pub fn from_frames(frames: Vec<AudioFrame>, sample_rate: u32) -> Self {
        let total = frames.iter().map(AudioFrame::len).sum();
        let mut samples = Vec::with_capacity(total);
        for frame in frames {
            samples.extend(frame.samples.iter().map(|&s| normalize(s)));
        }

        Self {
            samples,
            sample_rate,
        }
    }

    /// Wrap already-normalized samples
    #[must_use]
    pub const fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Normalized samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate of the utterance
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length of the utterance in time
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Convert one 16-bit sample to a float in `[-1, 1]`
#[must_use]
pub fn normalize(sample: i16) -> f32 {
    f32::from(sample) / I16_SCALE
}

/// Convert a float sample in `[-1, 1]` to 16-bit PCM, clamping out-of-range input
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Mean absolute amplitude of 16-bit samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_abs_amplitude(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: u64 = samples.iter().map(|s| u64::from(s.unsigned_abs())).sum();
    (sum as f64 / samples.len() as f64) as f32
}
