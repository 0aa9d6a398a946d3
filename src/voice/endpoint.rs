//! Energy-based speech endpointing
//!
//! Records one utterance per call: waits for the first frame louder than the
//! energy threshold, then stops after enough consecutive quiet frames or when
//! the hard recording cap is reached.

use tokio_util::sync::CancellationToken;

use super::device::{Microphone, StreamSpec};
use super::frame::{AudioFrame, Utterance};
use crate::config::RecordingConfig;
use crate::{Error, Result};

/// Result of one recording attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// The user spoke; all frames read during the attempt
    Utterance(Utterance),
    /// Nothing crossed the energy threshold before the cap
    NoSpeech,
    /// Cancellation was observed at a frame boundary
    Cancelled,
}

/// Why the frame loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Silence,
    Cap,
}

/// Per-frame speech/silence bookkeeping
#[derive(Debug, Default)]
struct Endpoint {
    speech_started: bool,
    silent_run: usize,
}

impl Endpoint {
    /// Feed one frame's energy; returns true once the utterance is complete
    fn observe(&mut self, energy: f32, threshold: f32, silence_frames: usize) -> bool {
        if energy > threshold {
            self.speech_started = true;
            self.silent_run = 0;
        } else if self.speech_started {
            self.silent_run += 1;
            if self.silent_run > silence_frames {
                return true;
            }
        }
        false
    }
}

/// Records utterances from the microphone
#[derive(Debug, Clone)]
pub struct SpeechEndpointer {
    config: RecordingConfig,
}

impl SpeechEndpointer {
    /// Create an endpointer from recording settings
    #[must_use]
    pub const fn new(config: RecordingConfig) -> Self {
        Self { config }
    }

    /// Recording settings in use
    #[must_use]
    pub const fn config(&self) -> &RecordingConfig {
        &self.config
    }

    /// Largest number of quiet frames after speech that still continues recording
    ///
    /// Recording stops when `silent_run * frame_duration > silence_secs`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn silence_frames(&self) -> usize {
        let silence_samples = self.config.silence_secs * f64::from(self.config.sample_rate);
        (silence_samples / self.config.frame_size as f64).floor() as usize
    }

    /// Hard cap on frames read per utterance: `floor(max_secs / frame_duration)`
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn max_frames(&self) -> usize {
        let max_samples = self.config.max_secs * f64::from(self.config.sample_rate);
        (max_samples / self.config.frame_size as f64).floor() as usize
    }

    /// Capture one utterance
    ///
    /// Opens an exclusive stream for the duration of the call and drops it on
    /// every return path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Capture`] if the device cannot be opened or fails
    /// mid-recording; the partial utterance is discarded.
    pub async fn record(
        &self,
        mic: &dyn Microphone,
        cancel: &CancellationToken,
    ) -> Result<RecordOutcome> {
        let spec = StreamSpec {
            sample_rate: self.config.sample_rate,
            frame_length: self.config.frame_size,
        };
        let mut stream = mic
            .open(spec)
            .map_err(|e| Error::Capture(format!("failed to open microphone: {e}")))?;

        let threshold = self.config.energy_threshold;
        let silence_frames = self.silence_frames();
        let max_frames = self.max_frames();

        let mut endpoint = Endpoint::default();
        let mut frames: Vec<AudioFrame> = Vec::new();
        let mut stop = Stop::Cap;

        tracing::debug!(threshold, silence_frames, max_frames, "listening for speech");

        for _ in 0..max_frames {
            if cancel.is_cancelled() {
                tracing::debug!("recording cancelled");
                return Ok(RecordOutcome::Cancelled);
            }

            let frame = stream
                .read_frame()
                .await
                .map_err(|e| Error::Capture(e.to_string()))?;
            let energy = frame.energy();
            frames.push(frame);

            if endpoint.observe(energy, threshold, silence_frames) {
                stop = Stop::Silence;
                break;
            }
        }
        drop(stream);

        if !endpoint.speech_started {
            tracing::debug!(frames = frames.len(), "no speech detected");
            return Ok(RecordOutcome::NoSpeech);
        }

        let utterance = Utterance::from_frames(frames, self.config.sample_rate);
        tracing::debug!(
            ?stop,
            duration_ms = utterance.duration().as_millis(),
            "utterance captured"
        );
        Ok(RecordOutcome::Utterance(utterance))
    }
}
