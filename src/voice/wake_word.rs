//! Wake word detection
//!
//! [`WakeWordGate`] owns the microphone while the tutor is idle and feeds
//! frames to a [`WakeWordDetector`] until it fires or the session is cancelled.
//! [`TranscriptWakeDetector`] is the built-in detector: a local energy gate
//! collects a short speech segment, which is then verified by transcription.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::device::{Microphone, StreamSpec};
use super::frame::{AudioFrame, normalize};
use super::Utterance;
use crate::services::{Transcriber, Transcript, with_deadline};
use crate::{Error, Result};

/// Samples per detector frame (32ms at 16kHz)
pub const DETECTOR_FRAME_LENGTH: usize = 512;

/// Minimum speech to consider a segment, in tenths of a second
const MIN_SPEECH_TENTHS: usize = 3;

/// Silence that ends a segment, in tenths of a second
const SILENCE_TENTHS: usize = 5;

/// Longest segment sent for verification, in tenths of a second
const MAX_SEGMENT_TENTHS: usize = 30;

/// Default bound on one verification transcript
const VERIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Energy gate at sensitivity 1.0, in mean absolute 16-bit amplitude
const MIN_GATE: f32 = 50.0;

/// Additional gate added as sensitivity drops to 0.0
const GATE_RANGE: f32 = 550.0;

/// Pause after a failed frame read
const READ_BACKOFF: Duration = Duration::from_millis(50);

/// Consecutive failed reads tolerated before the stream is reopened
const MAX_READ_ERRORS: u32 = 100;

/// Per-frame wake word detector
///
/// Scores follow the usual keyword-spotter convention: the index of the
/// detected keyword, or a negative value when nothing was detected.
#[async_trait(?Send)]
pub trait WakeWordDetector {
    /// Samples per frame the detector expects
    fn frame_length(&self) -> usize;

    /// Sample rate the detector expects
    fn sample_rate(&self) -> u32;

    /// Score one frame
    ///
    /// # Errors
    ///
    /// Returns error if the detector itself fails on this frame
    async fn process(&mut self, frame: &AudioFrame) -> Result<i32>;

    /// Forget any partial state before a new wait
    fn reset(&mut self) {}
}

/// Result of waiting for the wake word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// The detector fired
    Triggered,
    /// Cancellation was observed at a frame boundary
    Cancelled,
}

/// Blocks on the microphone until the wake word is heard
pub struct WakeWordGate {
    keyword: String,
    detector: Box<dyn WakeWordDetector>,
    backoff: Duration,
    max_read_errors: u32,
}

impl WakeWordGate {
    /// Create a gate for `keyword` driven by `detector`
    #[must_use]
    pub fn new(keyword: impl Into<String>, detector: Box<dyn WakeWordDetector>) -> Self {
        Self {
            keyword: keyword.into(),
            detector,
            backoff: READ_BACKOFF,
            max_read_errors: MAX_READ_ERRORS,
        }
    }

    /// Override the pause after a failed read
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override how many consecutive failed reads are tolerated
    #[must_use]
    pub const fn with_max_read_errors(mut self, max: u32) -> Self {
        self.max_read_errors = max;
        self
    }

    /// The configured wake word
    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Wait until the wake word is detected or cancellation is requested
    ///
    /// The microphone stream is held only for the duration of this call.
    /// Failed reads are retried; after `max_read_errors` in a row the stream
    /// is closed and opened again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the microphone cannot be opened
    pub async fn wait_for_wake(
        &mut self,
        mic: &dyn Microphone,
        cancel: &CancellationToken,
    ) -> Result<WakeOutcome> {
        let spec = StreamSpec {
            sample_rate: self.detector.sample_rate(),
            frame_length: self.detector.frame_length(),
        };
        let mut stream = mic.open(spec)?;
        self.detector.reset();

        tracing::info!(wake_word = %self.keyword, "waiting for wake word");

        let mut read_errors = 0u32;
        loop {
            if cancel.is_cancelled() {
                tracing::debug!("wake wait cancelled");
                return Ok(WakeOutcome::Cancelled);
            }

            let frame = match stream.read_frame().await {
                Ok(frame) => {
                    read_errors = 0;
                    frame
                }
                Err(e) => {
                    read_errors += 1;
                    tracing::warn!(error = %e, read_errors, "microphone read failed");
                    tokio::time::sleep(self.backoff).await;
                    if read_errors >= self.max_read_errors {
                        tracing::warn!(read_errors, "microphone keeps failing, reopening stream");
                        drop(stream);
                        stream = mic.open(spec)?;
                        self.detector.reset();
                        read_errors = 0;
                    }
                    continue;
                }
            };

            match self.detector.process(&frame).await {
                Ok(score) if score >= 0 => {
                    tracing::info!(wake_word = %self.keyword, score, "wake word detected");
                    return Ok(WakeOutcome::Triggered);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "wake word detector failed"),
            }
        }
    }
}

/// State of the transcript-verified detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Detected potential speech, accumulating
    Listening,
}

/// Detects the wake word by transcribing short speech segments
pub struct TranscriptWakeDetector {
    pattern: Regex,
    transcriber: Arc<dyn Transcriber>,
    timeout: Duration,
    gate: f32,
    sample_rate: u32,
    min_speech_samples: usize,
    silence_limit: usize,
    max_segment_samples: usize,
    state: DetectorState,
    segment: Vec<f32>,
    speech_samples: usize,
    silence_samples: usize,
}

impl TranscriptWakeDetector {
    /// Create a detector for `wake_word`
    ///
    /// `sensitivity` in `[0, 1]` lowers the energy gate as it grows.
    ///
    /// # Errors
    ///
    /// Returns error if the wake word is empty or sensitivity is out of range
    pub fn new(
        wake_word: &str,
        sensitivity: f32,
        sample_rate: u32,
        transcriber: Arc<dyn Transcriber>,
    ) -> Result<Self> {
        let normalized = wake_word.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(Error::WakeWord("wake word must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&sensitivity) {
            return Err(Error::WakeWord(format!(
                "sensitivity {sensitivity} outside [0, 1]"
            )));
        }

        let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&normalized)))
            .map_err(|e| Error::WakeWord(e.to_string()))?;
        let gate = GATE_RANGE.mul_add(1.0 - sensitivity, MIN_GATE);

        tracing::debug!(wake_word = %normalized, gate, "wake word detector initialized");

        let tenth = sample_rate as usize / 10;
        Ok(Self {
            pattern,
            transcriber,
            timeout: VERIFY_TIMEOUT,
            gate,
            sample_rate,
            min_speech_samples: tenth * MIN_SPEECH_TENTHS,
            silence_limit: tenth * SILENCE_TENTHS,
            max_segment_samples: tenth * MAX_SEGMENT_TENTHS,
            state: DetectorState::Idle,
            segment: Vec::new(),
            speech_samples: 0,
            silence_samples: 0,
        })
    }

    /// Bound each verification transcript by `timeout`
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    /// Energy a frame must exceed to count as speech
    #[must_use]
    pub const fn gate(&self) -> f32 {
        self.gate
    }

    /// Check if transcribed text contains the wake word
    #[must_use]
    pub fn matches(&self, transcript: &str) -> bool {
        self.pattern.is_match(transcript)
    }

    fn clear(&mut self) {
        self.state = DetectorState::Idle;
        self.segment.clear();
        self.speech_samples = 0;
        self.silence_samples = 0;
    }

    async fn verify(&mut self) -> Result<bool> {
        let samples = std::mem::take(&mut self.segment);
        self.clear();

        tracing::debug!(samples = samples.len(), "checking segment for wake word");
        let utterance = Utterance::from_samples(samples, self.sample_rate);
        let transcript = with_deadline(
            "speech-to-text",
            self.timeout,
            self.transcriber.transcribe(utterance),
        )
        .await;

        match transcript {
            Ok(Transcript::Speech(recognition)) => {
                tracing::trace!(transcript = %recognition.text, "wake segment transcribed");
                Ok(self.matches(&recognition.text))
            }
            Ok(Transcript::EndOfSession) => Ok(false),
            Err(e @ Error::Timeout { .. }) => {
                tracing::warn!(error = %e, "wake word verification timed out");
                Ok(false)
            }
            Err(e) => Err(Error::WakeWord(format!("verification failed: {e}"))),
        }
    }
}

#[async_trait(?Send)]
impl WakeWordDetector for TranscriptWakeDetector {
    fn frame_length(&self) -> usize {
        DETECTOR_FRAME_LENGTH
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn process(&mut self, frame: &AudioFrame) -> Result<i32> {
        let energy = frame.energy();
        let is_speech = energy > self.gate;

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Listening;
                    self.segment.clear();
                    self.segment.extend(frame.samples().iter().map(|&s| normalize(s)));
                    self.speech_samples = frame.len();
                    self.silence_samples = 0;
                    tracing::trace!(energy, "speech detected, listening");
                }
                Ok(-1)
            }
            DetectorState::Listening => {
                self.segment.extend(frame.samples().iter().map(|&s| normalize(s)));
                if is_speech {
                    self.speech_samples += frame.len();
                    self.silence_samples = 0;
                } else {
                    self.silence_samples += frame.len();
                }

                let ended = self.silence_samples > self.silence_limit;
                if ended && self.speech_samples < self.min_speech_samples {
                    tracing::trace!("segment too short - resetting");
                    self.clear();
                    return Ok(-1);
                }

                if ended || self.segment.len() >= self.max_segment_samples {
                    return Ok(if self.verify().await? { 0 } else { -1 });
                }
                Ok(-1)
            }
        }
    }

    fn reset(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Recognition;

    struct FixedTranscriber(&'static str);

    #[async_trait(?Send)]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, _utterance: Utterance) -> Result<Transcript> {
            Ok(Transcript::Speech(Recognition::new(self.0)))
        }
    }

    struct SilentTranscriber;

    #[async_trait(?Send)]
    impl Transcriber for SilentTranscriber {
        async fn transcribe(&self, _utterance: Utterance) -> Result<Transcript> {
            std::future::pending().await
        }
    }

    fn detector(heard: &'static str) -> TranscriptWakeDetector {
        TranscriptWakeDetector::new("Jarvis", 0.9, 16000, Arc::new(FixedTranscriber(heard)))
            .unwrap()
    }

    fn frame(amplitude: i16) -> AudioFrame {
        AudioFrame::new(vec![amplitude; DETECTOR_FRAME_LENGTH], 16000)
    }

    #[test]
    fn test_sensitivity_lowers_gate() {
        let permissive = detector("");
        let strict =
            TranscriptWakeDetector::new("jarvis", 0.1, 16000, Arc::new(FixedTranscriber("")))
                .unwrap();
        assert!(permissive.gate() < strict.gate());
        assert!((permissive.gate() - 105.0).abs() < 0.01);
    }

    #[test]
    fn test_rejects_bad_configuration() {
        let stt = Arc::new(FixedTranscriber(""));
        assert!(TranscriptWakeDetector::new("  ", 0.5, 16000, stt.clone()).is_err());
        assert!(TranscriptWakeDetector::new("jarvis", 1.5, 16000, stt).is_err());
    }

    #[test]
    fn test_wake_word_match_is_whole_word() {
        let detector = detector("");
        assert!(detector.matches("Hey JARVIS, are you there?"));
        assert!(!detector.matches("jarvisian architecture"));
    }

    #[tokio::test]
    async fn test_speech_segment_verified_by_transcript() {
        let mut detector = detector("hey jarvis");

        // 0.48s of speech then silence until the segment ends
        for _ in 0..15 {
            assert_eq!(detector.process(&frame(2000)).await.unwrap(), -1);
        }
        assert_eq!(detector.state(), DetectorState::Listening);

        let mut score = -1;
        for _ in 0..20 {
            score = detector.process(&frame(0)).await.unwrap();
            if score >= 0 {
                break;
            }
        }
        assert_eq!(score, 0);
        assert_eq!(detector.state(), DetectorState::Idle);
    }

    #[tokio::test]
    async fn test_other_speech_does_not_trigger() {
        let mut detector = detector("good morning");
        for _ in 0..15 {
            detector.process(&frame(2000)).await.unwrap();
        }
        for _ in 0..20 {
            assert_eq!(detector.process(&frame(0)).await.unwrap(), -1);
        }
    }

    #[tokio::test]
    async fn test_short_click_resets_without_transcribing() {
        let mut detector = detector("jarvis");
        detector.process(&frame(2000)).await.unwrap();
        for _ in 0..20 {
            assert_eq!(detector.process(&frame(0)).await.unwrap(), -1);
        }
        assert_eq!(detector.state(), DetectorState::Idle);
    }

    #[tokio::test]
    async fn test_hung_verification_counts_as_miss() {
        let mut detector =
            TranscriptWakeDetector::new("jarvis", 0.9, 16000, Arc::new(SilentTranscriber))
                .unwrap()
                .with_timeout(Duration::from_millis(20));

        for _ in 0..15 {
            detector.process(&frame(2000)).await.unwrap();
        }
        let mut scores = Vec::new();
        for _ in 0..20 {
            scores.push(detector.process(&frame(0)).await.unwrap());
        }

        assert!(scores.iter().all(|&s| s == -1));
        assert_eq!(detector.state(), DetectorState::Idle);
    }

    #[test]
    fn test_segment_limits_follow_sample_rate() {
        let narrow =
            TranscriptWakeDetector::new("jarvis", 0.9, 8000, Arc::new(FixedTranscriber("")))
                .unwrap();
        assert_eq!(narrow.min_speech_samples, 2400);
        assert_eq!(narrow.silence_limit, 4000);
        assert_eq!(narrow.max_segment_samples, 24000);

        let wide = detector("");
        assert_eq!(wide.silence_limit, 8000);
        assert_eq!(wide.max_segment_samples, 48000);
    }
}
