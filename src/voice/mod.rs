//! Voice processing module
//!
//! Handles audio capture, wake word detection, endpointing and playback.
//! Speech recognition and synthesis live in [`crate::services`].

mod capture;
mod device;
mod endpoint;
mod frame;
mod playback;
mod wake_word;

pub use capture::{CpalMicStream, CpalMicrophone, SAMPLE_RATE, samples_to_wav};
pub use device::{MicStream, Microphone, StreamSpec};
pub use endpoint::{RecordOutcome, SpeechEndpointer};
pub use frame::{AudioFrame, Utterance, mean_abs_amplitude, normalize, to_i16};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3};
pub use wake_word::{
    DETECTOR_FRAME_LENGTH, DetectorState, TranscriptWakeDetector, WakeOutcome, WakeWordDetector,
    WakeWordGate,
};
