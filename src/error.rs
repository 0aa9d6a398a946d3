//! Error types for the voice tutor

use std::time::Duration;

use thiserror::Error;

/// Result type alias for voice tutor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice tutor
///
/// "No speech", "end of session" and "cancelled" are not errors: they are
/// ordinary outcomes returned by the gate, the endpointer and the transcriber.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device open/read/write failure
    #[error("audio device error: {0}")]
    Device(String),

    /// Utterance capture aborted by a device failure
    #[error("capture failed: {0}")]
    Capture(String),

    /// Wake word detection error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Language model error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Retrieval (web search) error
    #[error("search error: {0}")]
    Rag(String),

    /// Text-to-speech or playback error
    #[error("TTS error: {0}")]
    Tts(String),

    /// A collaborator call exceeded its deadline
    #[error("{service} did not respond within {after:?}")]
    Timeout {
        /// Collaborator name
        service: &'static str,
        /// Deadline that elapsed
        after: Duration,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
