//! External collaborators
//!
//! The session loop talks to speech recognition, web search, the language
//! model and speech synthesis only through the ports defined here. Every call
//! is bounded by [`with_deadline`] so a hung service cannot stall a session.

mod llm;
mod rag;
mod stt;
mod tts;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

pub use llm::{ChatClient, Message, SYSTEM_PROMPT, build_messages};
pub use rag::TavilySearch;
pub use stt::{SttProvider, WhisperTranscriber};
pub use tts::{SpokenOutput, TextToSpeech, TtsProvider};

use crate::voice::Utterance;
use crate::{Error, Result};

/// Recognized speech
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    /// Transcribed text
    pub text: String,
    /// Language the recognizer detected, if reported
    pub language: Option<String>,
    /// Confidence of the detected language in `[0, 1]`, if reported
    pub confidence: Option<f32>,
}

impl Recognition {
    /// Recognition with text only
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            confidence: None,
        }
    }

    /// Attach the detected language and its confidence
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>, confidence: Option<f32>) -> Self {
        self.language = Some(language.into());
        self.confidence = confidence;
        self
    }
}

/// Output of a transcription call
#[derive(Debug, Clone, PartialEq)]
pub enum Transcript {
    /// The user said something
    Speech(Recognition),
    /// The recognizer itself decided the session should end
    EndOfSession,
}

/// Result of a web search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchAnswer {
    /// Synthesized answer, the only part forwarded to the language model
    pub answer: Option<String>,
    /// Raw hits, kept for logging
    pub results: Vec<SearchHit>,
}

/// One raw search hit
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct SearchHit {
    /// Result title
    pub title: String,
    /// Result URL
    pub url: String,
    /// Snippet of page content
    #[serde(default)]
    pub content: String,
}

/// Speech-to-text collaborator
#[async_trait(?Send)]
pub trait Transcriber {
    /// Transcribe one utterance; ownership of the audio moves into the call
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stt`] if recognition fails
    async fn transcribe(&self, utterance: Utterance) -> Result<Transcript>;
}

/// Retrieval collaborator
#[async_trait(?Send)]
pub trait Retriever {
    /// Search for context relevant to `query`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rag`] if the search fails
    async fn search(&self, query: &str) -> Result<SearchAnswer>;
}

/// Language model collaborator
#[async_trait(?Send)]
pub trait ChatModel {
    /// Produce a markdown-capable reply to `user_text`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Llm`] if the completion fails
    async fn complete(&self, user_text: &str, context: Option<&str>) -> Result<String>;
}

/// Speech synthesis collaborator; plays what it synthesizes
#[async_trait(?Send)]
pub trait Synthesizer {
    /// Synthesize `text` and play it to completion
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tts`] or [`Error::Device`] if synthesis or playback fails
    async fn speak(&mut self, text: &str) -> Result<()>;
}

/// Per-collaborator call deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Speech-to-text
    pub stt: Duration,
    /// Web search
    pub rag: Duration,
    /// Language model
    pub llm: Duration,
    /// Speech synthesis and playback
    pub tts: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            stt: Duration::from_secs(30),
            rag: Duration::from_secs(15),
            llm: Duration::from_secs(60),
            tts: Duration::from_secs(60),
        }
    }
}

/// Await `call`, failing with [`Error::Timeout`] once `after` elapses
///
/// # Errors
///
/// Returns the call's own error, or a timeout
pub async fn with_deadline<T, F>(service: &'static str, after: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(after, call)
        .await
        .map_err(|_| Error::Timeout { service, after })?
}
