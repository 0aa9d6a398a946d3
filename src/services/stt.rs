//! Speech-to-text (STT) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{Recognition, Transcriber, Transcript};
use crate::voice::{Utterance, samples_to_wav};
use crate::{Error, Result};

/// Default `OpenAI`-compatible API base for Whisper
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Response from a Whisper `verbose_json` transcription
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
    #[serde(default)]
    detected_language: Option<String>,
    #[serde(default)]
    language_confidence: Option<f32>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttProvider {
    /// `OpenAI`-compatible Whisper endpoint
    Whisper,
    /// Deepgram
    Deepgram,
}

/// Transcribes utterances over HTTP
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    language: Option<String>,
    base_url: String,
    provider: SttProvider,
}

impl WhisperTranscriber {
    /// Create a transcriber for `provider`
    ///
    /// `language` of `None` requests automatic language detection.
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        provider: SttProvider,
        api_key: SecretString,
        model: String,
        language: Option<String>,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!(
                "API key required for {provider:?} transcription"
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language,
            base_url: OPENAI_BASE_URL.to_string(),
            provider,
        })
    }

    /// Point Whisper requests at another `OpenAI`-compatible API base
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Transcribe using an `OpenAI`-compatible Whisper endpoint
    async fn transcribe_whisper(&self, audio: Vec<u8>) -> Result<Recognition> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let url = format!(
            "{}/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        let recognition = Recognition::new(result.text.trim());
        Ok(match result.language {
            Some(language) => recognition.with_language(language, None),
            None => recognition,
        })
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: Vec<u8>) -> Result<Recognition> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let mut query = vec![
            ("model", self.model.clone()),
            ("punctuate", "true".to_string()),
        ];
        match &self.language {
            Some(language) => query.push(("language", language.clone())),
            None => query.push(("detect_language", "true".to_string())),
        }

        let response = self
            .client
            .post("https://api.deepgram.com/v1/listen")
            .query(&query)
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Deepgram response");
            e
        })?;

        Ok(recognition_from_deepgram(result))
    }
}

fn recognition_from_deepgram(response: DeepgramResponse) -> Recognition {
    let Some(channel) = response.results.channels.into_iter().next() else {
        return Recognition::new("");
    };

    let text = channel
        .alternatives
        .first()
        .map(|a| a.transcript.trim().to_string())
        .unwrap_or_default();

    let recognition = Recognition::new(text);
    match channel.detected_language {
        Some(language) => recognition.with_language(language, channel.language_confidence),
        None => recognition,
    }
}

#[async_trait(?Send)]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, utterance: Utterance) -> Result<Transcript> {
        let wav = samples_to_wav(utterance.samples(), utterance.sample_rate())?;
        drop(utterance);

        let recognition = match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(wav).await?,
            SttProvider::Deepgram => self.transcribe_deepgram(wav).await?,
        };

        tracing::info!(
            transcript = %recognition.text,
            language = ?recognition.language,
            "transcription complete"
        );
        Ok(Transcript::Speech(recognition))
    }
}
