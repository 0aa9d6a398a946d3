//! Configuration management for the voice tutor
//!
//! Values resolve as env > TOML file > default. Secrets are held as
//! [`SecretString`] and never logged.

pub mod file;

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;

use crate::services::{Deadlines, SttProvider, TtsProvider};
use crate::session::{DEFAULT_END_PHRASES, SessionPolicy, phrases_for};
use crate::voice::{SAMPLE_RATE, SpeechEndpointer};
use crate::{Error, Result};
use file::TutorConfigFile;

/// Voice tutor configuration
#[derive(Debug)]
pub struct Config {
    /// Wake word detection
    pub wake: WakeConfig,

    /// Utterance recording
    pub recording: RecordingConfig,

    /// Speech-to-text
    pub stt: SttConfig,

    /// Language model
    pub llm: LlmConfig,

    /// Speech synthesis
    pub tts: TtsConfig,

    /// Web search context
    pub rag: RagConfig,

    /// Session behaviour
    pub session: SessionConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Wake word configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WakeConfig {
    /// Word that opens a session
    pub word: String,

    /// Detection sensitivity in `[0, 1]`; higher is more permissive
    pub sensitivity: f32,
}

/// Recording and endpointing configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Samples per frame
    pub frame_size: usize,

    /// Mean absolute amplitude above which a frame counts as speech
    pub energy_threshold: f32,

    /// Trailing silence that ends an utterance
    pub silence_secs: f64,

    /// Hard cap on one utterance
    pub max_secs: f64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            frame_size: 1024,
            energy_threshold: 200.0,
            silence_secs: 0.5,
            max_secs: 10.0,
        }
    }
}

/// Speech-to-text configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SttConfig {
    /// Backend
    pub provider: SttProvider,

    /// Model identifier
    pub model: String,

    /// Fixed recognition language; `None` lets the recognizer detect it
    pub language: Option<String>,
}

/// Language model configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    /// `OpenAI`-compatible API base URL
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Reply length limit
    pub max_tokens: u32,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TtsConfig {
    /// Backend
    pub provider: TtsProvider,

    /// Model identifier
    pub model: String,

    /// Voice name (`OpenAI`) or voice ID (`ElevenLabs`)
    pub voice: String,

    /// Speed multiplier (0.25 to 4.0)
    pub speed: f32,
}

/// Web search configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RagConfig {
    /// Search before every reply
    pub enabled: bool,

    /// Tavily search depth ("basic" or "advanced")
    pub search_depth: String,

    /// Results requested per search
    pub max_results: usize,
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Base end phrases, before wake word variants are added
    pub end_phrases: Vec<String>,

    /// Consecutive capture failures retried before the session closes
    pub capture_retries: u32,

    /// Collaborator call deadlines
    pub deadlines: Deadlines,
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, TTS, fallback chat)
    pub openai: Option<SecretString>,

    /// Groq API key (chat completions)
    pub groq: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,

    /// Tavily API key (web search)
    pub tavily: Option<SecretString>,
}

impl Config {
    /// Load configuration from the environment and the TOML file
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unreadable or the
    /// resulting values are invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        let config = Self::resolve(fc, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Merge a config file with overrides looked up through `env`
    #[must_use]
    pub fn resolve(fc: TutorConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let secret = |key: &str, file: Option<String>| {
            env(key)
                .or(file)
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from)
        };

        let api_keys = ApiKeys {
            openai: secret("OPENAI_API_KEY", fc.api_keys.openai),
            groq: secret("GROQ_API_KEY", fc.api_keys.groq),
            deepgram: secret("DEEPGRAM_API_KEY", fc.api_keys.deepgram),
            elevenlabs: secret("ELEVENLABS_API_KEY", fc.api_keys.elevenlabs),
            tavily: secret("TAVILY_API_KEY", fc.api_keys.tavily),
        };

        let wake = WakeConfig {
            word: env("TUTOR_WAKE_WORD")
                .or(fc.wake.word)
                .unwrap_or_else(|| "jarvis".to_string()),
            sensitivity: fc.wake.sensitivity.unwrap_or(0.9),
        };

        let defaults = RecordingConfig::default();
        let recording = RecordingConfig {
            sample_rate: fc.recording.sample_rate.unwrap_or(defaults.sample_rate),
            frame_size: fc.recording.frame_size.unwrap_or(defaults.frame_size),
            energy_threshold: fc
                .recording
                .energy_threshold
                .unwrap_or(defaults.energy_threshold),
            silence_secs: fc.recording.silence_secs.unwrap_or(defaults.silence_secs),
            max_secs: fc.recording.max_secs.unwrap_or(defaults.max_secs),
        };

        // "auto" or blank means let the recognizer detect the language
        let language = env("TUTOR_STT_LANGUAGE")
            .or(fc.stt.language)
            .unwrap_or_else(|| "de".to_string());
        let language = Some(language.trim().to_lowercase())
            .filter(|l| !l.is_empty() && l != "auto");

        let stt = SttConfig {
            provider: fc.stt.provider.unwrap_or(SttProvider::Whisper),
            model: env("TUTOR_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            language,
        };

        let llm = LlmConfig {
            base_url: fc
                .llm
                .base_url
                .unwrap_or_else(|| "https://api.groq.com/openai/v1".to_string()),
            model: env("TUTOR_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "llama-3.3-70b-versatile".to_string()),
            temperature: fc.llm.temperature.unwrap_or(0.9),
            max_tokens: fc.llm.max_tokens.unwrap_or(500),
        };

        let tts = TtsConfig {
            provider: fc.tts.provider.unwrap_or(TtsProvider::OpenAI),
            model: fc.tts.model.unwrap_or_else(|| "tts-1".to_string()),
            voice: fc.tts.voice.unwrap_or_else(|| "nova".to_string()),
            speed: fc.tts.speed.unwrap_or(1.0),
        };

        let rag = RagConfig {
            enabled: env("TUTOR_RAG_ENABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.rag.enabled)
                .unwrap_or(false),
            search_depth: fc
                .rag
                .search_depth
                .unwrap_or_else(|| "basic".to_string()),
            max_results: fc.rag.max_results.unwrap_or(3),
        };

        let mut end_phrases = fc.session.end_phrases.unwrap_or_else(|| {
            DEFAULT_END_PHRASES
                .iter()
                .map(ToString::to_string)
                .collect()
        });
        end_phrases.extend(fc.session.extra_end_phrases.unwrap_or_default());

        let defaults = Deadlines::default();
        let secs = |value: Option<u64>, default: Duration| value.map_or(default, Duration::from_secs);
        let session = SessionConfig {
            end_phrases,
            capture_retries: fc.session.capture_retries.unwrap_or(3),
            deadlines: Deadlines {
                stt: secs(fc.session.stt_timeout_secs, defaults.stt),
                rag: secs(fc.session.rag_timeout_secs, defaults.rag),
                llm: secs(fc.session.llm_timeout_secs, defaults.llm),
                tts: secs(fc.session.tts_timeout_secs, defaults.tts),
            },
        };

        Self {
            wake,
            recording,
            stt,
            llm,
            tts,
            rag,
            session,
            api_keys,
        }
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.wake.word.trim().is_empty() {
            return Err(Error::Config("wake word must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.wake.sensitivity) {
            return Err(Error::Config(format!(
                "wake sensitivity {} outside [0, 1]",
                self.wake.sensitivity
            )));
        }

        let r = &self.recording;
        if r.sample_rate == 0 || r.frame_size == 0 {
            return Err(Error::Config(
                "sample_rate and frame_size must be positive".to_string(),
            ));
        }
        if !r.energy_threshold.is_finite() || r.energy_threshold < 0.0 {
            return Err(Error::Config(
                "energy_threshold must be a non-negative number".to_string(),
            ));
        }
        if !r.silence_secs.is_finite() || !r.max_secs.is_finite() {
            return Err(Error::Config(
                "silence_secs and max_secs must be finite".to_string(),
            ));
        }
        if r.silence_secs <= 0.0 || r.max_secs <= 0.0 {
            return Err(Error::Config(
                "silence_secs and max_secs must be positive".to_string(),
            ));
        }
        if r.silence_secs >= r.max_secs {
            return Err(Error::Config(format!(
                "silence_secs ({}) must be shorter than max_secs ({})",
                r.silence_secs, r.max_secs
            )));
        }
        if SpeechEndpointer::new(r.clone()).max_frames() == 0 {
            return Err(Error::Config(format!(
                "max_secs ({}) is shorter than one frame of {} samples",
                r.max_secs, r.frame_size
            )));
        }

        let d = &self.session.deadlines;
        if [d.stt, d.rag, d.llm, d.tts].contains(&Duration::ZERO) {
            return Err(Error::Config("service timeouts must be positive".to_string()));
        }

        Ok(())
    }

    /// End phrases including wake word variants ("bye jarvis")
    #[must_use]
    pub fn end_phrases(&self) -> Vec<String> {
        phrases_for(&self.session.end_phrases, &self.wake.word)
    }

    /// Key for the chat endpoint
    ///
    /// Groq's key is used for any endpoint; the `OpenAI` key only when
    /// `llm.base_url` points at `OpenAI` itself.
    #[must_use]
    pub fn chat_api_key(&self) -> Option<&SecretString> {
        let openai_endpoint = self.llm.base_url.contains("api.openai.com");
        self.api_keys
            .groq
            .as_ref()
            .or_else(|| self.api_keys.openai.as_ref().filter(|_| openai_endpoint))
    }

    /// Collaborator call deadlines
    #[must_use]
    pub const fn deadlines(&self) -> Deadlines {
        self.session.deadlines
    }

    /// Failure and timing policy for the turn loop
    #[must_use]
    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            capture_retries: self.session.capture_retries,
            deadlines: self.deadlines(),
            expected_language: self.stt.language.clone(),
            ..SessionPolicy::default()
        }
    }
}
