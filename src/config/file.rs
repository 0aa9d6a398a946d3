//! TOML configuration file loading
//!
//! Supports `~/.config/voice-tutor/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::services::{SttProvider, TtsProvider};
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TutorConfigFile {
    /// Wake word configuration
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Recording/endpointing configuration
    #[serde(default)]
    pub recording: RecordingFileConfig,

    /// Speech-to-text configuration
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Text-to-speech configuration
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Web search configuration
    #[serde(default)]
    pub rag: RagFileConfig,

    /// Session behaviour
    #[serde(default)]
    pub session: SessionFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Wake word (e.g. "jarvis")
    pub word: Option<String>,

    /// Detection sensitivity in `[0, 1]`
    pub sensitivity: Option<f32>,
}

/// Recording configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecordingFileConfig {
    pub sample_rate: Option<u32>,
    pub frame_size: Option<usize>,
    pub energy_threshold: Option<f32>,
    pub silence_secs: Option<f64>,
    pub max_secs: Option<f64>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<SttProvider>,

    /// Model identifier (e.g. "whisper-1", "nova-2")
    pub model: Option<String>,

    /// ISO language code, or "auto" to let the recognizer decide
    pub language: Option<String>,
}

/// Language model configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// `OpenAI`-compatible API base URL
    pub base_url: Option<String>,

    /// Model identifier (e.g. "llama-3.3-70b-versatile")
    pub model: Option<String>,

    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai" or "elevenlabs"
    pub provider: Option<TtsProvider>,

    /// Model identifier (e.g. "tts-1")
    pub model: Option<String>,

    /// Voice name, or voice ID for `ElevenLabs`
    pub voice: Option<String>,

    /// Speed multiplier
    pub speed: Option<f32>,
}

/// Web search configuration
#[derive(Debug, Default, Deserialize)]
pub struct RagFileConfig {
    pub enabled: Option<bool>,
    pub search_depth: Option<String>,
    pub max_results: Option<usize>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Replaces the built-in end phrases
    pub end_phrases: Option<Vec<String>>,

    /// Added to the end phrases
    pub extra_end_phrases: Option<Vec<String>>,

    /// Consecutive capture failures retried before a session closes
    pub capture_retries: Option<u32>,

    pub stt_timeout_secs: Option<u64>,
    pub rag_timeout_secs: Option<u64>,
    pub llm_timeout_secs: Option<u64>,
    pub tts_timeout_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub groq: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
    pub tavily: Option<String>,
}

/// Load the TOML config file
///
/// With an explicit `path` the file must exist and parse. Without one the
/// standard path is tried, and a missing or malformed file falls back to
/// `TutorConfigFile::default()`.
///
/// # Errors
///
/// Returns error if an explicit config file cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<TutorConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(TutorConfigFile::default());
    };

    if !path.exists() {
        return Ok(TutorConfigFile::default());
    }

    let config = match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                TutorConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            TutorConfigFile::default()
        }
    };
    Ok(config)
}

/// Return the config file path: `~/.config/voice-tutor/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-tutor").join("config.toml"))
}
