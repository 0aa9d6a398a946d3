//! Voice Tutor - hands-free spoken conversations with a language tutor
//!
//! This library provides the pieces of a wake-word driven voice session:
//! - Voice processing (capture, wake word gating, endpointing, playback)
//! - End phrase matching
//! - The turn orchestrator that sequences one conversation turn at a time
//! - HTTP clients for speech-to-text, web search, chat and speech synthesis
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Microphone                         │
//! │        WakeWordGate   ⇄   SpeechEndpointer           │
//! └────────────────────┬────────────────────────────────┘
//!                      │ utterance
//! ┌────────────────────▼────────────────────────────────┐
//! │                TurnOrchestrator                      │
//! │   EndPhraseMatcher  │  deadlines  │  SessionEvents   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Services                           │
//! │     STT  │  Search  │  LLM  │  TTS + playback        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod services;
pub mod session;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{
    Collaborators, EndPhraseMatcher, EndReason, SessionEvent, SessionPolicy, SessionState,
    TurnOrchestrator,
};
