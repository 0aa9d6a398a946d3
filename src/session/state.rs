//! Session state and events

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::voice::Utterance;

/// Where the turn loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not yet listening, or a session just closed
    Idle,
    /// Microphone owned by the wake word gate
    WakeWait,
    /// Microphone owned by the endpointer
    ActiveRecord,
    /// Transcribing and generating a reply
    ActiveProcess,
    /// Playing the reply
    ActiveSpeak,
    /// Cancelled; no device is held
    Terminated,
}

/// Why a session closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The user said an end phrase
    EndPhrase(String),
    /// The transcriber signalled the end of the session
    Transcriber,
    /// Too many consecutive capture failures
    CaptureFailures(u32),
    /// Cancellation was requested
    Cancelled,
}

/// Progress notifications for whoever renders the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The wake word opened a session
    WakeDetected {
        /// Session identifier
        session_id: Uuid,
    },
    /// The user's utterance was transcribed
    Heard {
        /// Transcript text
        text: String,
    },
    /// The assistant replied (markdown-capable text)
    Replied {
        /// Reply text as produced by the language model
        text: String,
    },
    /// A turn was skipped
    Notice {
        /// User-facing explanation
        message: String,
    },
    /// The user spoke a different language than the recognizer is set to
    LanguageMismatch {
        /// Configured language
        expected: String,
        /// Language the recognizer reported
        detected: String,
    },
    /// The session closed
    SessionEnded {
        /// Session identifier
        session_id: Uuid,
        /// Why it closed
        reason: EndReason,
        /// Completed turns
        turns: u32,
    },
}

/// One wake-to-end conversation
#[derive(Debug)]
pub struct Session {
    /// Session identifier
    pub id: Uuid,
    /// When the wake word fired
    pub started_at: DateTime<Utc>,
    /// Completed turns
    pub turns: u32,
    /// Consecutive capture failures
    pub capture_failures: u32,
    /// Utterance waiting to be transcribed
    pub(crate) pending_utterance: Option<Utterance>,
    /// Reply waiting to be spoken
    pub(crate) pending_reply: Option<String>,
}

impl Session {
    /// Open a session now
    #[must_use]
    pub fn start() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            turns: 0,
            capture_failures: 0,
            pending_utterance: None,
            pending_reply: None,
        }
    }
}
