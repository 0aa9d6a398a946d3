//! Conversation sessions
//!
//! A session opens when the wake word fires and closes on an end phrase, a
//! transcriber signal, repeated capture failures or cancellation.

mod end_phrase;
mod orchestrator;
mod state;

pub use end_phrase::{DEFAULT_END_PHRASES, EndPhraseMatcher, phrases_for};
pub use orchestrator::{Collaborators, SessionPolicy, TurnOrchestrator};
pub use state::{EndReason, Session, SessionEvent, SessionState};
