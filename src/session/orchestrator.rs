//! The turn loop
//!
//! [`TurnOrchestrator`] moves microphone ownership between the wake word gate
//! and the endpointer and sequences one turn at a time through the
//! collaborators:
//!
//! ```text
//! Idle ─▶ WakeWait ─triggered─▶ ActiveRecord ◀──────────────┐
//!            │                    │ no speech ↺              │
//!        cancelled                ▼ utterance                │
//!            │               ActiveProcess ─end phrase─▶ Idle│
//!            ▼                    │ reply                    │
//!        Terminated          ActiveSpeak ─────played─────────┘
//! ```
//!
//! Any state moves to `Terminated` once cancellation is observed. The gate and
//! the endpointer each drop their stream before returning, so the two never
//! hold the microphone at the same time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::end_phrase::EndPhraseMatcher;
use super::state::{EndReason, Session, SessionEvent, SessionState};
use crate::format::speakable;
use crate::services::{
    ChatModel, Deadlines, Recognition, Retriever, Synthesizer, Transcriber, Transcript,
    with_deadline,
};
use crate::voice::{Microphone, RecordOutcome, SpeechEndpointer, WakeOutcome, WakeWordGate};
use crate::{Error, Result};

/// Spoken when a turn cannot be understood
const NOTICE_NOT_UNDERSTOOD: &str = "Sorry, I didn't catch that.";

/// Spoken when search or the language model fails
const NOTICE_NO_REPLY: &str = "Sorry, I couldn't come up with a reply. Please try again.";

/// Shown when the reply cannot be played
const NOTICE_NOT_SPOKEN: &str = "Sorry, I couldn't read the reply out loud.";

/// Minimum detected-language confidence before a mismatch is reported
const LANGUAGE_MISMATCH_CONFIDENCE: f32 = 0.5;

/// Failure and timing policy for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Consecutive capture failures retried before the session closes
    pub capture_retries: u32,
    /// Pause before retrying a failed capture
    pub capture_backoff: Duration,
    /// Collaborator call deadlines
    pub deadlines: Deadlines,
    /// Language the recognizer is pinned to, if any
    pub expected_language: Option<String>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            capture_retries: 3,
            capture_backoff: Duration::from_millis(250),
            deadlines: Deadlines::default(),
            expected_language: None,
        }
    }
}

/// The external services a session talks to
pub struct Collaborators {
    /// Speech-to-text; shared with the wake word detector
    pub transcriber: Arc<dyn Transcriber>,
    /// Optional web search for reply context
    pub retriever: Option<Box<dyn Retriever>>,
    /// Reply generation
    pub chat: Box<dyn ChatModel>,
    /// Speech output
    pub synthesizer: Box<dyn Synthesizer>,
}

/// Drives the listen → process → reply cycle
pub struct TurnOrchestrator {
    mic: Box<dyn Microphone>,
    gate: WakeWordGate,
    endpointer: SpeechEndpointer,
    end_phrases: EndPhraseMatcher,
    services: Collaborators,
    policy: SessionPolicy,
    cancel: CancellationToken,
    state: SessionState,
    session: Option<Session>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl TurnOrchestrator {
    /// Assemble an orchestrator in the `Idle` state
    #[must_use]
    pub fn new(
        mic: Box<dyn Microphone>,
        gate: WakeWordGate,
        endpointer: SpeechEndpointer,
        end_phrases: EndPhraseMatcher,
        services: Collaborators,
        policy: SessionPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            mic,
            gate,
            endpointer,
            end_phrases,
            services,
            policy,
            cancel,
            state: SessionState::Idle,
            session: None,
            events: None,
        }
    }

    /// Publish progress on `events`
    #[must_use]
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The open session, if any
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Run until cancelled
    ///
    /// # Errors
    ///
    /// Returns error only for unrecoverable device failures in the wake gate
    pub async fn run(&mut self) -> Result<()> {
        while self.state != SessionState::Terminated {
            self.step().await?;
        }

        tracing::info!("voice loop stopped");
        Ok(())
    }

    /// Perform one transition and return the new state
    ///
    /// # Errors
    ///
    /// Returns error only for unrecoverable device failures in the wake gate
    pub async fn step(&mut self) -> Result<SessionState> {
        let next = if self.cancel.is_cancelled() {
            self.terminate()
        } else {
            match self.state {
                SessionState::Idle => SessionState::WakeWait,
                SessionState::WakeWait => self.wait_for_wake().await?,
                SessionState::ActiveRecord => self.record().await,
                SessionState::ActiveProcess => self.process().await,
                SessionState::ActiveSpeak => self.speak().await,
                SessionState::Terminated => SessionState::Terminated,
            }
        };

        if next != self.state {
            tracing::debug!(from = ?self.state, to = ?next, "state transition");
        }
        self.state = next;
        Ok(next)
    }

    async fn wait_for_wake(&mut self) -> Result<SessionState> {
        match self.gate.wait_for_wake(&*self.mic, &self.cancel).await? {
            WakeOutcome::Triggered => {
                let session = Session::start();
                tracing::info!(session_id = %session.id, "session started");
                self.emit(SessionEvent::WakeDetected {
                    session_id: session.id,
                });
                self.session = Some(session);
                Ok(SessionState::ActiveRecord)
            }
            WakeOutcome::Cancelled => Ok(self.terminate()),
        }
    }

    async fn record(&mut self) -> SessionState {
        let outcome = self.endpointer.record(&*self.mic, &self.cancel).await;
        let retries = self.policy.capture_retries;
        let session = self.session_mut();

        match outcome {
            Ok(RecordOutcome::Utterance(utterance)) => {
                session.capture_failures = 0;
                session.pending_utterance = Some(utterance);
                SessionState::ActiveProcess
            }
            Ok(RecordOutcome::NoSpeech) => {
                tracing::debug!("no speech, listening again");
                SessionState::ActiveRecord
            }
            Ok(RecordOutcome::Cancelled) => self.terminate(),
            Err(e) => {
                session.capture_failures += 1;
                let failures = session.capture_failures;
                tracing::warn!(error = %e, failures, retries, "capture failed");

                if failures > retries {
                    return self.close_session(EndReason::CaptureFailures(failures));
                }
                tokio::time::sleep(self.policy.capture_backoff).await;
                SessionState::ActiveRecord
            }
        }
    }

    async fn process(&mut self) -> SessionState {
        let Some(utterance) = self.session_mut().pending_utterance.take() else {
            return SessionState::ActiveRecord;
        };

        let deadlines = self.policy.deadlines;
        let transcript = with_deadline(
            "speech-to-text",
            deadlines.stt,
            self.services.transcriber.transcribe(utterance),
        )
        .await;

        let recognition = match transcript {
            Ok(Transcript::EndOfSession) => return self.close_session(EndReason::Transcriber),
            Ok(Transcript::Speech(recognition)) if !recognition.text.trim().is_empty() => {
                recognition
            }
            Ok(Transcript::Speech(_)) => {
                let e = Error::Stt("empty transcript".to_string());
                return self.skip_turn(&e, NOTICE_NOT_UNDERSTOOD).await;
            }
            Err(e) => return self.skip_turn(&e, NOTICE_NOT_UNDERSTOOD).await,
        };

        self.check_language(&recognition);
        let text = recognition.text;
        tracing::info!(text = %text, "heard");
        self.emit(SessionEvent::Heard { text: text.clone() });

        if let Some(phrase) = self.end_phrases.find(&text) {
            let phrase = phrase.into_owned();
            return self.close_session(EndReason::EndPhrase(phrase));
        }

        let context = match &self.services.retriever {
            Some(retriever) => {
                match with_deadline("search", deadlines.rag, retriever.search(&text)).await {
                    Ok(found) => found.answer,
                    Err(e) => return self.skip_turn(&e, NOTICE_NO_REPLY).await,
                }
            }
            None => None,
        };

        let reply = with_deadline(
            "language model",
            deadlines.llm,
            self.services.chat.complete(&text, context.as_deref()),
        )
        .await;

        match reply {
            Ok(reply) => {
                self.session_mut().pending_reply = Some(reply);
                SessionState::ActiveSpeak
            }
            Err(e) => self.skip_turn(&e, NOTICE_NO_REPLY).await,
        }
    }

    async fn speak(&mut self) -> SessionState {
        let Some(reply) = self.session_mut().pending_reply.take() else {
            return SessionState::ActiveRecord;
        };

        self.emit(SessionEvent::Replied {
            text: reply.clone(),
        });

        let spoken = speakable(&reply);
        let deadline = self.policy.deadlines.tts;
        match with_deadline(
            "speech synthesis",
            deadline,
            self.services.synthesizer.speak(&spoken),
        )
        .await
        {
            Ok(()) => self.session_mut().turns += 1,
            Err(e) => {
                tracing::warn!(error = %e, "reply playback failed");
                self.emit(SessionEvent::Notice {
                    message: NOTICE_NOT_SPOKEN.to_string(),
                });
            }
        }

        SessionState::ActiveRecord
    }

    /// Report a failed turn and go back to listening
    async fn skip_turn(&mut self, error: &Error, notice: &str) -> SessionState {
        tracing::warn!(error = %error, "turn skipped");
        self.emit(SessionEvent::Notice {
            message: notice.to_string(),
        });

        let deadline = self.policy.deadlines.tts;
        if let Err(e) = with_deadline(
            "speech synthesis",
            deadline,
            self.services.synthesizer.speak(notice),
        )
        .await
        {
            tracing::debug!(error = %e, "could not speak notice");
        }

        SessionState::ActiveRecord
    }

    fn check_language(&self, recognition: &Recognition) {
        let (Some(expected), Some(detected), Some(confidence)) = (
            self.policy.expected_language.as_deref(),
            recognition.language.as_deref(),
            recognition.confidence,
        ) else {
            return;
        };

        if !detected.eq_ignore_ascii_case(expected) && confidence > LANGUAGE_MISMATCH_CONFIDENCE {
            tracing::warn!(
                expected,
                detected,
                confidence,
                "speech language differs from configured language"
            );
            self.emit(SessionEvent::LanguageMismatch {
                expected: expected.to_string(),
                detected: detected.to_string(),
            });
        }
    }

    fn close_session(&mut self, reason: EndReason) -> SessionState {
        if let Some(session) = self.session.take() {
            tracing::info!(
                session_id = %session.id,
                turns = session.turns,
                ?reason,
                "session ended"
            );
            self.emit(SessionEvent::SessionEnded {
                session_id: session.id,
                reason,
                turns: session.turns,
            });
        }
        SessionState::Idle
    }

    fn terminate(&mut self) -> SessionState {
        if self.state != SessionState::Terminated {
            tracing::info!(state = ?self.state, "cancellation requested");
        }
        self.close_session(EndReason::Cancelled);
        SessionState::Terminated
    }

    fn session_mut(&mut self) -> &mut Session {
        self.session.get_or_insert_with(Session::start)
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            // Nobody listening is fine
            let _ = events.send(event);
        }
    }
}
