//! Turn loop integration tests
//!
//! Drives the orchestrator step by step with scripted audio and services

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use voice_tutor::services::Deadlines;
use voice_tutor::{EndReason, Error, SessionEvent, SessionPolicy, SessionState};

mod common;

use common::{
    HarnessBuilder, Heard, Read, RecordingSpeaker, ScriptedChat, ScriptedDetector, ScriptedMic,
    ScriptedSearch, speech,
};

#[tokio::test]
async fn test_full_turn() {
    let chat = ScriptedChat::new(vec![Ok(
        "**Richtig!** Man sagt: *Ich bin ins Kino gegangen.*".to_string(),
    )]);
    let mut h = HarnessBuilder::new(speech(3, 6))
        .heard(vec![Heard::Text("Ich bin ins Kino gegangen")])
        .chat(chat)
        .build();

    assert_eq!(h.orchestrator.state(), SessionState::Idle);
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::WakeWait);
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveRecord);
    assert!(h.orchestrator.session().is_some());
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveProcess);
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveSpeak);
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveRecord);

    assert_eq!(
        h.speaker.spoken(),
        vec!["Richtig! Man sagt: Ich bin ins Kino gegangen.".to_string()]
    );
    assert_eq!(
        h.chat.prompts(),
        vec![("Ich bin ins Kino gegangen".to_string(), None)]
    );
    assert_eq!(h.orchestrator.session().map(|s| s.turns), Some(1));

    let events = h.events();
    assert!(matches!(events[0], SessionEvent::WakeDetected { .. }));
    assert_eq!(
        events[1],
        SessionEvent::Heard {
            text: "Ich bin ins Kino gegangen".to_string()
        }
    );
    assert!(matches!(&events[2], SessionEvent::Replied { text } if text.starts_with("**Richtig!**")));
}

#[tokio::test]
async fn test_transcription_failure_keeps_session_open() {
    let mut h = HarnessBuilder::new(speech(3, 6))
        .heard(vec![Heard::Fail])
        .build();
    h.wake().await;

    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveProcess);
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveRecord);

    assert!(h.orchestrator.session().is_some());
    assert!(h.chat.prompts().is_empty());
    assert_eq!(h.speaker.spoken(), vec!["Sorry, I didn't catch that.".to_string()]);
    assert!(
        h.events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Notice { .. }))
    );
}

#[tokio::test]
async fn test_empty_transcript_is_a_failed_turn() {
    let mut h = HarnessBuilder::new(speech(3, 6))
        .heard(vec![Heard::Text("   ")])
        .build();
    h.wake().await;

    h.orchestrator.step().await.unwrap();
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveRecord);
    assert!(h.chat.prompts().is_empty());
}

#[tokio::test]
async fn test_silence_loops_back_to_recording() {
    let mut h = HarnessBuilder::new(Vec::new()).build();
    h.wake().await;

    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveRecord);
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveRecord);
    assert_eq!(h.transcriber.calls(), 0);
    assert_eq!(h.probe.open_now(), 0);
}

#[tokio::test]
async fn test_end_phrase_closes_session() {
    let mut h = HarnessBuilder::new(speech(3, 6))
        .heard(vec![Heard::Text("Okay, bye!")])
        .build();
    h.wake().await;

    h.orchestrator.step().await.unwrap();
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::Idle);
    assert!(h.orchestrator.session().is_none());
    assert!(h.chat.prompts().is_empty());

    let events = h.events();
    assert!(matches!(
        events.last(),
        Some(SessionEvent::SessionEnded {
            reason: EndReason::EndPhrase(phrase),
            turns: 0,
            ..
        }) if phrase == "bye"
    ));

    // Back to listening for the wake word
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::WakeWait);
}

#[tokio::test]
async fn test_end_phrase_inside_word_continues() {
    let mut h = HarnessBuilder::new(speech(3, 6))
        .heard(vec![Heard::Text("Was heißt goodbyeness?")])
        .build();
    h.wake().await;

    h.orchestrator.step().await.unwrap();
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveSpeak);
}

#[tokio::test]
async fn test_transcriber_can_end_session() {
    let mut h = HarnessBuilder::new(speech(3, 6))
        .heard(vec![Heard::EndOfSession])
        .build();
    h.wake().await;

    h.orchestrator.step().await.unwrap();
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::Idle);
    assert!(h.events().iter().any(|e| matches!(
        e,
        SessionEvent::SessionEnded {
            reason: EndReason::Transcriber,
            ..
        }
    )));
}

#[tokio::test]
async fn test_capture_failures_close_session_after_retries() {
    let mut h = HarnessBuilder::new(vec![Read::Fail; 4]).build();
    h.wake().await;

    for _ in 0..3 {
        assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveRecord);
    }
    assert_eq!(
        h.orchestrator.session().map(|s| s.capture_failures),
        Some(3)
    );
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::Idle);

    assert!(h.events().iter().any(|e| matches!(
        e,
        SessionEvent::SessionEnded {
            reason: EndReason::CaptureFailures(4),
            ..
        }
    )));
    assert_eq!(h.probe.open_now(), 0);
}

#[tokio::test]
async fn test_successful_capture_resets_failure_count() {
    let mut script = vec![Read::Fail, Read::Fail];
    script.extend(speech(3, 6));
    let mut h = HarnessBuilder::new(script)
        .heard(vec![Heard::Text("Hallo")])
        .build();
    h.wake().await;

    h.orchestrator.step().await.unwrap();
    h.orchestrator.step().await.unwrap();
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveProcess);
    assert_eq!(
        h.orchestrator.session().map(|s| s.capture_failures),
        Some(0)
    );
}

#[tokio::test]
async fn test_microphone_never_shared() {
    let mut script = speech(3, 6);
    script.extend(speech(2, 6));
    let mut h = HarnessBuilder::new(script)
        .heard(vec![Heard::Text("Wie geht's?"), Heard::Text("Tschüss Jarvis")])
        .build();

    for _ in 0..9 {
        h.orchestrator.step().await.unwrap();
        assert_eq!(h.probe.open_now(), 0);
    }

    // Gate, two recordings, gate again
    assert_eq!(h.orchestrator.state(), SessionState::ActiveRecord);
    assert_eq!(h.probe.opened(), 4);
    assert_eq!(h.probe.max_open(), 1);
}

#[tokio::test]
async fn test_language_model_failure_skips_turn() {
    let chat = ScriptedChat::new(vec![Err(Error::Llm("rate limited".to_string()))]);
    let mut h = HarnessBuilder::new(speech(3, 6))
        .heard(vec![Heard::Text("Erzähl mir einen Witz")])
        .chat(chat)
        .build();
    h.wake().await;

    h.orchestrator.step().await.unwrap();
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveRecord);
    assert_eq!(
        h.speaker.spoken(),
        vec!["Sorry, I couldn't come up with a reply. Please try again.".to_string()]
    );
    assert_eq!(h.orchestrator.session().map(|s| s.turns), Some(0));
}

#[tokio::test]
async fn test_playback_failure_keeps_session_open() {
    let mut h = HarnessBuilder::new(speech(3, 6))
        .heard(vec![Heard::Text("Hallo")])
        .speaker(RecordingSpeaker::failing())
        .build();
    h.wake().await;

    h.orchestrator.step().await.unwrap();
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveSpeak);
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveRecord);

    // Reply attempted once; no spoken notice after a speech failure
    assert_eq!(h.speaker.spoken().len(), 1);
    assert!(
        h.events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Notice { .. }))
    );
    assert_eq!(h.orchestrator.session().map(|s| s.turns), Some(0));
}

#[tokio::test]
async fn test_search_answer_is_passed_as_context() {
    let mut h = HarnessBuilder::new(speech(3, 6))
        .heard(vec![Heard::Text("Wer hat gestern gewonnen?")])
        .search(ScriptedSearch(Some("Bayern won 2-1.")))
        .build();
    h.wake().await;

    h.orchestrator.step().await.unwrap();
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveSpeak);
    assert_eq!(
        h.chat.prompts(),
        vec![(
            "Wer hat gestern gewonnen?".to_string(),
            Some("Bayern won 2-1.".to_string())
        )]
    );
}

#[tokio::test]
async fn test_search_failure_skips_turn() {
    let mut h = HarnessBuilder::new(speech(3, 6))
        .heard(vec![Heard::Text("Wie ist das Wetter?")])
        .search(ScriptedSearch(None))
        .build();
    h.wake().await;

    h.orchestrator.step().await.unwrap();
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveRecord);
    assert!(h.chat.prompts().is_empty());
}

#[tokio::test]
async fn test_hung_transcriber_times_out() {
    let policy = SessionPolicy {
        capture_backoff: Duration::ZERO,
        deadlines: Deadlines {
            stt: Duration::from_millis(20),
            ..Deadlines::default()
        },
        ..SessionPolicy::default()
    };
    let mut h = HarnessBuilder::new(speech(3, 6))
        .heard(vec![Heard::Hang])
        .policy(policy)
        .build();
    h.wake().await;

    h.orchestrator.step().await.unwrap();
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveRecord);
    assert!(h.orchestrator.session().is_some());
}

#[tokio::test]
async fn test_language_mismatch_does_not_block_turn() {
    let policy = SessionPolicy {
        capture_backoff: Duration::ZERO,
        expected_language: Some("de".to_string()),
        ..SessionPolicy::default()
    };
    let mut h = HarnessBuilder::new(speech(3, 6))
        .heard(vec![Heard::Detected {
            text: "How do I say apple?",
            language: "en",
            confidence: 0.97,
        }])
        .policy(policy)
        .build();
    h.wake().await;

    h.orchestrator.step().await.unwrap();
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::ActiveSpeak);

    let events = h.events();
    assert!(events.contains(&SessionEvent::LanguageMismatch {
        expected: "de".to_string(),
        detected: "en".to_string(),
    }));
    assert!(events.contains(&SessionEvent::Heard {
        text: "How do I say apple?".to_string(),
    }));
}

#[tokio::test]
async fn test_confident_matching_language_is_not_flagged() {
    let policy = SessionPolicy {
        capture_backoff: Duration::ZERO,
        expected_language: Some("de".to_string()),
        ..SessionPolicy::default()
    };
    let mut h = HarnessBuilder::new(speech(3, 6).into_iter().chain(speech(3, 6)).collect())
        .heard(vec![
            Heard::Detected {
                text: "Wie sagt man apple?",
                language: "DE",
                confidence: 0.99,
            },
            Heard::Detected {
                text: "Hello there",
                language: "en",
                confidence: 0.3,
            },
        ])
        .policy(policy)
        .build();
    h.wake().await;

    for _ in 0..6 {
        h.orchestrator.step().await.unwrap();
    }

    assert_eq!(h.transcriber.calls(), 2);
    assert!(
        !h.events()
            .iter()
            .any(|e| matches!(e, SessionEvent::LanguageMismatch { .. }))
    );
}

#[tokio::test]
async fn test_cancel_during_session_terminates() {
    let mut h = HarnessBuilder::new(speech(3, 6))
        .heard(vec![Heard::Text("Hallo")])
        .build();
    h.wake().await;
    h.orchestrator.step().await.unwrap();

    h.cancel.cancel();
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::Terminated);
    assert!(h.orchestrator.session().is_none());
    assert_eq!(h.transcriber.calls(), 0);
    assert!(h.events().iter().any(|e| matches!(
        e,
        SessionEvent::SessionEnded {
            reason: EndReason::Cancelled,
            ..
        }
    )));

    // Terminal
    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::Terminated);
}

#[tokio::test]
async fn test_run_stops_when_cancelled_while_waiting() {
    let cancel = CancellationToken::new();
    let mic = ScriptedMic::new(Vec::new()).cancel_after(3, cancel.clone());
    let probe = mic.probe();
    let mut h = HarnessBuilder::new(Vec::new())
        .mic(mic)
        .detector(ScriptedDetector::never())
        .build_with(cancel);

    h.orchestrator.run().await.unwrap();

    assert_eq!(h.orchestrator.state(), SessionState::Terminated);
    assert_eq!(probe.reads(), 3);
    assert_eq!(probe.open_now(), 0);
    assert!(h.events().is_empty());
}

#[tokio::test]
async fn test_missing_microphone_is_fatal() {
    let mut h = HarnessBuilder::new(Vec::new())
        .mic(ScriptedMic::unavailable())
        .build();

    assert_eq!(h.orchestrator.step().await.unwrap(), SessionState::WakeWait);
    assert!(matches!(
        h.orchestrator.step().await,
        Err(Error::Device(_))
    ));
}
