//! Shared test utilities
//!
//! Scripted stand-ins for the microphone, the wake word detector and the
//! external services, so the voice loop can be driven without hardware or
//! network access.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voice_tutor::config::RecordingConfig;
use voice_tutor::services::{
    ChatModel, Recognition, Retriever, SearchAnswer, Synthesizer, Transcriber, Transcript,
};
use voice_tutor::voice::{
    AudioFrame, MicStream, Microphone, SpeechEndpointer, StreamSpec, Utterance,
    WakeWordDetector, WakeWordGate,
};
use voice_tutor::{
    Collaborators, EndPhraseMatcher, Error, Result, SessionEvent, SessionPolicy,
    TurnOrchestrator,
};

/// Amplitude of a frame that counts as speech
pub const LOUD: i16 = 1000;

/// Amplitude of a frame that counts as silence
pub const QUIET: i16 = 20;

/// One scripted microphone read
#[derive(Debug, Clone, Copy)]
pub enum Read {
    /// A frame with every sample at this amplitude
    Level(i16),
    /// A device failure
    Fail,
}

/// `n` speech frames followed by enough silence to end an utterance
#[must_use]
pub fn speech(loud: usize, quiet: usize) -> Vec<Read> {
    let mut reads = vec![Read::Level(LOUD); loud];
    reads.extend(std::iter::repeat_n(Read::Level(QUIET), quiet));
    reads
}

/// Counters shared between a scripted microphone and its streams
#[derive(Debug, Clone, Default)]
pub struct MicProbe {
    opened: Arc<AtomicUsize>,
    open_now: Arc<AtomicUsize>,
    max_open: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl MicProbe {
    /// Streams opened so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Streams currently open
    pub fn open_now(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    /// Most streams ever open at the same time
    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    /// Frames read across all streams
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn open(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
    }

    fn close(&self) {
        self.open_now.fetch_sub(1, Ordering::SeqCst);
    }

    fn read(&self) -> usize {
        self.reads.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Microphone that replays a script of reads, then silence
pub struct ScriptedMic {
    script: Arc<Mutex<VecDeque<Read>>>,
    probe: MicProbe,
    fail_open: bool,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl ScriptedMic {
    pub fn new(script: Vec<Read>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            probe: MicProbe::default(),
            fail_open: false,
            cancel_after: None,
        }
    }

    /// A microphone whose device cannot be opened
    pub fn unavailable() -> Self {
        Self {
            fail_open: true,
            ..Self::new(Vec::new())
        }
    }

    /// Cancel `token` during the `reads`-th frame read
    pub fn cancel_after(mut self, reads: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((reads, token));
        self
    }

    pub fn probe(&self) -> MicProbe {
        self.probe.clone()
    }
}

impl Microphone for ScriptedMic {
    fn open(&self, spec: StreamSpec) -> Result<Box<dyn MicStream>> {
        if self.fail_open {
            return Err(Error::Device("no input device available".to_string()));
        }
        self.probe.open();
        Ok(Box::new(ScriptedStream {
            script: Arc::clone(&self.script),
            probe: self.probe.clone(),
            spec,
            cancel_after: self.cancel_after.clone(),
        }))
    }
}

struct ScriptedStream {
    script: Arc<Mutex<VecDeque<Read>>>,
    probe: MicProbe,
    spec: StreamSpec,
    cancel_after: Option<(usize, CancellationToken)>,
}

#[async_trait(?Send)]
impl MicStream for ScriptedStream {
    async fn read_frame(&mut self) -> Result<AudioFrame> {
        let n = self.probe.read();
        if let Some((after, token)) = &self.cancel_after {
            if n >= *after {
                token.cancel();
            }
        }

        let next = self.script.lock().unwrap().pop_front();
        match next.unwrap_or(Read::Level(0)) {
            Read::Level(amplitude) => Ok(AudioFrame::new(
                vec![amplitude; self.spec.frame_length],
                self.spec.sample_rate,
            )),
            Read::Fail => Err(Error::Device("scripted read failure".to_string())),
        }
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.probe.close();
    }
}

/// Detector that fires on a fixed frame, or never
pub struct ScriptedDetector {
    fire_on: Option<usize>,
    seen: usize,
}

impl ScriptedDetector {
    /// Fire on the `n`-th frame processed since the last reset
    pub fn fires_on(n: usize) -> Self {
        Self {
            fire_on: Some(n),
            seen: 0,
        }
    }

    pub fn never() -> Self {
        Self {
            fire_on: None,
            seen: 0,
        }
    }
}

#[async_trait(?Send)]
impl WakeWordDetector for ScriptedDetector {
    fn frame_length(&self) -> usize {
        512
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    async fn process(&mut self, _frame: &AudioFrame) -> Result<i32> {
        self.seen += 1;
        Ok(if Some(self.seen) == self.fire_on { 0 } else { -1 })
    }

    fn reset(&mut self) {
        self.seen = 0;
    }
}

/// 16 kHz recording with 0.1 s frames: 5 silence frames, 20 frame cap
pub fn recording_config() -> RecordingConfig {
    RecordingConfig {
        sample_rate: 16000,
        frame_size: 1600,
        energy_threshold: 200.0,
        silence_secs: 0.5,
        max_secs: 2.0,
    }
}

/// One scripted transcriber reply
#[derive(Debug, Clone)]
pub enum Heard {
    Text(&'static str),
    Detected {
        text: &'static str,
        language: &'static str,
        confidence: f32,
    },
    EndOfSession,
    Fail,
    Hang,
}

/// Transcriber replaying scripted replies
#[derive(Default)]
pub struct ScriptedTranscriber {
    replies: Mutex<VecDeque<Heard>>,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(replies: Vec<Heard>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait(?Send)]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, utterance: Utterance) -> Result<Transcript> {
        assert!(!utterance.samples().is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);

        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Heard::Text(text)) => Ok(Transcript::Speech(Recognition::new(text))),
            Some(Heard::Detected {
                text,
                language,
                confidence,
            }) => Ok(Transcript::Speech(
                Recognition::new(text).with_language(language, Some(confidence)),
            )),
            Some(Heard::EndOfSession) => Ok(Transcript::EndOfSession),
            Some(Heard::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(Error::Stt("hung".to_string()))
            }
            Some(Heard::Fail) | None => Err(Error::Stt("recognizer unavailable".to_string())),
        }
    }
}

/// Chat model that records prompts and replays replies
#[derive(Clone, Default)]
pub struct ScriptedChat {
    replies: Arc<Mutex<VecDeque<Result<String>>>>,
    prompts: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl ScriptedChat {
    pub fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            prompts: Arc::default(),
        }
    }

    /// `(user_text, context)` of every call
    pub fn prompts(&self) -> Vec<(String, Option<String>)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait(?Send)]
impl ChatModel for ScriptedChat {
    async fn complete(&self, user_text: &str, context: Option<&str>) -> Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((user_text.to_string(), context.map(ToString::to_string)));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Sehr gut!".to_string()))
    }
}

/// Search that returns a fixed answer or fails
pub struct ScriptedSearch(pub Option<&'static str>);

#[async_trait(?Send)]
impl Retriever for ScriptedSearch {
    async fn search(&self, _query: &str) -> Result<SearchAnswer> {
        match self.0 {
            Some(answer) => Ok(SearchAnswer {
                answer: Some(answer.to_string()),
                results: Vec::new(),
            }),
            None => Err(Error::Rag("search unavailable".to_string())),
        }
    }
}

/// Synthesizer that records what it was asked to say
#[derive(Clone, Default)]
pub struct RecordingSpeaker {
    spoken: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingSpeaker {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait(?Send)]
impl Synthesizer for RecordingSpeaker {
    async fn speak(&mut self, text: &str) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(Error::Tts("speaker unplugged".to_string()));
        }
        Ok(())
    }
}

/// A fully scripted orchestrator plus handles to observe it
pub struct Harness {
    pub orchestrator: TurnOrchestrator,
    pub probe: MicProbe,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub chat: ScriptedChat,
    pub speaker: RecordingSpeaker,
    pub cancel: CancellationToken,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Harness {
    /// Events published so far
    pub fn events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Step until the session is open (Idle → WakeWait → ActiveRecord)
    pub async fn wake(&mut self) {
        self.orchestrator.step().await.unwrap();
        self.orchestrator.step().await.unwrap();
    }
}

/// Builder for [`Harness`]
pub struct HarnessBuilder {
    script: Vec<Read>,
    heard: Vec<Heard>,
    chat: ScriptedChat,
    speaker: RecordingSpeaker,
    search: Option<ScriptedSearch>,
    policy: SessionPolicy,
    mic: Option<ScriptedMic>,
    detector: Option<ScriptedDetector>,
}

impl HarnessBuilder {
    /// Gate fires on the first frame; `script` is read after that
    pub fn new(script: Vec<Read>) -> Self {
        let mut reads = vec![Read::Level(0)];
        reads.extend(script);
        Self {
            script: reads,
            heard: Vec::new(),
            chat: ScriptedChat::default(),
            speaker: RecordingSpeaker::default(),
            search: None,
            policy: SessionPolicy {
                capture_backoff: Duration::ZERO,
                ..SessionPolicy::default()
            },
            mic: None,
            detector: None,
        }
    }

    pub fn heard(mut self, heard: Vec<Heard>) -> Self {
        self.heard = heard;
        self
    }

    pub fn chat(mut self, chat: ScriptedChat) -> Self {
        self.chat = chat;
        self
    }

    pub fn speaker(mut self, speaker: RecordingSpeaker) -> Self {
        self.speaker = speaker;
        self
    }

    pub fn search(mut self, search: ScriptedSearch) -> Self {
        self.search = Some(search);
        self
    }

    pub fn policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use a prepared microphone instead of the script
    pub fn mic(mut self, mic: ScriptedMic) -> Self {
        self.mic = Some(mic);
        self
    }

    /// Replace the detector that fires on the first frame
    pub fn detector(mut self, detector: ScriptedDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn build(self) -> Harness {
        self.build_with(CancellationToken::new())
    }

    pub fn build_with(self, cancel: CancellationToken) -> Harness {
        let mic = self.mic.unwrap_or_else(|| ScriptedMic::new(self.script));
        let probe = mic.probe();
        let transcriber = Arc::new(ScriptedTranscriber::new(self.heard));
        let detector = self
            .detector
            .unwrap_or_else(|| ScriptedDetector::fires_on(1));
        let gate = WakeWordGate::new("jarvis", Box::new(detector));
        let end_phrases =
            EndPhraseMatcher::compile(voice_tutor::session::phrases_for(
                &["bye".to_string(), "auf wiedersehen".to_string()],
                "jarvis",
            ))
            .unwrap();
        let (tx, events) = mpsc::unbounded_channel();

        let orchestrator = TurnOrchestrator::new(
            Box::new(mic),
            gate,
            SpeechEndpointer::new(recording_config()),
            end_phrases,
            Collaborators {
                transcriber: Arc::clone(&transcriber) as Arc<dyn Transcriber>,
                retriever: self
                    .search
                    .map(|s| Box::new(s) as Box<dyn Retriever>),
                chat: Box::new(self.chat.clone()),
                synthesizer: Box::new(self.speaker.clone()),
            },
            self.policy,
            cancel.clone(),
        )
        .with_events(tx);

        Harness {
            orchestrator,
            probe,
            transcriber,
            chat: self.chat,
            speaker: self.speaker,
            cancel,
            events,
        }
    }
}
