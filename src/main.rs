use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use voice_tutor::config::{ApiKeys, TtsConfig};
use voice_tutor::format::{has_markdown, speakable};
use voice_tutor::services::{
    ChatClient, Retriever, SpokenOutput, SttProvider, Synthesizer, TavilySearch, TextToSpeech,
    Transcriber, TtsProvider, WhisperTranscriber,
};
use voice_tutor::voice::{
    AudioPlayback, CpalMicrophone, Microphone, PLAYBACK_SAMPLE_RATE, SAMPLE_RATE, SpeechEndpointer,
    StreamSpec, TranscriptWakeDetector, WakeWordGate,
};
use voice_tutor::{
    Collaborators, Config, EndPhraseMatcher, EndReason, SessionEvent, TurnOrchestrator,
};

/// Voice Tutor - talk to a language tutor, hands-free
#[derive(Parser)]
#[command(name = "tutor", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/voice-tutor/config.toml)
    #[arg(short, long, env = "TUTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input and print per-second energy
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hallo! Das ist ein Test der Sprachausgabe.")]
        text: String,
    },
    /// Print the end phrases that close a session
    Phrases,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Keys may live in a local .env
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voice_tutor=info",
        1 => "info,voice_tutor=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&config, &text).await,
            Command::Phrases => print_phrases(&config),
        };
    }

    run_session(config).await
}

/// Wire the collaborators and run the voice loop until Ctrl+C
#[allow(clippy::future_not_send)]
async fn run_session(config: Config) -> anyhow::Result<()> {
    let policy = config.session_policy();
    let end_phrases = EndPhraseMatcher::compile(config.end_phrases())?;
    let keys = &config.api_keys;

    let stt_key = match config.stt.provider {
        SttProvider::Whisper => required(keys.openai.as_ref(), "OPENAI_API_KEY")?,
        SttProvider::Deepgram => required(keys.deepgram.as_ref(), "DEEPGRAM_API_KEY")?,
    };
    let transcriber: Arc<dyn Transcriber> = Arc::new(WhisperTranscriber::new(
        config.stt.provider,
        stt_key,
        config.stt.model.clone(),
        config.stt.language.clone(),
    )?);

    let detector = TranscriptWakeDetector::new(
        &config.wake.word,
        config.wake.sensitivity,
        config.recording.sample_rate,
        Arc::clone(&transcriber),
    )?
    .with_timeout(policy.deadlines.stt);
    let gate = WakeWordGate::new(config.wake.word.clone(), Box::new(detector));
    let endpointer = SpeechEndpointer::new(config.recording.clone());

    let chat_key = required(config.chat_api_key(), "GROQ_API_KEY")?;
    let chat = ChatClient::new(
        chat_key,
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        config.llm.temperature,
        config.llm.max_tokens,
    )?;

    let retriever: Option<Box<dyn Retriever>> = match (config.rag.enabled, keys.tavily.as_ref()) {
        (true, Some(key)) => Some(Box::new(TavilySearch::new(
            copy_secret(key),
            config.rag.search_depth.clone(),
            config.rag.max_results,
        )?)),
        (true, None) => {
            tracing::warn!("web search enabled but TAVILY_API_KEY is not set, continuing without");
            None
        }
        (false, _) => None,
    };

    let synthesizer = spoken_output(&config.tts, keys)?;
    let mic = CpalMicrophone::new()?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let (events, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let mut orchestrator = TurnOrchestrator::new(
        Box::new(mic),
        gate,
        endpointer,
        end_phrases,
        Collaborators {
            transcriber,
            retriever,
            chat: Box::new(chat),
            synthesizer: Box::new(synthesizer),
        },
        policy,
        cancel,
    )
    .with_events(events);

    tracing::info!(
        wake_word = %config.wake.word,
        llm = %config.llm.model,
        language = config.stt.language.as_deref().unwrap_or("auto"),
        web_search = config.rag.enabled,
        "voice tutor ready - say \"{}\"",
        config.wake.word
    );

    let result = orchestrator.run().await;
    drop(orchestrator);
    printer.await.ok();
    result?;

    println!("\nBis bald!");
    Ok(())
}

/// Render session events for the terminal
fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::WakeDetected { .. } => {
            println!("\n--- Listening (say \"bye\" to finish) ---");
        }
        SessionEvent::Heard { text } => println!("\nYou: {text}"),
        SessionEvent::Replied { text } if has_markdown(text) => {
            println!("\nTutor:\n{}\n", text.trim_end());
        }
        SessionEvent::Replied { text } => println!("\nTutor: {}", text.trim()),
        SessionEvent::Notice { message } => println!("\n! {message}"),
        SessionEvent::LanguageMismatch { expected, detected } => {
            println!("\n! Heard {detected}, expected {expected}");
        }
        SessionEvent::SessionEnded { reason, turns, .. } => {
            let why = match reason {
                EndReason::EndPhrase(phrase) => format!("heard \"{phrase}\""),
                EndReason::Transcriber => "end of conversation".to_string(),
                EndReason::CaptureFailures(n) => format!("{n} microphone failures"),
                EndReason::Cancelled => "interrupted".to_string(),
            };
            println!("\n--- Session ended: {why}, {turns} turn(s) ---");
        }
    }
}

/// Build TTS with playback from config
fn spoken_output(tts: &TtsConfig, keys: &ApiKeys) -> anyhow::Result<SpokenOutput> {
    let key = match tts.provider {
        TtsProvider::OpenAI => required(keys.openai.as_ref(), "OPENAI_API_KEY")?,
        TtsProvider::ElevenLabs => required(keys.elevenlabs.as_ref(), "ELEVENLABS_API_KEY")?,
    };
    let engine = TextToSpeech::new(
        tts.provider,
        key,
        tts.model.clone(),
        tts.voice.clone(),
        tts.speed,
    )?;
    Ok(SpokenOutput::new(engine, AudioPlayback::new()?))
}

fn required(key: Option<&SecretString>, name: &str) -> anyhow::Result<SecretString> {
    key.map(copy_secret)
        .ok_or_else(|| anyhow::anyhow!("{name} is not set (env or [api_keys] in config)"))
}

fn copy_secret(key: &SecretString) -> SecretString {
    SecretString::from(key.expose_secret().to_owned())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let threshold = config.recording.energy_threshold;
    let mic = CpalMicrophone::new()?;
    // One frame per second
    let mut stream = mic.open(StreamSpec {
        sample_rate: SAMPLE_RATE,
        frame_length: SAMPLE_RATE as usize,
    })?;

    println!("Sample rate: {SAMPLE_RATE} Hz, speech threshold: {threshold:.0}");
    println!("---");

    for i in 0..duration {
        let frame = stream.read_frame().await?;
        let energy = frame.energy();
        let peak = frame
            .samples()
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .unwrap_or(0);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy / 20.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
        let marker = if energy > threshold { "speech" } else { "" };

        println!(
            "[{:2}s] energy: {:7.1} | peak: {:5} | [{}] {}",
            i + 1,
            energy,
            peak,
            meter,
            marker
        );
    }
    drop(stream);

    println!("\n---");
    println!("Speech should rise well above {threshold:.0} while silence stays below it.");
    println!("Adjust [recording] energy_threshold if it does not.");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    let frequency = 440.0_f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!(
        "Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz on {}...",
        samples.len(),
        playback.device_name()
    );

    playback.play(samples, PLAYBACK_SAMPLE_RATE).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

/// Test TTS output
#[allow(clippy::future_not_send)]
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let mut output = spoken_output(&config.tts, &config.api_keys)?;
    output.speak(&speakable(text)).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Print the compiled end phrase list
fn print_phrases(config: &Config) -> anyhow::Result<()> {
    let matcher = EndPhraseMatcher::compile(config.end_phrases())?;
    println!("Sessions end when you say any of:\n");
    for phrase in matcher.phrases() {
        println!("  {phrase}");
    }
    Ok(())
}
