use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use cocoro_voice::db::{self, SpeakerRepo};
use cocoro_voice::models::{self, ModelPool};
use cocoro_voice::voice::{
    AudioCaptureSource, PcmChunk, read_wav_file, samples_to_wav, stt_from_config,
};
use cocoro_voice::{
    Config, SpeakerIdentification, SpeakerRegistry, VoiceEvent, VoicePipeline,
};

/// Cocoro Voice - real-time voice pipeline for a desktop companion
#[derive(Parser)]
#[command(name = "cocoro-voice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Start in the active state instead of waiting for a wake word
    #[arg(long, env = "COCORO_START_ACTIVE")]
    active: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Listen and print recognized speech (default)
    Listen,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Save the captured audio as a WAV file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Manage enrolled speakers
    Speakers {
        #[command(subcommand)]
        command: SpeakersCommand,
    },
}

#[derive(Subcommand)]
enum SpeakersCommand {
    /// Enroll a speaker from a WAV recording
    Enroll {
        /// Speaker ID; generated when omitted
        #[arg(long)]
        id: Option<String>,
        /// Display name
        #[arg(long)]
        name: String,
        /// 16 kHz mono 16-bit WAV file
        wav: PathBuf,
    },
    /// List enrolled speakers
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an enrolled speaker
    Delete {
        /// Speaker ID
        id: String,
    },
    /// Identify the speaker of a WAV recording
    Identify {
        /// 16 kHz mono 16-bit WAV file
        wav: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,cocoro_voice=info",
        1 => "info,cocoro_voice=debug",
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

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    if cli.active {
        config.voice.start_active = true;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Listen) {
        Command::Listen => listen(&config).await,
        Command::TestMic { duration, save } => test_mic(&config, duration, save.as_deref()).await,
        Command::Speakers { command } => speakers(&config, command),
    }
}

/// Run the pipeline until interrupted
async fn listen(config: &Config) -> anyhow::Result<()> {
    let models = ModelPool::onnx(&config.models)?;
    let stt = stt_from_config(&config.stt)?;

    let speaker = if config.speaker.enabled {
        match models.speaker_model() {
            Some(model) => {
                let pool = db::init(config.database_path())?;
                Some(SpeakerIdentification {
                    registry: Arc::new(SpeakerRegistry::new(
                        SpeakerRepo::new(pool),
                        model,
                        config.speaker.threshold,
                    )),
                    policy: config.speaker.on_failure,
                })
            }
            None => {
                tracing::warn!("speaker identification enabled but no speaker model configured");
                None
            }
        }
    } else {
        None
    };

    let source = Box::new(AudioCaptureSource::new(config.voice.chunk_ms));
    let mut pipeline = VoicePipeline::new(&config.voice, models, stt, speaker, source)?;
    let mut events = pipeline.subscribe();
    pipeline.start_listening()?;

    if config.voice.start_active {
        tracing::info!("cocoro ready - speak freely");
    } else if config.voice.wake_words.is_empty() {
        tracing::warn!("no wake words configured, set COCORO_WAKE_WORDS or pass --active");
    } else {
        tracing::info!(wake_words = ?config.voice.wake_words, "cocoro ready - say a wake word");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event consumer lagging");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    pipeline.stop_listening();
    Ok(())
}

fn print_event(event: &VoiceEvent) {
    match event {
        VoiceEvent::RecognizedText(text) => println!("> {text}"),
        VoiceEvent::StateChanged(state) => println!("[{state:?}]"),
        VoiceEvent::SpeakerIdentified {
            speaker_name,
            confidence,
            ..
        } => println!("(speaker: {speaker_name}, {confidence:.2})"),
        VoiceEvent::DeviceError(message) => eprintln!("audio device error: {message}"),
        VoiceEvent::VoiceLevel {
            level,
            is_above_threshold,
        } => tracing::trace!(level, is_above_threshold, "voice level"),
    }
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64, save: Option<&Path>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PcmChunk>();
    let mut capture = AudioCaptureSource::new(config.voice.chunk_ms);
    capture.start(
        Box::new(move |chunk| {
            let _ = tx.send(chunk);
        }),
        Box::new(|message| eprintln!("audio device error: {message}")),
    )?;

    println!("Sample rate: {} Hz", cocoro_voice::voice::SAMPLE_RATE);
    println!("---");

    let mut recording: Vec<i16> = Vec::new();
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut second: Vec<i16> = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            second.extend(chunk.samples());
        }

        let level = PcmChunk::from_samples(&second).rms();
        let peak = second
            .iter()
            .map(|s| f32::from(s.unsigned_abs()) / 32768.0)
            .fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (level * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {level:.4} | Peak: {peak:.4} | [{meter}]", i + 1);

        if save.is_some() {
            recording.extend_from_slice(&second);
        }
    }

    capture.stop();

    if let Some(path) = save {
        std::fs::write(path, samples_to_wav(&recording)?)?;
        println!("\nSaved {} to {}", humanize_samples(recording.len()), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn humanize_samples(samples: usize) -> String {
    format!(
        "{:.1}s of audio",
        samples as f64 / f64::from(cocoro_voice::voice::SAMPLE_RATE)
    )
}

/// Speaker registry management
fn speakers(config: &Config, command: SpeakersCommand) -> anyhow::Result<()> {
    let pool = db::init(config.database_path())?;
    let repo = SpeakerRepo::new(pool);

    match command {
        SpeakersCommand::List { json } => {
            let speakers = repo.list()?;
            if json {
                let entries: Vec<_> = speakers
                    .iter()
                    .map(|(id, name)| serde_json::json!({ "speaker_id": id, "speaker_name": name }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if speakers.is_empty() {
                println!("No speakers enrolled");
            } else {
                for (id, name) in speakers {
                    println!("{id}\t{name}");
                }
            }
        }
        SpeakersCommand::Delete { id } => {
            if repo.delete(&id)? {
                println!("Deleted speaker {id}");
            } else {
                println!("No speaker with id {id}");
            }
        }
        SpeakersCommand::Enroll { id, name, wav } => {
            let registry = registry(config, repo)?;
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            registry.register(&id, &name, &read_wav_file(&wav)?)?;
            println!("Enrolled {name} as {id}");
        }
        SpeakersCommand::Identify { wav } => {
            let registry = registry(config, repo)?;
            let found = registry.identify(&read_wav_file(&wav)?)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "speaker_id": found.speaker_id,
                    "speaker_name": found.speaker_name,
                    "confidence": found.confidence,
                }))?
            );
        }
    }

    Ok(())
}

fn registry(config: &Config, repo: SpeakerRepo) -> anyhow::Result<SpeakerRegistry> {
    let model = models::load_speaker_model(&config.models)?
        .ok_or_else(|| anyhow::anyhow!("no speaker model configured (set COCORO_SPEAKER_MODEL)"))?;
    Ok(SpeakerRegistry::new(repo, model, config.speaker.threshold))
}
