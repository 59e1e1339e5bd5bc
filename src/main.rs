use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use courtside::audio::{AudioPlayback, CaptureHandle, play_encoded};
use courtside::config::SAMPLE_RATE;
use courtside::{Config, TtsClient, shell};

/// Courtside - voice and text chat assistant with a sports persona
#[derive(Parser)]
#[command(name = "courtside", version, about)]
struct Cli {
    /// Open the windowed GUI instead of the terminal loop
    #[arg(long, env = "COURTSIDE_GUI")]
    gui: bool,

    /// Enable voice capture and spoken replies
    #[arg(long, env = "COURTSIDE_VOICE")]
    voice: bool,

    /// Path to a persona JSON file (defaults to the embedded sports persona)
    #[arg(short, long, env = "COURTSIDE_PERSONA")]
    persona: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test speech synthesis end to end
    TestTts {
        /// Text to speak
        #[arg(default_value = "Let's talk sports!")]
        text: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,courtside=info",
        1 => "info,courtside=debug",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => runtime.block_on(test_mic(duration)),
            Command::TestSpeaker => test_speaker(),
            Command::TestTts { text } => runtime.block_on(test_tts(cli.persona.as_deref(), &text)),
        };
    }

    // Fatal configuration errors surface here, before any session starts.
    let config = Config::load(cli.persona.as_deref())?;
    config.api_keys.require_groq()?;
    if cli.voice {
        config.api_keys.require_deepgram()?;
    }

    tracing::info!(
        persona = %config.persona.id,
        gui = cli.gui,
        voice = cli.voice,
        "starting courtside"
    );

    if cli.gui {
        shell::gui::run(&runtime, config, cli.voice)?;
    } else {
        runtime.block_on(shell::terminal::run(config, cli.voice))?;
    }

    Ok(())
}

/// Test microphone input with a level meter
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    // 100 ms chunks give the meter a usable refresh rate.
    let chunk_samples = SAMPLE_RATE as usize / 10;
    let (tx, mut rx) = tokio::sync::mpsc::channel(32);
    let suppress = Arc::new(AtomicBool::new(false));
    let mut capture = CaptureHandle::spawn(SAMPLE_RATE, chunk_samples, suppress, tx)?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    loop {
        tokio::select! {
            chunk = rx.recv() => {
                let Some(chunk) = chunk else { break };
                let samples: Vec<f32> = chunk
                    .chunks_exact(2)
                    .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
                    .collect();
                let energy = calculate_rms(&samples);
                let peak = samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max);

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let meter_len = (energy * 100.0).min(50.0) as usize;
                let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);
                println!("RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
            }
            () = tokio::time::sleep_until(deadline) => break,
        }
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;
    let sample_rate = playback.sample_rate();

    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    let abort = Arc::new(AtomicBool::new(false));
    playback.play(&samples, sample_rate, 1.0, &abort)?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test speech synthesis end to end
async fn test_tts(persona: Option<&std::path::Path>, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load(persona)?;
    let api_key = config.api_keys.require_groq()?;
    let tts = TtsClient::new(api_key, config.chat.base_url.clone(), &config.voice)?;

    println!("Synthesizing speech...");
    let audio = tts.synthesize(text).await?;
    println!("Got {} bytes of audio data", audio.len());

    println!("Playing audio...");
    let abort = Arc::new(AtomicBool::new(false));
    play_encoded(&audio, tts.format(), config.voice.tts_speed, &abort)?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
