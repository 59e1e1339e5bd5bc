//! Configuration management
//!
//! Layering is env > TOML file > persona > built-in default. The optional
//! config file lives at `~/.config/courtside/config.toml`; every field in
//! it is a partial overlay. API credentials are sourced exclusively from
//! the environment or the config file, never from literals.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::persona::Persona;
use crate::tts::AudioFormat;
use crate::{Error, Result};

/// Capture/transcription sample rate (16 kHz, single channel, 16-bit)
pub const SAMPLE_RATE: u32 = 16_000;

/// Audio chunk size forwarded to the transcriber (500 ms at 16 kHz)
pub const DEFAULT_CHUNK_SAMPLES: usize = 8_000;

/// Silence gap that closes an utterance
pub const DEFAULT_SILENCE_MS: u64 = 2_000;

/// Silence poll interval; the practical resolution of turn-boundary detection
pub const DEFAULT_POLL_MS: u64 = 100;

/// Default chat completion endpoint (OpenAI-compatible)
pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Courtside configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Active persona
    pub persona: Persona,

    /// Chat completion tuning
    pub chat: ChatConfig,

    /// Voice capture/transcription/synthesis tuning
    pub voice: VoiceConfig,

    /// API credentials
    pub api_keys: ApiKeys,
}

/// Chat completion configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL of the OpenAI-compatible API
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Nucleus sampling parameter
    pub top_p: f32,

    /// Response token cap
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CHAT_BASE_URL.to_string(),
            model: "llama3-70b-8192".to_string(),
            temperature: 1.0,
            top_p: 1.0,
            max_tokens: 1024,
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Live transcription model (e.g. "nova-2")
    pub stt_model: String,

    /// Transcription language (BCP 47 code)
    pub language: String,

    /// Ask the transcriber for punctuated output
    pub punctuate: bool,

    /// PCM sample rate sent to the transcriber
    pub sample_rate: u32,

    /// Samples per audio chunk forwarded to the transcriber
    pub chunk_samples: usize,

    /// Silence gap (ms) that closes an utterance
    pub silence_threshold_ms: u64,

    /// Silence poll interval (ms)
    pub poll_interval_ms: u64,

    /// Speech synthesis model
    pub tts_model: String,

    /// Speech synthesis voice identifier
    pub tts_voice: String,

    /// Synthesized audio container format
    pub tts_format: AudioFormat,

    /// Playback speed multiplier
    pub tts_speed: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_model: "nova-2".to_string(),
            language: "en-US".to_string(),
            punctuate: true,
            sample_rate: SAMPLE_RATE,
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            silence_threshold_ms: DEFAULT_SILENCE_MS,
            poll_interval_ms: DEFAULT_POLL_MS,
            tts_model: "playai-tts".to_string(),
            tts_voice: "Fritz-PlayAI".to_string(),
            tts_format: AudioFormat::Wav,
            tts_speed: 1.0,
        }
    }
}

impl VoiceConfig {
    /// Silence gap as a [`Duration`]
    #[must_use]
    pub const fn silence_threshold(&self) -> Duration {
        Duration::from_millis(self.silence_threshold_ms)
    }

    /// Poll interval as a [`Duration`]
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// Groq API key (chat completions and TTS)
    pub groq: Option<String>,

    /// Deepgram API key (live transcription)
    pub deepgram: Option<String>,
}

impl ApiKeys {
    /// The Groq key, required for every session
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the key is absent
    pub fn require_groq(&self) -> Result<&str> {
        self.groq.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| {
            Error::Config(
                "GROQ_API_KEY is not set (environment or config file)".to_string(),
            )
        })
    }

    /// The Deepgram key, required for voice sessions
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the key is absent
    pub fn require_deepgram(&self) -> Result<&str> {
        self.deepgram.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| {
            Error::Config(
                "DEEPGRAM_API_KEY is not set (environment or config file)".to_string(),
            )
        })
    }
}

/// Top-level TOML configuration file schema
///
/// All fields are optional; the file is a partial overlay on top of
/// defaults.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    /// Path to a persona JSON file
    #[serde(default)]
    persona: Option<String>,

    #[serde(default)]
    chat: ChatFileConfig,

    #[serde(default)]
    voice: VoiceFileConfig,

    #[serde(default)]
    api_keys: ApiKeysFileConfig,
}

#[derive(Debug, Default, Deserialize)]
struct ChatFileConfig {
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct VoiceFileConfig {
    stt_model: Option<String>,
    language: Option<String>,
    punctuate: Option<bool>,
    chunk_samples: Option<usize>,
    silence_threshold_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    tts_model: Option<String>,
    tts_voice: Option<String>,
    tts_format: Option<AudioFormat>,
    tts_speed: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiKeysFileConfig {
    groq: Option<String>,
    deepgram: Option<String>,
}

/// Return the config file path: `~/.config/courtside/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("courtside").join("config.toml"))
}

/// Load the TOML config file from the standard path
///
/// Returns defaults if the file doesn't exist or can't be parsed.
fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };

    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
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
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

impl Config {
    /// Load configuration (env > config file > persona > default)
    ///
    /// # Errors
    ///
    /// Returns error if an explicitly requested persona file cannot be
    /// loaded or a numeric override fails to parse
    pub fn load(persona_path: Option<&Path>) -> Result<Self> {
        let fc = load_config_file();
        Self::from_layers(persona_path, &fc, &|name| std::env::var(name).ok())
    }

    /// Assemble a configuration from explicit layers
    ///
    /// Split out of [`Config::load`] so the layering is testable without
    /// touching the process environment.
    fn from_layers(
        persona_path: Option<&Path>,
        fc: &ConfigFile,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        // Persona: explicit path > config file > embedded default
        let persona = match persona_path {
            Some(path) => Persona::load(path)?,
            None => match &fc.persona {
                Some(path) => Persona::load(Path::new(path))?,
                None => Persona::embedded_default(),
            },
        };

        let chat_default = ChatConfig::default();
        let chat = ChatConfig {
            base_url: env("COURTSIDE_CHAT_URL")
                .or_else(|| fc.chat.base_url.clone())
                .unwrap_or(chat_default.base_url),
            model: env("COURTSIDE_CHAT_MODEL")
                .or_else(|| fc.chat.model.clone())
                .unwrap_or(chat_default.model),
            temperature: fc.chat.temperature.unwrap_or(chat_default.temperature),
            top_p: fc.chat.top_p.unwrap_or(chat_default.top_p),
            max_tokens: fc.chat.max_tokens.unwrap_or(chat_default.max_tokens),
        };

        let voice_default = VoiceConfig::default();
        let tts_voice = env("COURTSIDE_TTS_VOICE")
            .or_else(|| fc.voice.tts_voice.clone())
            .or_else(|| persona.tts_voice().map(ToString::to_string))
            .unwrap_or(voice_default.tts_voice);
        let tts_speed = match env("COURTSIDE_TTS_SPEED") {
            Some(raw) => raw.parse().map_err(|_| {
                Error::Config(format!("COURTSIDE_TTS_SPEED is not a number: {raw}"))
            })?,
            None => fc.voice.tts_speed.unwrap_or(persona.tts_speed()),
        };
        let tts_format = match env("COURTSIDE_TTS_FORMAT") {
            Some(raw) => AudioFormat::parse(&raw)?,
            None => fc.voice.tts_format.unwrap_or(voice_default.tts_format),
        };
        let silence_threshold_ms = match env("COURTSIDE_SILENCE_MS") {
            Some(raw) => raw.parse().map_err(|_| {
                Error::Config(format!("COURTSIDE_SILENCE_MS is not a number: {raw}"))
            })?,
            None => fc
                .voice
                .silence_threshold_ms
                .unwrap_or(voice_default.silence_threshold_ms),
        };

        let voice = VoiceConfig {
            stt_model: env("COURTSIDE_STT_MODEL")
                .or_else(|| fc.voice.stt_model.clone())
                .unwrap_or(voice_default.stt_model),
            language: fc
                .voice
                .language
                .clone()
                .unwrap_or(voice_default.language),
            punctuate: fc.voice.punctuate.unwrap_or(voice_default.punctuate),
            sample_rate: SAMPLE_RATE,
            chunk_samples: fc
                .voice
                .chunk_samples
                .unwrap_or(voice_default.chunk_samples),
            silence_threshold_ms,
            poll_interval_ms: fc
                .voice
                .poll_interval_ms
                .unwrap_or(voice_default.poll_interval_ms),
            tts_model: env("COURTSIDE_TTS_MODEL")
                .or_else(|| fc.voice.tts_model.clone())
                .unwrap_or(voice_default.tts_model),
            tts_voice,
            tts_format,
            tts_speed,
        };

        let api_keys = ApiKeys {
            groq: env("GROQ_API_KEY").or_else(|| fc.api_keys.groq.clone()),
            deepgram: env("DEEPGRAM_API_KEY").or_else(|| fc.api_keys.deepgram.clone()),
        };

        Ok(Self {
            persona,
            chat,
            voice,
            api_keys,
        })
    }
}
