//! Error types for Courtside

use thiserror::Error;

/// Result type alias for Courtside operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Courtside
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Persona not found or invalid
    #[error("persona error: {0}")]
    Persona(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Live transcription error
    #[error("STT error: {0}")]
    Stt(String),

    /// Speech synthesis error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Chat completion error
    #[error("chat error: {0}")]
    Chat(String),

    /// Internal channel error (receiver dropped, queue closed)
    #[error("channel error: {0}")]
    Channel(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
