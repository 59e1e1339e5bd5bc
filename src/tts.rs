//! Speech synthesis client
//!
//! Sends text to the speech endpoint of an OpenAI-compatible API and
//! returns one complete encoded audio buffer; synthesis is not streamed.

use serde::{Deserialize, Serialize};

use crate::config::VoiceConfig;
use crate::{Error, Result};

/// Synthesized audio container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    Mp3,
}

impl AudioFormat {
    /// The `response_format` value sent to the API
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
        }
    }

    /// Parse a format name (case-insensitive)
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown formats
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "wav" => Ok(Self::Wav),
            "mp3" => Ok(Self::Mp3),
            other => Err(Error::Config(format!("unknown audio format: {other}"))),
        }
    }
}

/// Request body for the speech endpoint
#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// Synthesizes speech from text
#[derive(Debug, Clone)]
pub struct TtsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    format: AudioFormat,
}

impl TtsClient {
    /// Create a new TTS client from the voice configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, config: &VoiceConfig) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::Config("TTS API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: config.tts_model.clone(),
            voice: config.tts_voice.clone(),
            format: config.tts_format,
        })
    }

    /// The audio format replies are encoded in
    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    /// Synthesize text to one complete audio buffer
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the API rejects it
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: self.format.as_str(),
        };

        tracing::debug!(
            model = %self.model,
            voice = %self.voice,
            chars = text.len(),
            "synthesizing speech"
        );

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "TTS API error");
            return Err(Error::Tts(format!("TTS API error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), "synthesis complete");
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parse_round_trips() {
        assert_eq!(AudioFormat::parse("wav").unwrap(), AudioFormat::Wav);
        assert_eq!(AudioFormat::parse("MP3").unwrap(), AudioFormat::Mp3);
        assert!(AudioFormat::parse("ogg").is_err());
        assert_eq!(AudioFormat::Wav.as_str(), "wav");
    }

    #[test]
    fn client_requires_api_key() {
        let config = VoiceConfig::default();
        assert!(TtsClient::new("", "http://localhost", &config).is_err());
        let client = TtsClient::new("gk-test", "http://localhost", &config).unwrap();
        assert_eq!(client.format(), AudioFormat::Wav);
    }
}
