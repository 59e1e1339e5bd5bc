//! Persona configuration
//!
//! A persona fixes the identity of the assistant: the system instruction
//! that constrains topic scope, the greeting used to open a session, and
//! voice preferences for synthesized replies. The sports persona ships
//! embedded in the binary; a custom persona can be loaded from a JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A persona defines the identity and scope of the assistant
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    /// Unique identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Short descriptive phrase
    pub tagline: Option<String>,

    /// The fixed system instruction; becomes the first conversation message
    pub system_prompt: String,

    /// Opening assistant line, rendered (and spoken, in voice mode) at
    /// session start
    pub greeting: Option<String>,

    /// Voice preferences
    #[serde(default)]
    pub voice: PersonaVoice,
}

/// Voice preferences carried by a persona
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaVoice {
    /// Preferred TTS voice identifier
    pub tts_voice: Option<String>,

    /// Preferred playback speed multiplier
    pub tts_speed: Option<f32>,
}

/// The sports persona compiled into the binary
const EMBEDDED_SPORTS: &str = include_str!("../personas/sports.json");

impl Persona {
    /// The embedded default persona (sports expert)
    ///
    /// # Panics
    ///
    /// Never panics in practice: the embedded JSON is validated by tests.
    #[must_use]
    pub fn embedded_default() -> Self {
        serde_json::from_str(EMBEDDED_SPORTS).expect("embedded persona is valid JSON")
    }

    /// Load a persona from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or if the
    /// persona fails validation
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Persona(format!("failed to read {}: {e}", path.display()))
        })?;
        let persona: Self = serde_json::from_str(&content).map_err(|e| {
            Error::Persona(format!("failed to parse {}: {e}", path.display()))
        })?;
        persona.validate()?;
        Ok(persona)
    }

    /// Validate required fields
    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Persona("persona id is empty".to_string()));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(Error::Persona(format!(
                "persona '{}' has an empty system prompt",
                self.id
            )));
        }
        Ok(())
    }

    /// Preferred TTS voice, if any
    #[must_use]
    pub fn tts_voice(&self) -> Option<&str> {
        self.voice.tts_voice.as_deref()
    }

    /// Preferred TTS speed (1.0 when unset)
    #[must_use]
    pub fn tts_speed(&self) -> f32 {
        self.voice.tts_speed.unwrap_or(1.0)
    }
}
