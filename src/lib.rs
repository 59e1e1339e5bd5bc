//! Courtside - voice and text chat assistant with a sports persona
//!
//! This library wires three external collaborators - a streaming chat
//! completion API, a live speech transcription API, and a speech
//! synthesis API - behind a turn-taking orchestrator, presented through
//! either a terminal loop or a desktop window.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Presentation Shell                   │
//! │          Terminal loop   │   egui window             │
//! └────────────────────┬────────────────────────────────┘
//!                      │ typed commands / events
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Turn Orchestrator                    │
//! │  accumulator │ silence timer │ playback gate         │
//! └──────┬─────────────┬──────────────┬─────────────────┘
//!        │             │              │
//! ┌──────▼─────┐ ┌─────▼──────┐ ┌─────▼──────┐
//! │ Live STT   │ │ Chat (SSE) │ │    TTS     │
//! │ (WebSocket)│ │ completion │ │ synthesis  │
//! └──────▲─────┘ └────────────┘ └─────┬──────┘
//!        │ 16 kHz PCM                 │ WAV/MP3
//! ┌──────┴─────────────────────────────▼───────────────┐
//! │            Audio capture / playback (cpal)          │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod error;
pub mod persona;
pub mod session;
pub mod shell;
pub mod stt;
pub mod tts;

pub use chat::ChatClient;
pub use config::{ChatConfig, Config, VoiceConfig};
pub use conversation::{Conversation, Message, Role};
pub use error::{Error, Result};
pub use persona::Persona;
pub use session::{Session, SessionEvent, SessionOptions, ShellCommand, TranscriptAccumulator};
pub use stt::{LiveTranscriber, TranscriptEvent, TranscriptKind};
pub use tts::{AudioFormat, TtsClient};
