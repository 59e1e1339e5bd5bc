//! Turn orchestration
//!
//! The session mediates between the live transcript stream and the chat
//! request/response cycle, and between a finished reply and speech
//! playback. One session owns its conversation state and clients; there
//! is no process-global state, so independent sessions coexist freely.
//!
//! Turn-taking runs as a small state machine: listening (accumulating
//! transcript fragments) → silence detected (gap since the last non-empty
//! fragment exceeds the threshold and the accumulator holds text) →
//! submitting (flush as a user turn) → responding (stream the reply) →
//! speaking (voice mode: synthesize and play, capture gated off) → back
//! to listening. The exit keyword short-circuits to termination from any
//! state.
//!
//! Shells talk to the session over typed channels: [`ShellCommand`] in,
//! [`SessionEvent`] out. The presentation loop never blocks on a network
//! call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::{CaptureHandle, play_encoded};
use crate::chat::ChatClient;
use crate::config::{Config, VoiceConfig};
use crate::conversation::Conversation;
use crate::stt::{LiveTranscriber, TranscriptEvent};
use crate::tts::TtsClient;
use crate::{Error, Result};

/// Lower bound for the playback speed multiplier
pub const MIN_PLAYBACK_SPEED: f32 = 0.5;

/// Upper bound for the playback speed multiplier
pub const MAX_PLAYBACK_SPEED: f32 = 2.0;

/// Step applied by the speed up / slow down commands
pub const PLAYBACK_SPEED_STEP: f32 = 0.1;

/// Spoken fallback when a chat turn fails in voice mode
const SPOKEN_ERROR_FALLBACK: &str = "Sorry, there was an error generating a response.";

/// Typed events emitted by the session worker to the presentation shell
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The persona greeting that opens the session
    Greeting { text: String },
    /// Voice capture and transcription are running
    ListeningStarted,
    /// Voice capture and transcription stopped
    ListeningStopped,
    /// Interim transcript; revisable, never part of a submitted turn
    TranscriptPartial { text: String },
    /// Final transcript fragment accumulated toward the next turn
    TranscriptFinal { text: String },
    /// An utterance or typed line was accepted as a user turn
    UserTurn { text: String },
    /// One streamed fragment of the assistant reply
    AssistantFragment { text: String },
    /// The assistant reply completed
    TurnComplete { text: String },
    /// A recoverable failure, rendered in place of the expected reply
    Error { message: String },
    /// Synthesized audio started playing (capture gated off)
    PlaybackStarted,
    /// Synthesized audio finished playing
    PlaybackFinished,
    /// Playback was cut short by the user
    PlaybackInterrupted,
    /// Playback speed changed
    SpeedChanged { speed: f32 },
    /// The session terminated
    SessionEnded,
}

/// Typed commands from the presentation shell to the session worker
#[derive(Debug, Clone)]
pub enum ShellCommand {
    /// Submit a typed line as a user turn
    SubmitText(String),
    /// Toggle voice capture; interrupts playback when audio is playing
    ToggleListening,
    /// Raise playback speed one step
    SpeedUp,
    /// Lower playback speed one step
    SlowDown,
    /// Terminate the session
    Shutdown,
}

/// Session construction options
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Enable voice capture, transcription, and spoken replies
    pub voice: bool,
    /// Finalized utterances matching one of these (trimmed,
    /// case-insensitive) end the session without a chat turn
    pub exit_keywords: Vec<String>,
    /// Whether a failed initial transcription connection aborts the
    /// session (terminal) or just reverts the listening toggle (GUI)
    pub abort_on_transport_failure: bool,
}

impl SessionOptions {
    /// Terminal shell defaults: quit/exit/bye all terminate
    #[must_use]
    pub fn terminal() -> Self {
        Self {
            voice: false,
            exit_keywords: vec!["quit".to_string(), "exit".to_string(), "bye".to_string()],
            abort_on_transport_failure: true,
        }
    }

    /// GUI shell defaults: only "exit" terminates
    #[must_use]
    pub fn gui() -> Self {
        Self {
            voice: false,
            exit_keywords: vec!["exit".to_string()],
            abort_on_transport_failure: false,
        }
    }

    /// Enable or disable voice mode
    #[must_use]
    pub fn with_voice(mut self, voice: bool) -> Self {
        self.voice = voice;
        self
    }
}

/// Accumulates transcript fragments between silence gaps
///
/// Only final events contribute text; partial events (and final events
/// alike) reset the silence timer. The accumulator is flushed as one user
/// turn once the gap since the last non-empty event exceeds the silence
/// threshold.
#[derive(Debug, Default)]
pub struct TranscriptAccumulator {
    pending: String,
    last_speech: Option<Instant>,
    speaking: bool,
}

impl TranscriptAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one transcript event
    pub fn observe(&mut self, event: &TranscriptEvent) {
        if event.text.trim().is_empty() {
            return;
        }
        self.last_speech = Some(event.at);
        self.speaking = true;
        if event.is_final() {
            self.pending.push_str(&event.text);
        }
    }

    /// Whether an utterance is ready to flush at `now`
    #[must_use]
    pub fn utterance_ready(&self, now: Instant, threshold: Duration) -> bool {
        self.speaking
            && !self.pending.is_empty()
            && self
                .last_speech
                .is_some_and(|at| now.saturating_duration_since(at) >= threshold)
    }

    /// Take the accumulated utterance and reset for the next one
    pub fn take(&mut self) -> String {
        self.speaking = false;
        std::mem::take(&mut self.pending)
    }

    /// Drop any accumulated state
    pub fn reset(&mut self) {
        self.pending.clear();
        self.speaking = false;
        self.last_speech = None;
    }

    /// Accumulated text so far
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }
}

/// Voice-mode wiring held while the session runs
#[derive(Debug, Clone)]
struct VoiceSetup {
    api_key: String,
    config: VoiceConfig,
}

/// A live capture + transcription pair
struct Listening {
    capture: CaptureHandle,
    transcriber: LiveTranscriber,
}

/// An in-flight playback task
struct ActivePlayback {
    handle: JoinHandle<Result<()>>,
    abort: Arc<AtomicBool>,
    interrupted: bool,
}

/// Whether the session loop continues after handling input
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    End,
}

/// The turn orchestrator for one session
pub struct Session {
    conversation: Conversation,
    chat: ChatClient,
    tts: Option<TtsClient>,
    voice: Option<VoiceSetup>,
    accumulator: TranscriptAccumulator,
    events: mpsc::UnboundedSender<SessionEvent>,
    options: SessionOptions,
    silence_threshold: Duration,
    poll_interval: Duration,
    /// Gate suppressing capture while synthesized audio plays
    playing: Arc<AtomicBool>,
    speed: f32,
    in_flight: bool,
    greeting: Option<String>,
}

impl Session {
    /// Construct a session from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a required API key is missing
    pub fn new(
        config: &Config,
        options: SessionOptions,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self> {
        let groq_key = config.api_keys.require_groq()?;
        let chat = ChatClient::new(groq_key, config.chat.clone())?;

        let (tts, voice) = if options.voice {
            let deepgram_key = config.api_keys.require_deepgram()?;
            let tts = TtsClient::new(groq_key, config.chat.base_url.clone(), &config.voice)?;
            let setup = VoiceSetup {
                api_key: deepgram_key.to_string(),
                config: config.voice.clone(),
            };
            (Some(tts), Some(setup))
        } else {
            (None, None)
        };

        Ok(Self {
            conversation: Conversation::new(&config.persona),
            chat,
            tts,
            voice,
            accumulator: TranscriptAccumulator::new(),
            events,
            options,
            silence_threshold: config.voice.silence_threshold(),
            poll_interval: config.voice.poll_interval(),
            playing: Arc::new(AtomicBool::new(false)),
            speed: config.voice.tts_speed.clamp(MIN_PLAYBACK_SPEED, MAX_PLAYBACK_SPEED),
            in_flight: false,
            greeting: config.persona.greeting.clone(),
        })
    }

    /// Run the session until shutdown or the exit keyword
    ///
    /// # Errors
    ///
    /// Returns error only for unrecoverable transport setup failures
    /// (e.g. the initial transcription connection); per-turn failures are
    /// surfaced as [`SessionEvent::Error`] and the loop continues.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ShellCommand>) -> Result<()> {
        if let Some(greeting) = self.greeting.clone() {
            self.emit(SessionEvent::Greeting {
                text: greeting.clone(),
            });
        }

        let mut listening: Option<Listening> = None;
        let mut playback: Option<ActivePlayback> = None;

        if self.voice.is_some() {
            match self.start_listening().await {
                Ok(active) => {
                    listening = Some(active);
                    self.emit(SessionEvent::ListeningStarted);
                }
                Err(e) if self.options.abort_on_transport_failure => {
                    self.emit(SessionEvent::Error {
                        message: format!("Error: {e}"),
                    });
                    self.emit(SessionEvent::SessionEnded);
                    return Err(e);
                }
                Err(e) => {
                    // Revert the toggle; the user can retry from the mic
                    // button.
                    tracing::error!(error = %e, "failed to start listening");
                    self.emit(SessionEvent::Error {
                        message: format!("Error: failed to start listening: {e}"),
                    });
                    self.emit(SessionEvent::ListeningStopped);
                }
            }
            if let Some(greeting) = self.greeting.clone() {
                self.speak(&greeting, &mut playback).await;
            }
        }

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            // Biased, with the silence poll last: a fragment arriving at
            // the silence boundary resets the timer before the next poll
            // can flush the utterance.
            tokio::select! {
                biased;
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    if matches!(cmd, ShellCommand::Shutdown) {
                        break;
                    }
                    if self.handle_command(cmd, &mut listening, &mut playback).await == Flow::End {
                        break;
                    }
                }
                event = next_transcript(&mut listening) => {
                    match event {
                        Some(event) => self.observe_transcript(&event),
                        None => {
                            // Connection gone; report and revert to idle.
                            tracing::warn!("transcription connection closed");
                            listening = None;
                            self.emit(SessionEvent::Error {
                                message: "Error: transcription connection lost".to_string(),
                            });
                            self.emit(SessionEvent::ListeningStopped);
                        }
                    }
                }
                joined = playback_done(&mut playback) => {
                    let finished = playback.take();
                    self.playing.store(false, Ordering::SeqCst);
                    let interrupted = finished.is_some_and(|p| p.interrupted);
                    match joined {
                        Ok(Ok(())) if interrupted => {
                            self.emit(SessionEvent::PlaybackInterrupted);
                        }
                        Ok(Ok(())) => self.emit(SessionEvent::PlaybackFinished),
                        Ok(Err(e)) => {
                            self.emit(SessionEvent::Error {
                                message: format!("Error: {e}"),
                            });
                            self.emit(SessionEvent::PlaybackFinished);
                        }
                        Err(e) => {
                            self.emit(SessionEvent::Error {
                                message: format!("Error: playback task failed: {e}"),
                            });
                            self.emit(SessionEvent::PlaybackFinished);
                        }
                    }
                    // An interrupt while idle means the user wants the
                    // microphone back.
                    if interrupted && listening.is_none() && self.voice.is_some() {
                        self.toggle_listening(&mut listening).await;
                    }
                }
                _ = poll.tick() => {
                    let now = Instant::now();
                    if self.accumulator.utterance_ready(now, self.silence_threshold) {
                        let utterance = self.accumulator.take();
                        tracing::info!(text = %utterance, "utterance complete");
                        if self.handle_utterance(&utterance, &mut playback).await == Flow::End {
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown(listening, playback).await;
        Ok(())
    }

    /// Record a transcript event and surface it to the shell
    fn observe_transcript(&mut self, event: &TranscriptEvent) {
        self.accumulator.observe(event);
        if event.is_final() {
            tracing::debug!(text = %event.text, "final transcript");
            self.emit(SessionEvent::TranscriptFinal {
                text: event.text.clone(),
            });
        } else {
            self.emit(SessionEvent::TranscriptPartial {
                text: event.text.clone(),
            });
        }
    }

    /// Handle one shell command
    async fn handle_command(
        &mut self,
        cmd: ShellCommand,
        listening: &mut Option<Listening>,
        playback: &mut Option<ActivePlayback>,
    ) -> Flow {
        match cmd {
            ShellCommand::SubmitText(text) => self.handle_utterance(&text, playback).await,
            ShellCommand::ToggleListening => {
                if let Some(active) = playback {
                    // Interrupt playback; the completion branch restores
                    // listening if it was off.
                    active.abort.store(true, Ordering::SeqCst);
                    active.interrupted = true;
                } else {
                    self.toggle_listening(listening).await;
                }
                Flow::Continue
            }
            ShellCommand::SpeedUp => {
                self.set_speed(self.speed + PLAYBACK_SPEED_STEP);
                Flow::Continue
            }
            ShellCommand::SlowDown => {
                self.set_speed(self.speed - PLAYBACK_SPEED_STEP);
                Flow::Continue
            }
            ShellCommand::Shutdown => Flow::End,
        }
    }

    fn set_speed(&mut self, speed: f32) {
        self.speed = speed.clamp(MIN_PLAYBACK_SPEED, MAX_PLAYBACK_SPEED);
        self.emit(SessionEvent::SpeedChanged { speed: self.speed });
    }

    /// Start or stop voice capture
    async fn toggle_listening(&mut self, listening: &mut Option<Listening>) {
        if let Some(mut active) = listening.take() {
            active.capture.stop();
            active.transcriber.close();
            self.accumulator.reset();
            self.emit(SessionEvent::ListeningStopped);
            return;
        }

        match self.start_listening().await {
            Ok(active) => {
                *listening = Some(active);
                self.emit(SessionEvent::ListeningStarted);
            }
            Err(e) => {
                // Revert the toggle: report and stay idle.
                tracing::error!(error = %e, "failed to start listening");
                self.emit(SessionEvent::Error {
                    message: format!("Error: failed to start listening: {e}"),
                });
                self.emit(SessionEvent::ListeningStopped);
            }
        }
    }

    /// Open the transcription connection and start capture
    async fn start_listening(&mut self) -> Result<Listening> {
        let setup = self
            .voice
            .as_ref()
            .ok_or_else(|| Error::Config("voice mode is not enabled".to_string()))?
            .clone();

        let transcriber = LiveTranscriber::connect(&setup.api_key, &setup.config).await?;
        let capture = CaptureHandle::spawn(
            setup.config.sample_rate,
            setup.config.chunk_samples,
            Arc::clone(&self.playing),
            transcriber.audio_sink(),
        )?;
        self.accumulator.reset();

        Ok(Listening {
            capture,
            transcriber,
        })
    }

    /// Process one finalized utterance or typed line
    async fn handle_utterance(
        &mut self,
        text: &str,
        playback: &mut Option<ActivePlayback>,
    ) -> Flow {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            // Empty utterances are discarded, never submitted.
            return Flow::Continue;
        }
        if self.is_exit_keyword(trimmed) {
            tracing::info!(keyword = %trimmed, "exit keyword detected");
            return Flow::End;
        }
        self.submit_turn(trimmed, playback).await;
        Flow::Continue
    }

    /// Whether a finalized utterance terminates the session
    fn is_exit_keyword(&self, trimmed: &str) -> bool {
        self.options
            .exit_keywords
            .iter()
            .any(|keyword| trimmed.eq_ignore_ascii_case(keyword))
    }

    /// Submit one user turn and stream the assistant reply
    async fn submit_turn(&mut self, text: &str, playback: &mut Option<ActivePlayback>) {
        if self.in_flight {
            // Shells disable input while a turn is outstanding; a second
            // submission here would interleave replies.
            tracing::warn!("dropping turn submitted while a reply is outstanding");
            return;
        }
        self.in_flight = true;

        self.emit(SessionEvent::UserTurn {
            text: text.to_string(),
        });
        self.conversation.push_user(text);

        let outcome = self.stream_reply().await;
        self.in_flight = false;

        match outcome {
            Ok(reply) => {
                self.conversation.push_assistant(&reply);
                self.emit(SessionEvent::TurnComplete {
                    text: reply.clone(),
                });
                self.speak(&reply, playback).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "chat turn failed");
                self.emit(SessionEvent::Error {
                    message: format!("Error: {e}"),
                });
                let fallback = SPOKEN_ERROR_FALLBACK.to_string();
                self.speak(&fallback, playback).await;
            }
        }
    }

    /// Stream the reply for the current conversation, forwarding fragments
    async fn stream_reply(&mut self) -> Result<String> {
        let mut stream = self.chat.stream_reply(self.conversation.messages()).await?;
        let mut reply = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            self.emit(SessionEvent::AssistantFragment {
                text: fragment.clone(),
            });
            reply.push_str(&fragment);
        }
        Ok(reply)
    }

    /// Synthesize text and start playback (voice mode only)
    ///
    /// Capture is gated off for the duration of playback so the assistant
    /// does not hear itself. Failures are reported as chat entries and do
    /// not block returning to listening.
    async fn speak(&mut self, text: &str, playback: &mut Option<ActivePlayback>) {
        let Some(tts) = &self.tts else { return };
        if text.trim().is_empty() {
            return;
        }

        // A rare overlap (e.g. a typed turn completing while the greeting
        // still plays): cut the old playback over.
        if let Some(previous) = playback.take() {
            previous.abort.store(true, Ordering::SeqCst);
        }

        let audio = match tts.synthesize(text).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::error!(error = %e, "synthesis failed");
                self.emit(SessionEvent::Error {
                    message: format!("Error: {e}"),
                });
                return;
            }
        };

        self.playing.store(true, Ordering::SeqCst);
        self.emit(SessionEvent::PlaybackStarted);

        let abort = Arc::new(AtomicBool::new(false));
        let task_abort = Arc::clone(&abort);
        let format = tts.format();
        let speed = self.speed;
        let handle =
            tokio::task::spawn_blocking(move || play_encoded(&audio, format, speed, &task_abort));

        *playback = Some(ActivePlayback {
            handle,
            abort,
            interrupted: false,
        });
    }

    /// Unwind audio and transcription before exiting
    async fn shutdown(
        &mut self,
        listening: Option<Listening>,
        playback: Option<ActivePlayback>,
    ) {
        if let Some(active) = playback {
            active.abort.store(true, Ordering::SeqCst);
            let _ = active.handle.await;
        }
        self.playing.store(false, Ordering::SeqCst);

        if let Some(mut active) = listening {
            active.capture.stop();
            active.transcriber.close();
        }

        self.emit(SessionEvent::SessionEnded);
        tracing::info!(turns = self.conversation.len(), "session ended");
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

/// Await the next transcript event, pending forever while not listening
async fn next_transcript(listening: &mut Option<Listening>) -> Option<TranscriptEvent> {
    match listening {
        Some(active) => active.transcriber.next_event().await,
        None => std::future::pending().await,
    }
}

/// Await the running playback task, pending forever while idle
async fn playback_done(
    playback: &mut Option<ActivePlayback>,
) -> std::result::Result<Result<()>, tokio::task::JoinError> {
    match playback {
        Some(active) => (&mut active.handle).await,
        None => std::future::pending().await,
    }
}
