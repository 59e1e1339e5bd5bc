//! Windowed presentation shell (egui/eframe)
//!
//! Immediate-mode chat window: a scrollback of chat lines, a single-line
//! input with a send button, and (in voice mode) a microphone toggle and
//! playback speed controls. The session worker runs on the tokio runtime;
//! each frame drains its typed events, so the window never blocks on a
//! network call.

use tokio::sync::mpsc;

use crate::config::Config;
use crate::session::{Session, SessionEvent, SessionOptions, ShellCommand};
use crate::{Error, Result};

/// Run the GUI shell until the window closes or the session ends
///
/// # Errors
///
/// Returns error if the session cannot be constructed or the window
/// cannot be opened
pub fn run(runtime: &tokio::runtime::Runtime, config: Config, voice: bool) -> Result<()> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    let session = Session::new(&config, SessionOptions::gui().with_voice(voice), events_tx)?;
    let title = format!("{} - Courtside", config.persona.name);

    let worker = runtime.spawn(session.run(cmd_rx));

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([600.0, 500.0]),
        ..Default::default()
    };

    let app = ChatApp::new(cmd_tx.clone(), events_rx, voice);
    eframe::run_native(&title, native_options, Box::new(move |_cc| Ok(Box::new(app))))
        .map_err(|e| Error::Config(format!("failed to open window: {e}")))?;

    // Window closed: wind the session down and reap the worker.
    let _ = cmd_tx.send(ShellCommand::Shutdown);
    runtime.block_on(async {
        match worker.await {
            Ok(result) => result,
            Err(e) => Err(Error::Channel(format!("session task failed: {e}"))),
        }
    })
}

/// Who a chat line is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Speaker {
    You,
    Assistant,
    System,
}

/// One rendered line of the chat scrollback
struct ChatLine {
    speaker: Speaker,
    text: String,
}

/// The chat window state
struct ChatApp {
    commands: mpsc::UnboundedSender<ShellCommand>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    voice: bool,
    lines: Vec<ChatLine>,
    /// Assistant reply streamed so far for the current turn
    streaming: String,
    /// Latest interim transcript while listening
    live_transcript: String,
    draft: String,
    busy: bool,
    listening: bool,
    playing: bool,
    speed: f32,
    ended: bool,
}

impl ChatApp {
    fn new(
        commands: mpsc::UnboundedSender<ShellCommand>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        voice: bool,
    ) -> Self {
        Self {
            commands,
            events,
            voice,
            lines: Vec::new(),
            streaming: String::new(),
            live_transcript: String::new(),
            draft: String::new(),
            busy: false,
            listening: false,
            playing: false,
            speed: 1.0,
            ended: false,
        }
    }

    fn push_line(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.lines.push(ChatLine {
            speaker,
            text: text.into(),
        });
    }

    /// Apply all pending session events to the window state
    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                SessionEvent::Greeting { text } => self.push_line(Speaker::Assistant, text),
                SessionEvent::ListeningStarted => {
                    self.listening = true;
                }
                SessionEvent::ListeningStopped => {
                    self.listening = false;
                    self.live_transcript.clear();
                }
                SessionEvent::TranscriptPartial { text }
                | SessionEvent::TranscriptFinal { text } => {
                    self.live_transcript = text;
                }
                SessionEvent::UserTurn { text } => {
                    self.push_line(Speaker::You, text);
                    self.live_transcript.clear();
                    self.streaming.clear();
                    self.busy = true;
                }
                SessionEvent::AssistantFragment { text } => self.streaming.push_str(&text),
                SessionEvent::TurnComplete { text } => {
                    self.streaming.clear();
                    self.push_line(Speaker::Assistant, text);
                    self.busy = false;
                }
                SessionEvent::Error { message } => {
                    self.streaming.clear();
                    self.push_line(Speaker::System, message);
                    self.busy = false;
                }
                SessionEvent::PlaybackStarted => self.playing = true,
                SessionEvent::PlaybackFinished => self.playing = false,
                SessionEvent::PlaybackInterrupted => {
                    self.playing = false;
                    self.push_line(Speaker::System, "Audio interrupted by user.");
                }
                SessionEvent::SpeedChanged { speed } => {
                    self.speed = speed;
                    self.push_line(Speaker::System, format!("Playback speed: {speed:.1}x"));
                }
                SessionEvent::SessionEnded => {
                    self.push_line(Speaker::System, "Goodbye!");
                    self.ended = true;
                }
            }
        }
    }

    fn send_draft(&mut self) {
        let text = self.draft.trim().to_string();
        if text.is_empty() || self.busy || self.ended {
            return;
        }
        self.draft.clear();
        let _ = self.commands.send(ShellCommand::SubmitText(text));
    }
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();

        let mut submit = false;
        let mut toggle_mic = false;
        let mut speed_up = false;
        let mut slow_down = false;

        egui::TopBottomPanel::bottom("controls").show(ctx, |ui| {
            ui.add_space(4.0);

            if self.voice {
                ui.horizontal(|ui| {
                    let mic_label = if self.playing {
                        "Stop Audio"
                    } else if self.listening {
                        "Stop Listening"
                    } else {
                        "Start Listening"
                    };
                    if ui
                        .add_enabled(!self.ended, egui::Button::new(mic_label))
                        .clicked()
                    {
                        toggle_mic = true;
                    }
                    if ui
                        .add_enabled(!self.ended, egui::Button::new("Slow Down"))
                        .clicked()
                    {
                        slow_down = true;
                    }
                    if ui
                        .add_enabled(!self.ended, egui::Button::new("Speed Up"))
                        .clicked()
                    {
                        speed_up = true;
                    }
                    ui.label(format!("{:.1}x", self.speed));
                    if !self.live_transcript.is_empty() {
                        ui.label(
                            egui::RichText::new(self.live_transcript.clone())
                                .italics()
                                .weak(),
                        );
                    }
                });
                ui.add_space(4.0);
            }

            ui.horizontal(|ui| {
                let input_enabled = !self.busy && !self.ended;
                let response = ui.add_enabled(
                    input_enabled,
                    egui::TextEdit::singleline(&mut self.draft)
                        .hint_text("Type a message")
                        .desired_width(ui.available_width() - 60.0),
                );
                if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                    submit = true;
                    response.request_focus();
                }
                if ui
                    .add_enabled(input_enabled, egui::Button::new("Send"))
                    .clicked()
                {
                    submit = true;
                }
            });
            ui.add_space(4.0);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical()
                .stick_to_bottom(true)
                .auto_shrink([false, false])
                .show(ui, |ui| {
                    for line in &self.lines {
                        let (prefix, color) = match line.speaker {
                            Speaker::You => ("You: ", ui.visuals().strong_text_color()),
                            Speaker::Assistant => {
                                ("Assistant: ", ui.visuals().text_color())
                            }
                            Speaker::System => {
                                ("System: ", ui.visuals().weak_text_color())
                            }
                        };
                        ui.label(
                            egui::RichText::new(format!("{prefix}{}", line.text)).color(color),
                        );
                        ui.add_space(6.0);
                    }

                    if self.busy {
                        ui.label(format!("Assistant: {}", self.streaming));
                    }
                });
        });

        if submit {
            self.send_draft();
        }
        if toggle_mic {
            let _ = self.commands.send(ShellCommand::ToggleListening);
        }
        if speed_up {
            let _ = self.commands.send(ShellCommand::SpeedUp);
        }
        if slow_down {
            let _ = self.commands.send(ShellCommand::SlowDown);
        }

        if self.ended {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        // Session events arrive between frames; keep draining even when
        // the user is idle.
        ctx.request_repaint_after(std::time::Duration::from_millis(100));
    }
}
