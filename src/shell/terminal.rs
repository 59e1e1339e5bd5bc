//! Terminal presentation shell
//!
//! A prompt loop over stdin. Input is held back while a reply is
//! streaming (at most one chat completion outstanding per session);
//! "quit", "exit", and "bye" end the session with exit code 0. In voice
//! mode, finalized transcripts are echoed as they arrive and typed input
//! still works.

use std::io::Write;

use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::session::{Session, SessionEvent, SessionOptions, ShellCommand};
use crate::{Error, Result};

/// Run the terminal shell until the session ends
///
/// # Errors
///
/// Returns error on unrecoverable transport setup failures (voice mode
/// connection, audio device); per-turn failures are rendered inline and
/// the loop continues
pub async fn run(config: Config, voice: bool) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    let session = Session::new(&config, SessionOptions::terminal().with_voice(voice), events_tx)?;

    println!("{} - Courtside", config.persona.name);
    println!("{}", "-".repeat(config.persona.name.len() + 12));
    if voice {
        println!("Speak, or type a line. Say or type \"exit\" to leave.");
    } else {
        println!("Type your message. \"quit\", \"exit\" or \"bye\" ends the session.");
    }
    println!();

    let worker = tokio::spawn(session.run(cmd_rx));

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut awaiting_reply = false;
    let mut prompt_shown = false;

    loop {
        if !voice && !awaiting_reply && !prompt_shown {
            print!("You: ");
            flush_stdout();
            prompt_shown = true;
        }

        tokio::select! {
            line = lines.next_line(), if !awaiting_reply => {
                prompt_shown = false;
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let _ = cmd_tx.send(ShellCommand::SubmitText(line));
                    }
                    Ok(None) => {
                        // stdin closed; wind the session down.
                        let _ = cmd_tx.send(ShellCommand::Shutdown);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        let _ = cmd_tx.send(ShellCommand::Shutdown);
                    }
                }
            }
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                if render_event(&event, voice, &mut awaiting_reply) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                let _ = cmd_tx.send(ShellCommand::Shutdown);
            }
        }
    }

    match worker.await {
        Ok(result) => result,
        Err(e) => Err(Error::Channel(format!("session task failed: {e}"))),
    }
}

/// Render one session event; returns true when the session has ended
fn render_event(event: &SessionEvent, voice: bool, awaiting_reply: &mut bool) -> bool {
    match event {
        SessionEvent::Greeting { text } => {
            println!("Assistant: {text}");
            println!();
        }
        SessionEvent::ListeningStarted => {
            if voice {
                println!("Listening for speech... (Ctrl+C to stop)");
            }
        }
        SessionEvent::ListeningStopped => {
            if voice {
                println!("Stopped listening.");
            }
        }
        SessionEvent::TranscriptFinal { text } => {
            if voice {
                println!("Transcript: {text}");
            }
        }
        // Partials only reset the silence timer; they are not rendered in
        // the terminal.
        SessionEvent::TranscriptPartial { .. } => {}
        SessionEvent::UserTurn { text } => {
            if voice {
                println!("You: {text}");
            }
            *awaiting_reply = true;
            print!("Assistant: ");
            flush_stdout();
        }
        SessionEvent::AssistantFragment { text } => {
            print!("{text}");
            flush_stdout();
        }
        SessionEvent::TurnComplete { .. } => {
            println!();
            println!();
            *awaiting_reply = false;
        }
        SessionEvent::Error { message } => {
            println!("{message}");
            println!();
            *awaiting_reply = false;
        }
        SessionEvent::SpeedChanged { speed } => {
            println!("System: playback speed {speed:.1}x");
        }
        SessionEvent::PlaybackInterrupted => {
            println!("System: audio interrupted.");
        }
        SessionEvent::PlaybackStarted | SessionEvent::PlaybackFinished => {}
        SessionEvent::SessionEnded => {
            println!("Goodbye!");
            return true;
        }
    }
    false
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}
