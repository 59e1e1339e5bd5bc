//! Live speech transcription over a Deepgram WebSocket
//!
//! Consumes 16 kHz mono 16-bit linear PCM chunks and produces typed
//! transcript events. Events arrive in order; each is flagged partial
//! (interim, revisable) or final (unlikely to change further). While the
//! caller suppresses audio (e.g. during synthesized playback) the sender
//! task emits keep-alive frames so the upstream connection stays open.

use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use crate::config::VoiceConfig;
use crate::{Error, Result};

/// Default live transcription endpoint
pub const DEFAULT_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Keep-alive cadence while no audio is flowing
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Whether a transcript event is revisable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    /// Interim result; may still change
    Partial,
    /// Result the service marks as unlikely to change further
    Final,
}

/// A single well-typed transcript event
#[derive(Debug, Clone)]
pub struct TranscriptEvent {
    pub kind: TranscriptKind,
    pub text: String,
    /// Local arrival timestamp, used for silence timing
    pub at: Instant,
}

impl TranscriptEvent {
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.kind == TranscriptKind::Final
    }
}

/// Wire shape of a live transcription result
#[derive(Deserialize)]
struct LiveResult {
    #[serde(rename = "type")]
    kind: Option<String>,
    is_final: Option<bool>,
    channel: Option<LiveChannel>,
}

#[derive(Deserialize)]
struct LiveChannel {
    alternatives: Vec<LiveAlternative>,
}

#[derive(Deserialize)]
struct LiveAlternative {
    transcript: String,
}

/// Parse one text frame into a transcript event
///
/// Frames that are not transcription results, or whose transcript is
/// blank, produce `None`.
fn parse_live_frame(raw: &str, at: Instant) -> Option<TranscriptEvent> {
    let result: LiveResult = serde_json::from_str(raw).ok()?;
    if let Some(kind) = &result.kind {
        if kind != "Results" {
            return None;
        }
    }

    let transcript = result
        .channel?
        .alternatives
        .into_iter()
        .next()
        .map(|a| a.transcript)?;
    if transcript.trim().is_empty() {
        return None;
    }

    let kind = if result.is_final.unwrap_or(false) {
        TranscriptKind::Final
    } else {
        TranscriptKind::Partial
    };

    Some(TranscriptEvent {
        kind,
        text: transcript,
        at,
    })
}

/// A live transcription connection
///
/// Split into an audio sink (PCM chunks in) and an event receiver
/// (transcripts out). Dropping the audio sender closes the upstream
/// stream gracefully.
pub struct LiveTranscriber {
    audio_tx: mpsc::Sender<Bytes>,
    events_rx: mpsc::Receiver<TranscriptEvent>,
}

impl LiveTranscriber {
    /// Open a live transcription connection
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the WebSocket handshake
    /// fails (a transport-setup failure, fatal for the session)
    pub async fn connect(api_key: &str, config: &VoiceConfig) -> Result<Self> {
        Self::connect_to(DEFAULT_LISTEN_URL, api_key, config).await
    }

    /// Open a connection against an explicit endpoint
    ///
    /// # Errors
    ///
    /// See [`LiveTranscriber::connect`]
    pub async fn connect_to(
        endpoint: &str,
        api_key: &str,
        config: &VoiceConfig,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "transcription API key required".to_string(),
            ));
        }

        let mut url = url::Url::parse(endpoint)
            .map_err(|e| Error::Stt(format!("invalid endpoint {endpoint}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("model", &config.stt_model)
            .append_pair("language", &config.language)
            .append_pair("punctuate", if config.punctuate { "true" } else { "false" })
            .append_pair("encoding", "linear16")
            .append_pair("channels", "1")
            .append_pair("sample_rate", &config.sample_rate.to_string())
            .append_pair("interim_results", "true");

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Stt(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Token {api_key}"))
            .map_err(|e| Error::Stt(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| Error::Stt(format!("websocket connect failed: {e}")))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        tracing::info!(
            model = %config.stt_model,
            sample_rate = config.sample_rate,
            "live transcription connected"
        );

        // Audio sender: forwards PCM chunks, keeps the connection alive
        // during gaps, and closes the stream when the sink is dropped.
        let (audio_tx, mut audio_rx) = mpsc::channel::<Bytes>(32);
        tokio::spawn(async move {
            let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
            keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    chunk = audio_rx.recv() => match chunk {
                        Some(chunk) => {
                            if let Err(e) = ws_tx.send(WsMessage::Binary(chunk.to_vec())).await {
                                tracing::warn!(error = %e, "audio send failed");
                                break;
                            }
                        }
                        None => {
                            let close = WsMessage::Text(r#"{"type":"CloseStream"}"#.to_string());
                            if let Err(e) = ws_tx.send(close).await {
                                tracing::debug!(error = %e, "close frame send failed");
                            }
                            let _ = ws_tx.close().await;
                            break;
                        }
                    },
                    _ = keepalive.tick() => {
                        let frame = WsMessage::Text(r#"{"type":"KeepAlive"}"#.to_string());
                        if ws_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("audio sender stopped");
        });

        // Event reader: parses transcription frames into typed events.
        let (events_tx, events_rx) = mpsc::channel::<TranscriptEvent>(64);
        tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                match message {
                    Ok(WsMessage::Text(raw)) => {
                        if let Some(event) = parse_live_frame(&raw, Instant::now()) {
                            tracing::trace!(
                                kind = ?event.kind,
                                text = %event.text,
                                "transcript event"
                            );
                            if events_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        tracing::debug!("transcription connection closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "transcription read error");
                        break;
                    }
                }
            }
            // Dropping events_tx ends the event channel; the session
            // treats that as the connection going away.
        });

        Ok(Self { audio_tx, events_rx })
    }

    /// Handle used by the capture loop to feed PCM chunks
    #[must_use]
    pub fn audio_sink(&self) -> mpsc::Sender<Bytes> {
        self.audio_tx.clone()
    }

    /// Receive the next transcript event
    ///
    /// Returns `None` when the connection has closed.
    pub async fn next_event(&mut self) -> Option<TranscriptEvent> {
        self.events_rx.recv().await
    }

    /// Close the connection gracefully
    ///
    /// Dropping the transcriber has the same effect; this makes the
    /// teardown explicit at session shutdown.
    pub fn close(self) {
        drop(self.audio_tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_final_result() {
        let raw = r#"{
            "type": "Results",
            "is_final": true,
            "channel": {"alternatives": [{"transcript": "How are the Lakers doing?"}]}
        }"#;
        let event = parse_live_frame(raw, Instant::now()).unwrap();
        assert_eq!(event.kind, TranscriptKind::Final);
        assert_eq!(event.text, "How are the Lakers doing?");
        assert!(event.is_final());
    }

    #[test]
    fn parses_interim_result_as_partial() {
        let raw = r#"{
            "type": "Results",
            "is_final": false,
            "channel": {"alternatives": [{"transcript": "How are"}]}
        }"#;
        let event = parse_live_frame(raw, Instant::now()).unwrap();
        assert_eq!(event.kind, TranscriptKind::Partial);
        assert!(!event.is_final());
    }

    #[test]
    fn blank_transcripts_are_dropped() {
        let raw = r#"{
            "type": "Results",
            "is_final": true,
            "channel": {"alternatives": [{"transcript": "   "}]}
        }"#;
        assert!(parse_live_frame(raw, Instant::now()).is_none());
    }

    #[test]
    fn non_result_frames_are_dropped() {
        let raw = r#"{"type": "Metadata", "request_id": "abc"}"#;
        assert!(parse_live_frame(raw, Instant::now()).is_none());

        assert!(parse_live_frame("not json", Instant::now()).is_none());
        assert!(parse_live_frame("{}", Instant::now()).is_none());
    }

    #[test]
    fn missing_is_final_defaults_to_partial() {
        let raw = r#"{"channel": {"alternatives": [{"transcript": "hello"}]}}"#;
        let event = parse_live_frame(raw, Instant::now()).unwrap();
        assert_eq!(event.kind, TranscriptKind::Partial);
    }
}
