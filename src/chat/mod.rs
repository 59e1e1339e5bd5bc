//! Streaming chat completion client
//!
//! Talks to an OpenAI-compatible `/chat/completions` endpoint with
//! `stream: true` and yields assistant text fragments as they arrive. The
//! stream is finite (terminated by the `[DONE]` sentinel or end of body)
//! and not restartable mid-stream; a failed turn must be re-requested from
//! scratch.

pub mod sse;

use std::pin::Pin;

use futures::Stream;
use futures_util::StreamExt;
use serde::Serialize;

use crate::config::ChatConfig;
use crate::conversation::Message;
use crate::{Error, Result};

use sse::SseParser;

/// A finite stream of assistant text fragments
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Request body for the chat completion endpoint
#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stream: bool,
}

/// Streams chat completions from an OpenAI-compatible API
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    config: ChatConfig,
}

impl ChatClient {
    /// Create a new chat client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(api_key: impl Into<String>, config: ChatConfig) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::Config(
                "chat completion API key required".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key,
            config,
        })
    }

    /// Override the base URL (used by tests to point at a local server)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The model this client requests
    #[must_use]
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Request a streamed reply for the given message sequence
    ///
    /// Returns a finite stream of text fragments; concatenating every
    /// fragment yields the complete assistant reply.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be sent or the API rejects it.
    /// Mid-stream transport failures surface as an `Err` item.
    pub async fn stream_reply(&self, messages: &[Message]) -> Result<FragmentStream> {
        let request = CompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
            stream: true,
        };

        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            "requesting chat completion"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Chat(format!("chat API error {status}: {body}")));
        }

        let mut body = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut parser = SseParser::new();
            let mut done = false;
            while !done {
                let Some(chunk) = body.next().await else { break };
                let chunk = chunk.map_err(|e| Error::Chat(format!("stream read failed: {e}")))?;
                for payload in parser.push(&chunk) {
                    if payload.is_done() {
                        done = true;
                        break;
                    }
                    if let Some(fragment) = delta_content(&payload.0) {
                        yield fragment;
                    }
                }
            }
            if !done {
                // Stream ended without the sentinel; flush any tail.
                if let Some(payload) = parser.finish() {
                    if !payload.is_done() {
                        if let Some(fragment) = delta_content(&payload.0) {
                            yield fragment;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Extract `choices[0].delta.content` from a streamed completion chunk
///
/// Chunks without text content (role announcements, finish markers,
/// malformed payloads) yield `None`.
fn delta_content(data: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(data).ok()?;
    let content = parsed
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}
