//! Session orchestration integration tests
//!
//! Drives the turn orchestrator end to end over its typed command/event
//! channels, with the chat API mocked. Voice mode is off: capture and
//! playback need hardware, and the utterance segmentation they feed is
//! covered in `tests/voice.rs`.

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use courtside::config::{ApiKeys, ChatConfig, VoiceConfig};
use courtside::{Config, Persona, Session, SessionEvent, SessionOptions, ShellCommand};

fn sse_body(fragments: &[&str]) -> String {
    let mut body = String::new();
    for fragment in fragments {
        let chunk = json!({"choices": [{"delta": {"content": fragment}}]});
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn test_config(base_url: String) -> Config {
    Config {
        persona: Persona::embedded_default(),
        chat: ChatConfig {
            base_url,
            ..ChatConfig::default()
        },
        voice: VoiceConfig::default(),
        api_keys: ApiKeys {
            groq: Some("gk-test".to_string()),
            deepgram: None,
        },
    }
}

struct Harness {
    commands: mpsc::UnboundedSender<ShellCommand>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    worker: tokio::task::JoinHandle<courtside::Result<()>>,
}

fn spawn_session(server: &MockServer, options: SessionOptions) -> Harness {
    let (events_tx, events) = mpsc::unbounded_channel();
    let (commands, cmd_rx) = mpsc::unbounded_channel();
    let config = test_config(server.uri());
    let session = Session::new(&config, options, events_tx).unwrap();
    let worker = tokio::spawn(session.run(cmd_rx));
    Harness {
        commands,
        events,
        worker,
    }
}

impl Harness {
    async fn next_event(&mut self) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    /// Drain events until the predicate matches, returning the match
    async fn next_matching(
        &mut self,
        mut pred: impl FnMut(&SessionEvent) -> bool,
    ) -> SessionEvent {
        loop {
            let event = self.next_event().await;
            if pred(&event) {
                return event;
            }
        }
    }
}

#[tokio::test]
async fn greeting_opens_the_session() {
    let server = MockServer::start().await;
    let mut harness = spawn_session(&server, SessionOptions::terminal());

    let event = harness.next_event().await;
    match event {
        SessionEvent::Greeting { text } => assert_eq!(text, "Let's talk sports!"),
        other => panic!("expected greeting, got {other:?}"),
    }

    harness.commands.send(ShellCommand::Shutdown).unwrap();
    harness.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn text_turn_streams_and_completes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse_body(&["They", " won", " last night."]),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let mut harness = spawn_session(&server, SessionOptions::terminal());
    harness
        .commands
        .send(ShellCommand::SubmitText("How did the Lakers do?".to_string()))
        .unwrap();

    let turn = harness
        .next_matching(|e| matches!(e, SessionEvent::UserTurn { .. }))
        .await;
    match turn {
        SessionEvent::UserTurn { text } => assert_eq!(text, "How did the Lakers do?"),
        _ => unreachable!(),
    }

    let mut fragments = Vec::new();
    loop {
        match harness.next_event().await {
            SessionEvent::AssistantFragment { text } => fragments.push(text),
            SessionEvent::TurnComplete { text } => {
                assert_eq!(text, "They won last night.");
                break;
            }
            other => panic!("unexpected event mid-turn: {other:?}"),
        }
    }
    assert_eq!(fragments, vec!["They", " won", " last night."]);

    harness.commands.send(ShellCommand::Shutdown).unwrap();
    harness.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn quit_exits_immediately_without_api_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut harness = spawn_session(&server, SessionOptions::terminal());
    harness
        .commands
        .send(ShellCommand::SubmitText("quit".to_string()))
        .unwrap();

    harness
        .next_matching(|e| matches!(e, SessionEvent::SessionEnded))
        .await;
    harness.worker.await.unwrap().unwrap();

    // No user turn was submitted on the way out.
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn exit_keyword_is_trimmed_and_case_insensitive() {
    let server = MockServer::start().await;
    let mut harness = spawn_session(&server, SessionOptions::gui());
    harness
        .commands
        .send(ShellCommand::SubmitText("  EXIT  ".to_string()))
        .unwrap();

    harness
        .next_matching(|e| matches!(e, SessionEvent::SessionEnded))
        .await;
    harness.worker.await.unwrap().unwrap();
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn gui_mode_does_not_treat_quit_as_exit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(&["ok"]), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    // "quit" is a regular sports question as far as the GUI is concerned.
    let mut harness = spawn_session(&server, SessionOptions::gui());
    harness
        .commands
        .send(ShellCommand::SubmitText("quit".to_string()))
        .unwrap();

    harness
        .next_matching(|e| matches!(e, SessionEvent::TurnComplete { .. }))
        .await;

    harness.commands.send(ShellCommand::Shutdown).unwrap();
    harness.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn empty_input_is_discarded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut harness = spawn_session(&server, SessionOptions::terminal());
    harness
        .commands
        .send(ShellCommand::SubmitText("   ".to_string()))
        .unwrap();
    harness.commands.send(ShellCommand::Shutdown).unwrap();

    // Only the greeting and the shutdown notice; never a user turn.
    loop {
        match harness.next_event().await {
            SessionEvent::UserTurn { .. } => panic!("blank input must not submit a turn"),
            SessionEvent::SessionEnded => break,
            _ => {}
        }
    }
    harness.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn chat_failure_renders_one_error_and_reenables_input() {
    let server = MockServer::start().await;
    // First request fails, the retry (a fresh turn) succeeds.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend exploded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&["Second time lucky."]), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let mut harness = spawn_session(&server, SessionOptions::terminal());

    harness
        .commands
        .send(ShellCommand::SubmitText("first".to_string()))
        .unwrap();
    harness
        .next_matching(|e| matches!(e, SessionEvent::UserTurn { .. }))
        .await;

    // Exactly one error entry replaces the reply.
    let error = harness.next_event().await;
    match &error {
        SessionEvent::Error { message } => assert!(message.starts_with("Error: ")),
        other => panic!("expected error event, got {other:?}"),
    }

    // The session is interactive again: a new turn completes normally.
    harness
        .commands
        .send(ShellCommand::SubmitText("second".to_string()))
        .unwrap();
    let complete = harness
        .next_matching(|e| matches!(e, SessionEvent::TurnComplete { .. }))
        .await;
    match complete {
        SessionEvent::TurnComplete { text } => assert_eq!(text, "Second time lucky."),
        _ => unreachable!(),
    }

    harness.commands.send(ShellCommand::Shutdown).unwrap();
    harness.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn turns_never_interleave() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&["reply"]), "text/event-stream")
                .set_delay(Duration::from_millis(100)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let mut harness = spawn_session(&server, SessionOptions::terminal());

    // Two submissions in quick succession: the second must queue behind
    // the first, never issuing a concurrent completion request.
    harness
        .commands
        .send(ShellCommand::SubmitText("one".to_string()))
        .unwrap();
    harness
        .commands
        .send(ShellCommand::SubmitText("two".to_string()))
        .unwrap();

    let mut order = Vec::new();
    loop {
        match harness.next_event().await {
            SessionEvent::UserTurn { text } => order.push(format!("user:{text}")),
            SessionEvent::TurnComplete { .. } => {
                order.push("complete".to_string());
                if order.len() == 4 {
                    break;
                }
            }
            _ => {}
        }
    }

    assert_eq!(order, vec!["user:one", "complete", "user:two", "complete"]);

    harness.commands.send(ShellCommand::Shutdown).unwrap();
    harness.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn speed_commands_clamp_within_bounds() {
    let server = MockServer::start().await;
    let mut harness = spawn_session(&server, SessionOptions::gui());

    // 12 steps up from 1.0 caps at 2.0.
    for _ in 0..12 {
        harness.commands.send(ShellCommand::SpeedUp).unwrap();
    }
    let mut last = 0.0_f32;
    for _ in 0..12 {
        if let SessionEvent::SpeedChanged { speed } = harness
            .next_matching(|e| matches!(e, SessionEvent::SpeedChanged { .. }))
            .await
        {
            last = speed;
        }
    }
    assert!((last - 2.0).abs() < 0.01, "speed was {last}");

    harness.commands.send(ShellCommand::Shutdown).unwrap();
    harness.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn conversation_persists_across_turns() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(&["noted"]), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let mut harness = spawn_session(&server, SessionOptions::terminal());
    for text in ["first question", "second question"] {
        harness
            .commands
            .send(ShellCommand::SubmitText(text.to_string()))
            .unwrap();
        harness
            .next_matching(|e| matches!(e, SessionEvent::TurnComplete { .. }))
            .await;
    }
    harness.commands.send(ShellCommand::Shutdown).unwrap();
    harness.worker.await.unwrap().unwrap();

    // The second request carries the whole history: persona instruction,
    // greeting, first turn pair, then the second question.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body: serde_json::Value = requests[1].body_json().unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages[0]["role"], "system");
    assert!(
        messages[0]["content"]
            .as_str()
            .unwrap()
            .contains("Sports Expert")
    );
    let roles: Vec<&str> = messages
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(
        roles,
        vec!["system", "assistant", "user", "assistant", "user"]
    );
    assert_eq!(messages[4]["content"], "second question");
}
