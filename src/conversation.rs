//! Conversation state: an ordered, append-only sequence of role-tagged messages
//!
//! The first message is always the persona instruction and is never mutated
//! or removed. Sessions are in-memory only; nothing is persisted.

use serde::Serialize;

use crate::persona::Persona;

/// Message author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// The running chat context for one session
///
/// Seeded with the persona instruction (and greeting, when the persona has
/// one) at construction; user and assistant turns are appended as the
/// session progresses.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Create a conversation seeded from a persona
    #[must_use]
    pub fn new(persona: &Persona) -> Self {
        let mut messages = vec![Message::new(Role::System, &persona.system_prompt)];
        if let Some(greeting) = &persona.greeting {
            messages.push(Message::new(Role::Assistant, greeting));
        }
        Self { messages }
    }

    /// Append a user turn
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::new(Role::User, text));
    }

    /// Append a completed assistant reply
    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(Message::new(Role::Assistant, text));
    }

    /// The full ordered message sequence
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The fixed persona instruction (always the first message)
    #[must_use]
    pub fn persona_instruction(&self) -> &str {
        &self.messages[0].content
    }

    /// Number of messages, persona instruction included
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
