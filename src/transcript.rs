//! Append-only chat transcript plus the ephemeral "currently streaming"
//! assistant text. Past entries are never mutated; the only way back to
//! empty is an explicit conversation reset.

use crate::schema::{ChatMessage, Role};

/// Apology bubble appended when a turn fails.
pub const FALLBACK_MESSAGE: &str = "Извините, произошла ошибка. Попробуйте ещё раз.";

#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    streaming: Option<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Transcript::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Text of the assistant bubble currently being typed, if any.
    pub fn streaming_text(&self) -> Option<&str> {
        self.streaming.as_deref()
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> ChatMessage {
        let msg = ChatMessage::new(Role::User, content);
        self.messages.push(msg.clone());
        msg
    }

    /// Opens the streaming bubble (idempotent per turn).
    pub fn begin_assistant(&mut self) {
        self.streaming = Some(String::new());
    }

    pub fn append_streaming(&mut self, delta: &str) {
        self.streaming.get_or_insert_with(String::new).push_str(delta);
    }

    /// Closes the streaming bubble with the authoritative final text,
    /// which wins over whatever was accumulated chunk by chunk.
    pub fn finalize_assistant(&mut self, full_message: &str) -> ChatMessage {
        self.streaming = None;
        let msg = ChatMessage::new(Role::Assistant, full_message);
        self.messages.push(msg.clone());
        msg
    }

    /// Turn failed: drop the partial bubble, append the apology.
    pub fn fail_assistant(&mut self) {
        self.streaming = None;
        self.messages
            .push(ChatMessage::new(Role::Assistant, FALLBACK_MESSAGE));
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.streaming = None;
    }

    /// `role: content` lines for the HTML-generation context.
    pub fn conversation_context(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                format!("{}: {}", role, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}
