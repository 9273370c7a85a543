//! Client-side turn driver: owns the transcript and the panel, opens the
//! two per-turn streams against the proxy, and folds their decoded
//! `StreamEvent`s into state. The two streams are independent requests
//! with no relative ordering; both feed one merged channel and the turn
//! completes when both have closed. Dropping the turn future (or calling
//! `reset`) drops the receiver, which the forwarding tasks observe as a
//! closed channel and stop — stale bytes from an abandoned turn can
//! never reach the state again.

use crate::error::WidgetError;
use crate::panel::PanelController;
use crate::sanitize::Theme;
use crate::schema::{ChatRequest, HtmlRequest, StreamEvent};
use crate::sse::EventDecoder;
use crate::transcript::Transcript;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Which of the turn's two streams an event came from. Chat errors are
/// user-visible; HTML errors only mean the panel keeps its last content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Chat,
    Html,
}

pub struct ChatSession {
    pub transcript: Transcript,
    pub panel: PanelController,
    client: Client,
    base_url: String,
}

impl ChatSession {
    pub fn new(base_url: impl Into<String>, theme: Theme) -> Self {
        ChatSession {
            transcript: Transcript::new(),
            panel: PanelController::new(theme),
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Apply one decoded event to local state. Pure state transition —
    /// this is where every wire event lands, stream order preserved per
    /// side.
    pub fn apply_event(&mut self, side: Side, event: StreamEvent) {
        match event {
            StreamEvent::ChatStart => self.transcript.begin_assistant(),
            StreamEvent::ChatChunk { content } => self.transcript.append_streaming(&content),
            StreamEvent::ChatEnd { full_message } => {
                self.transcript.finalize_assistant(&full_message);
            }
            StreamEvent::HtmlStart => self.panel.begin_generation(),
            StreamEvent::HtmlChunk { content } => {
                self.panel.push_chunk(&content);
            }
            StreamEvent::HtmlEnd { full_html } => {
                self.panel.finish_generation(full_html.as_deref());
            }
            StreamEvent::Error { message } => match side {
                Side::Chat => {
                    warn!(%message, "chat stream failed");
                    self.transcript.fail_assistant();
                }
                Side::Html => {
                    // Panel silently keeps its last good content.
                    debug!(%message, "html stream failed");
                }
            },
        }
    }

    /// Run one full user turn: append the user message, stream both the
    /// chat reply and the panel generation, apply events until both
    /// streams close.
    pub async fn send_message(&mut self, text: &str) -> Result<(), WidgetError> {
        self.transcript.push_user(text);

        let chat_body = ChatRequest {
            messages: self.transcript.messages().to_vec(),
        };
        let html_body = HtmlRequest {
            conversation_context: self.transcript.conversation_context(),
            last_user_message: text.to_string(),
            current_html: if self.panel.has_content() {
                Some(self.panel.rendered_html())
            } else {
                None
            },
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<(Side, StreamEvent)>();
        tokio::spawn(forward_stream(
            self.client.clone(),
            format!("{}/api/chat/stream", self.base_url),
            chat_body,
            Side::Chat,
            tx.clone(),
        ));
        tokio::spawn(forward_stream(
            self.client.clone(),
            format!("{}/api/html/stream", self.base_url),
            html_body,
            Side::Html,
            tx,
        ));

        while let Some((side, event)) = rx.recv().await {
            self.apply_event(side, event);
        }
        Ok(())
    }

    /// Conversation reset: transcript and panel back to initial state.
    /// Any in-flight turn's forwarding tasks die on their next send.
    pub fn reset(&mut self) {
        self.transcript.reset();
        self.panel.reset();
    }
}

/// Decode one SSE response into events on the merged channel. Transport
/// failures become a single `error` event for the owning side.
async fn forward_stream<B: Serialize>(
    client: Client,
    url: String,
    body: B,
    side: Side,
    tx: mpsc::UnboundedSender<(Side, StreamEvent)>,
) {
    let response = match client.post(&url).json(&body).send().await {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            let message = format!("HTTP {}", resp.status().as_u16());
            let _ = tx.send((side, StreamEvent::Error { message }));
            return;
        }
        Err(e) => {
            let _ = tx.send((side, StreamEvent::Error { message: e.to_string() }));
            return;
        }
    };

    let mut stream = response.bytes_stream();
    let mut decoder = EventDecoder::new();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send((side, StreamEvent::Error { message: e.to_string() }));
                return;
            }
        };
        for event in decoder.push(&chunk) {
            if tx.send((side, event)).is_err() {
                // Turn abandoned; stop reading.
                return;
            }
        }
    }
}
