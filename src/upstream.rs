//! Streaming OpenRouter client. One instance per server process; each
//! call opens a streamed chat-completions request, forwards every
//! content delta through the caller's channel as it decodes, and returns
//! the assembled full text. Connection establishment is wrapped in a
//! bounded retry loop; once the first byte has been forwarded there is
//! no retrying, because the SSE client downstream cannot be rewound. A
//! stream that goes silent past the idle limit is cut off instead.

use crate::error::WidgetError;
use crate::providers::{OpenRouterMessage, OpenRouterRequest, OPENROUTER_MODEL, OPENROUTER_URL};
use crate::schema::{ChatMessage, Role};
use crate::sse::DeltaDecoder;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{info, warn};

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// A turn whose upstream goes silent for this long is aborted rather
/// than pinned open.
const STREAM_IDLE_LIMIT: Duration = Duration::from_secs(60);

const CHAT_MAX_TOKENS: u32 = 4096;
const CHAT_TEMPERATURE: f32 = 0.7;
const HTML_MAX_TOKENS: u32 = 16384;
const HTML_TEMPERATURE: f32 = 0.9;

const REFERER: &str = "https://mira.example";
const TITLE: &str = "Mira Widget";

pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    idle_limit: Duration,
}

impl OpenRouterClient {
    pub fn new(api_key: String) -> Self {
        OpenRouterClient {
            client: Client::new(),
            api_key,
            base_url: OPENROUTER_URL.to_string(),
            model: OPENROUTER_MODEL.to_string(),
            idle_limit: STREAM_IDLE_LIMIT,
        }
    }

    /// Point at a different completions endpoint (tests use a local mock).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the stream idle limit (tests use a short one).
    pub fn with_idle_limit(mut self, limit: Duration) -> Self {
        self.idle_limit = limit;
        self
    }

    /// Stream the chat reply for a message history. Deltas go out through
    /// `tx` as they arrive; the return value is the assembled full text.
    pub async fn stream_chat(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<String, WidgetError> {
        let request = OpenRouterRequest {
            model: self.model.clone(),
            messages: with_system(system_prompt, messages),
            stream: true,
            max_tokens: CHAT_MAX_TOKENS,
            temperature: CHAT_TEMPERATURE,
        };
        self.stream_completion(&request, tx).await
    }

    /// Stream a panel HTML generation. The prompt already carries the
    /// conversation context; the sole user message is the question.
    pub async fn stream_html(
        &self,
        system_prompt: &str,
        last_user_message: &str,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<String, WidgetError> {
        let request = OpenRouterRequest {
            model: self.model.clone(),
            messages: vec![
                OpenRouterMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                OpenRouterMessage {
                    role: "user".to_string(),
                    content: last_user_message.to_string(),
                },
            ],
            stream: true,
            max_tokens: HTML_MAX_TOKENS,
            temperature: HTML_TEMPERATURE,
        };
        self.stream_completion(&request, tx).await
    }

    async fn stream_completion(
        &self,
        request: &OpenRouterRequest,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<String, WidgetError> {
        let response = self.connect_with_retry(request).await?;

        let mut stream = response.bytes_stream();
        let mut decoder = DeltaDecoder::new();
        let mut full = String::new();

        while let Some(chunk) = tokio::time::timeout(self.idle_limit, stream.next())
            .await
            .map_err(|_| WidgetError::StreamIdle(self.idle_limit))?
        {
            let chunk = chunk?;
            for delta in decoder.push(&chunk) {
                full.push_str(&delta);
                // Receiver gone means the client hung up; stop reading.
                if tx.send(delta).is_err() {
                    info!("downstream receiver dropped, aborting upstream read");
                    return Ok(full);
                }
            }
        }

        Ok(full)
    }

    /// Establish the streaming response. Retries cover request send and
    /// HTTP status only; by the time this returns, no delta has been
    /// forwarded yet.
    async fn connect_with_retry(
        &self,
        request: &OpenRouterRequest,
    ) -> Result<reqwest::Response, WidgetError> {
        let mut last_err: Option<WidgetError> = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match self.connect(request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(attempt, error = %e, "upstream connect failed");
                    last_err = Some(e);
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(CONNECT_BACKOFF).await;
                    }
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| WidgetError::Config("upstream retry loop empty".to_string())))
    }

    async fn connect(
        &self,
        request: &OpenRouterRequest,
    ) -> Result<reqwest::Response, WidgetError> {
        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(WidgetError::UpstreamStatus {
                status,
                body: truncate(&body, 300),
            });
        }
        Ok(response)
    }
}

fn with_system(system_prompt: &str, messages: &[ChatMessage]) -> Vec<OpenRouterMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(OpenRouterMessage {
        role: "system".to_string(),
        content: system_prompt.to_string(),
    });
    for m in messages {
        out.push(OpenRouterMessage {
            role: match m.role {
                Role::User => "user".to_string(),
                Role::Assistant => "assistant".to_string(),
            },
            content: m.content.clone(),
        });
    }
    out
}

fn truncate(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}
