//! Wire types for the two upstream services: OpenRouter chat completions
//! (streamed, OpenAI-compatible chunks) and the AssemblyAI transcription
//! API (upload / job / status polling).

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// OpenRouter chat completions
// ---------------------------------------------------------------------------

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const OPENROUTER_MODEL: &str = "anthropic/claude-sonnet-4.5";

#[derive(Debug, Serialize)]
pub struct OpenRouterMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct OpenRouterRequest {
    pub model: String,
    pub messages: Vec<OpenRouterMessage>,
    pub stream: bool,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct OpenRouterDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenRouterChoice {
    pub delta: OpenRouterDelta,
    #[allow(dead_code)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenRouterChunk {
    pub choices: Vec<OpenRouterChoice>,
}

// ---------------------------------------------------------------------------
// AssemblyAI transcription
// ---------------------------------------------------------------------------

pub const ASSEMBLYAI_BASE: &str = "https://api.assemblyai.com/v2";

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub upload_url: String,
}

#[derive(Debug, Serialize)]
pub struct TranscriptRequest {
    pub audio_url: String,
    pub language_code: String,
}

#[derive(Debug, Deserialize)]
pub struct TranscriptJob {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct TranscriptStatus {
    pub status: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
