//! Mira: an embeddable marketing chat widget with a live generated
//! content panel. The crate splits into three layers: the streaming
//! pipeline (SSE decode, tag-balance extraction, DOM patching,
//! sanitizing), the client session that drives a turn end to end, and
//! the proxy server that fronts the upstream model and transcription
//! providers.

pub mod cli;
pub mod color;
pub mod dom;
pub mod error;
pub mod extract;
pub mod panel;
pub mod prompts;
pub mod providers;
pub mod sanitize;
pub mod schema;
pub mod session;
pub mod sse;
pub mod transcribe;
pub mod transcript;
pub mod upstream;
pub mod web;

use std::path::PathBuf;

pub use error::WidgetError;
pub use extract::HtmlBuffer;
pub use panel::PanelController;
pub use sanitize::Theme;
pub use schema::{ChatMessage, Role, StreamEvent};
pub use session::ChatSession;
pub use transcript::Transcript;

pub const DEFAULT_KNOWLEDGE_PATH: &str = "knowledge.md";

/// Runtime configuration. API keys are optional on purpose: the server
/// starts without them and answers the affected routes with a
/// configuration error instead of refusing to boot.
#[derive(Debug, Clone)]
pub struct Config {
    pub openrouter_api_key: Option<String>,
    /// Overrides the default completions endpoint (tests, self-hosted
    /// gateways).
    pub openrouter_base_url: Option<String>,
    pub assemblyai_api_key: Option<String>,
    pub knowledge_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            openrouter_api_key: env_nonempty("OPENROUTER_API_KEY"),
            openrouter_base_url: env_nonempty("OPENROUTER_BASE_URL"),
            assemblyai_api_key: env_nonempty("ASSEMBLYAI_API_KEY"),
            knowledge_path: env_nonempty("MIRA_KNOWLEDGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_KNOWLEDGE_PATH)),
        }
    }

    /// Config with no keys set, for tests and dry runs.
    pub fn empty() -> Self {
        Config {
            openrouter_api_key: None,
            openrouter_base_url: None,
            assemblyai_api_key: None,
            knowledge_path: PathBuf::from(DEFAULT_KNOWLEDGE_PATH),
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}
