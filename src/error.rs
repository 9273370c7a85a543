use std::time::Duration;
use thiserror::Error;

/// Crate-level error taxonomy. Route handlers convert these into
/// HTTP status codes or terminal SSE `error` frames at the boundary.
#[derive(Debug, Error)]
pub enum WidgetError {
    /// A required API key or setting is absent from the environment.
    #[error("{0}")]
    Config(String),

    /// Inbound request body failed schema validation.
    #[error("Invalid request format")]
    BadRequest,

    /// Upstream answered with a non-success HTTP status.
    #[error("upstream API error ({status}): {body}")]
    UpstreamStatus { status: u16, body: String },

    /// Transport-level failure talking to an upstream service.
    #[error("upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream byte stream produced nothing for longer than the limit.
    #[error("upstream stream idle for over {0:?}")]
    StreamIdle(Duration),

    /// Transcription job reported a terminal failure.
    #[error("transcription failed: {0}")]
    Transcription(String),

    /// Transcription poll loop exhausted its attempt budget.
    #[error("transcription timed out after {attempts} polls")]
    PollTimeout { attempts: u32 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WidgetError {
    /// True when the client should see this as a configuration problem
    /// (HTTP 500 with a remediation message) rather than a runtime one.
    pub fn is_config(&self) -> bool {
        matches!(self, WidgetError::Config(_))
    }
}
