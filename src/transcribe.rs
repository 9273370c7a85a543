//! Transcription proxy: upload the recorded clip, open a transcription
//! job, poll until it settles. The poll loop is bounded; running out of
//! attempts is a distinct timeout error rather than an endless wait.

use crate::error::WidgetError;
use crate::providers::{
    TranscriptJob, TranscriptRequest, TranscriptStatus, UploadResponse, ASSEMBLYAI_BASE,
};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
/// 120 polls at one second apiece — about two minutes of wall clock.
pub const DEFAULT_MAX_POLLS: u32 = 120;

const LANGUAGE_CODE: &str = "ru";

pub struct Transcriber {
    client: Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl Transcriber {
    pub fn new(api_key: String) -> Self {
        Transcriber {
            client: Client::new(),
            api_key,
            base_url: ASSEMBLYAI_BASE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_poll_budget(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    /// Full upload → job → poll round trip; returns the transcript text.
    pub async fn transcribe(&self, audio: Vec<u8>) -> Result<String, WidgetError> {
        let upload_url = self.upload(audio).await?;
        let job_id = self.create_job(&upload_url).await?;
        info!(job_id = %job_id, "transcription job created");
        self.poll(&job_id).await
    }

    async fn upload(&self, audio: Vec<u8>) -> Result<String, WidgetError> {
        let response = self
            .client
            .post(format!("{}/upload", self.base_url))
            .header("authorization", &self.api_key)
            .header("Content-Type", "application/octet-stream")
            .body(audio)
            .send()
            .await?;
        let response = check_status(response).await?;
        let upload: UploadResponse = response.json().await?;
        Ok(upload.upload_url)
    }

    async fn create_job(&self, audio_url: &str) -> Result<String, WidgetError> {
        let request = TranscriptRequest {
            audio_url: audio_url.to_string(),
            language_code: LANGUAGE_CODE.to_string(),
        };
        let response = self
            .client
            .post(format!("{}/transcript", self.base_url))
            .header("authorization", &self.api_key)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;
        let job: TranscriptJob = response.json().await?;
        Ok(job.id)
    }

    async fn poll(&self, job_id: &str) -> Result<String, WidgetError> {
        for attempt in 1..=self.max_polls {
            let response = self
                .client
                .get(format!("{}/transcript/{}", self.base_url, job_id))
                .header("authorization", &self.api_key)
                .send()
                .await?;
            let response = check_status(response).await?;
            let status: TranscriptStatus = response.json().await?;
            debug!(attempt, status = %status.status, "transcription poll");

            match status.status.as_str() {
                "completed" => return Ok(status.text.unwrap_or_default()),
                "error" => {
                    return Err(WidgetError::Transcription(
                        status
                            .error
                            .unwrap_or_else(|| "transcription failed".to_string()),
                    ))
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
        Err(WidgetError::PollTimeout {
            attempts: self.max_polls,
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, WidgetError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(WidgetError::UpstreamStatus {
            status,
            body: body.chars().take(300).collect(),
        })
    }
}
