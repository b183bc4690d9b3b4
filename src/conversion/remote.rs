//! Spreadsheet conversion through a hosted ConvertAPI-compatible service.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use super::strategy::{ConversionError, ConversionJob, ConversionStrategy, StrategyKind};

pub const DEFAULT_REMOTE_BASE_URL: &str = "https://v2.convertapi.com";

const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    #[serde(rename = "Files", default)]
    files: Vec<ConvertedFile>,
}

#[derive(Debug, Deserialize)]
struct ConvertedFile {
    #[serde(rename = "FileName")]
    file_name: Option<String>,
    #[serde(rename = "FileData")]
    file_data: Option<String>,
    #[serde(rename = "Url")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(rename = "Message")]
    message: Option<String>,
}

pub struct RemoteStrategy {
    client: reqwest::Client,
    base_url: String,
    secret: Option<String>,
}

impl RemoteStrategy {
    /// Create a new remote strategy.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the service (e.g., "https://v2.convertapi.com")
    /// * `secret` - API secret sent as a bearer token; without it the strategy is unavailable
    /// * `timeout_sec` - Request timeout in seconds
    pub fn new(
        base_url: &str,
        secret: Option<String>,
        timeout_sec: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.filter(|s| !s.is_empty()),
        })
    }

    async fn fetch_payload(&self, file: ConvertedFile) -> Result<Vec<u8>, ConversionError> {
        if let Some(data) = file.file_data {
            return base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|e| ConversionError::RemoteService(format!("invalid file data: {}", e)));
        }

        let url = file.url.ok_or_else(|| {
            ConversionError::RemoteService("converted file has neither data nor url".to_string())
        })?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConversionError::RemoteService(format!("download failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ConversionError::RemoteService(format!(
                "download failed with status {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ConversionError::RemoteService(format!("download failed: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ConversionStrategy for RemoteStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Remote
    }

    async fn convert(&self, job: &ConversionJob) -> Result<(), ConversionError> {
        let secret = self.secret.as_ref().ok_or_else(|| {
            ConversionError::ConverterUnavailable("no remote API secret configured".to_string())
        })?;

        let data = fs::read(&job.input_path).await?;
        let url = format!(
            "{}/convert/{}/to/{}",
            self.base_url,
            job.source_format.extension(),
            job.target_format.extension()
        );

        let part = reqwest::multipart::Part::bytes(data)
            .file_name(job.input_file_name().to_string())
            .mime_str(job.source_format.mime_type())
            .map_err(|e| ConversionError::RemoteService(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("File", part)
            .text("StoreFile", "false");

        debug!("Job {}: submitting to {}", job.id, url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(secret)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ConversionError::RemoteService(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ServiceError>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY_CHARS).collect());
            return Err(ConversionError::RemoteService(format!(
                "service responded {}: {}",
                status, message
            )));
        }

        let parsed: ConvertResponse = response
            .json()
            .await
            .map_err(|e| ConversionError::RemoteService(format!("invalid response: {}", e)))?;

        let file = parsed.files.into_iter().next().ok_or_else(|| {
            ConversionError::RemoteService("response contained no files".to_string())
        })?;
        debug!(
            "Job {}: service returned {}",
            job.id,
            file.file_name.as_deref().unwrap_or("an unnamed file")
        );

        let payload = self.fetch_payload(file).await?;
        if payload.is_empty() {
            return Err(ConversionError::RemoteService(
                "service returned an empty file".to_string(),
            ));
        }

        fs::create_dir_all(job.output_dir()).await?;
        fs::write(job.expected_output_path(), payload).await?;
        Ok(())
    }
}
