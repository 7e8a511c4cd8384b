//! Publisher REST API client
//!
//! Uploads documents shared during a session and relays speech request
//! decisions and the course recording flag to the streaming backend.
//!
//! # Endpoints
//!
//! - `POST /api/v1/publisher/file/upload` (multipart, returns the remote file handle)
//! - `POST /api/v1/publisher/speech/accept/:id`
//! - `POST /api/v1/publisher/speech/reject/:id`
//! - `POST /api/v1/publisher/course/recorded/:course/:recorded`

use crate::config::StreamConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const API_PREFIX: &str = "/api/v1/publisher";

/// Uploads serialized documents and returns their remote file handle
#[async_trait]
pub trait DocumentUploader: Send + Sync {
    async fn upload_file(&self, file_name: &str, data: Bytes) -> Result<String>;
}

/// Backend side of audience speech requests and recording state
#[async_trait]
pub trait SpeechService: Send + Sync {
    async fn accept_speech_request(&self, request_id: Uuid) -> Result<()>;

    async fn reject_speech_request(&self, request_id: Uuid) -> Result<()>;

    async fn set_recording(&self, course_id: &str, recorded: bool) -> Result<()>;
}

/// reqwest-backed publisher API client
#[derive(Debug, Clone)]
pub struct StreamRestClient {
    /// Base URL (e.g., "https://stream.example.org")
    base_url: String,

    /// Optional bearer token
    access_token: Option<String>,

    client: reqwest::Client,
}

impl StreamRestClient {
    /// Create a new client
    ///
    /// # Arguments
    ///
    /// * `base_url` - API base URL, without the `/api/v1/publisher` prefix
    /// * `access_token` - Optional bearer token
    /// * `timeout` - Per-request timeout
    pub fn new(
        base_url: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.into();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "Publisher API URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
            client,
        })
    }

    /// Create a client from the session configuration
    pub fn from_config(config: &StreamConfig) -> Result<Self> {
        Self::new(
            config.api_url(),
            config.access_token.clone(),
            Duration::from_secs(config.http_timeout_secs),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(url);

        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check_status(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Err(Error::Network(format!(
            "{} failed: HTTP {} {}: {}",
            operation,
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown"),
            error_text
        )))
    }

    async fn post_empty(&self, path: &str, operation: &str) -> Result<()> {
        let url = self.endpoint(path);
        debug!("POST {}", url);

        let response = self.post(&url).send().await?;
        Self::check_status(response, operation).await?;

        Ok(())
    }
}

#[async_trait]
impl DocumentUploader for StreamRestClient {
    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn upload_file(&self, file_name: &str, data: Bytes) -> Result<String> {
        let url = self.endpoint("/file/upload");

        let part = reqwest::multipart::Part::bytes(data.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(|e| Error::Upload(format!("Invalid upload part: {}", e)))?;

        let form = reqwest::multipart::Form::new()
            .text("name", file_name.to_string())
            .part("file", part);

        let response = self.post(&url).multipart(form).send().await?;
        let response = Self::check_status(response, "Upload file").await?;

        let handle = response.text().await?;
        let handle = handle.trim().to_string();

        if handle.is_empty() {
            return Err(Error::Upload(format!(
                "Empty file handle returned for {}",
                file_name
            )));
        }

        info!("Uploaded {} as {}", file_name, handle);

        Ok(handle)
    }
}

#[async_trait]
impl SpeechService for StreamRestClient {
    async fn accept_speech_request(&self, request_id: Uuid) -> Result<()> {
        self.post_empty(&format!("/speech/accept/{}", request_id), "Accept speech request")
            .await
    }

    async fn reject_speech_request(&self, request_id: Uuid) -> Result<()> {
        self.post_empty(&format!("/speech/reject/{}", request_id), "Reject speech request")
            .await
    }

    async fn set_recording(&self, course_id: &str, recorded: bool) -> Result<()> {
        self.post_empty(
            &format!("/course/recorded/{}/{}", course_id, recorded),
            "Set course recording state",
        )
        .await
    }
}
