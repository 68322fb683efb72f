//! HTTP client for the external format-conversion service.

use std::time::Duration;

use async_trait::async_trait;
use docflow_shared::{ConversionConfig, DocflowError, Result, read_secret};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

const USER_AGENT: &str = concat!("docflow/", env!("CARGO_PKG_VERSION"));

/// Converts a document to PDF in two phases: submit, then fetch the result.
#[async_trait]
pub trait ConversionService: Send + Sync {
    /// Submit a file for conversion; returns where the result can be fetched.
    async fn submit(&self, bytes: &[u8], filename: &str, content_type: &str) -> Result<String>;

    /// Download a converted file.
    async fn fetch(&self, location: &str) -> Result<Vec<u8>>;
}

/// Credentials sent with every job submission.
#[derive(Clone)]
pub struct ConversionCredentials {
    pub application_id: String,
    pub secret_key: String,
}

impl std::fmt::Debug for ConversionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionCredentials")
            .field("application_id", &self.application_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertResponse {
    status: String,
    file_download_url: Option<String>,
    error_message: Option<String>,
}

/// Why a single request attempt failed.
enum AttemptError {
    /// Worth retrying: timeouts, connection errors, 429 and 5xx.
    Transient(String),
    Fatal(String),
}

impl AttemptError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Self::Transient(e.to_string())
        } else {
            Self::Fatal(e.to_string())
        }
    }

    fn from_status(status: StatusCode, body: &str) -> Self {
        let message = format!("HTTP {status}: {body}");
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::Transient(message)
        } else {
            Self::Fatal(message)
        }
    }
}

/// reqwest-based [`ConversionService`].
pub struct HttpConversionClient {
    client: Client,
    endpoint: String,
    credentials: ConversionCredentials,
    submit_timeout: Duration,
    submit_attempts: u32,
    fetch_timeout: Duration,
    fetch_attempts: u32,
    backoff: Duration,
}

impl HttpConversionClient {
    pub fn new(config: &ConversionConfig, credentials: ConversionCredentials) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| DocflowError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            credentials,
            submit_timeout: config.submit_timeout(),
            submit_attempts: config.submit_attempts.max(1),
            fetch_timeout: config.fetch_timeout(),
            fetch_attempts: config.fetch_retries + 1,
            backoff: Duration::from_millis(500),
        })
    }

    /// Build a client reading credentials from the configured env vars.
    pub fn from_config(config: &ConversionConfig) -> Result<Self> {
        let credentials = ConversionCredentials {
            application_id: read_secret(&config.application_id_env)?,
            secret_key: read_secret(&config.secret_key_env)?,
        };
        Self::new(config, credentials)
    }

    /// Override the base delay between attempts (doubles per attempt).
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn submit_once(
        &self,
        bytes: &[u8],
        filename: &str,
        content_type: &str,
    ) -> std::result::Result<String, AttemptError> {
        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(filename.to_string())
            .mime_str(content_type)
            .map_err(|e| AttemptError::Fatal(format!("invalid content type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("inputFile", part)
            .text("outputFormat", "pdf")
            .text("async", "false");

        let response = self
            .client
            .post(format!("{}/jobs/create", self.endpoint))
            .header("X-ApplicationID", &self.credentials.application_id)
            .header("X-SecretKey", &self.credentials.secret_key)
            .timeout(self.submit_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(AttemptError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::from_status(status, &body));
        }

        let parsed: ConvertResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Fatal(format!("invalid conversion response: {e}")))?;

        if parsed.status != "Success" {
            return Err(AttemptError::Fatal(format!(
                "conversion {}: {}",
                parsed.status.to_lowercase(),
                parsed.error_message.as_deref().unwrap_or("no reason given")
            )));
        }
        parsed
            .file_download_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| AttemptError::Fatal("conversion response has no download url".into()))
    }

    async fn fetch_once(&self, location: &str) -> std::result::Result<Vec<u8>, AttemptError> {
        let response = self
            .client
            .get(location)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(AttemptError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::from_status(status, &body));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(AttemptError::from_reqwest)
    }

    async fn pause(&self, attempt: u32) {
        let delay = self.backoff * 2u32.saturating_pow(attempt.saturating_sub(1));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ConversionService for HttpConversionClient {
    #[instrument(skip_all, fields(filename = %filename, size = bytes.len()))]
    async fn submit(&self, bytes: &[u8], filename: &str, content_type: &str) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.submit_once(bytes, filename, content_type).await {
                Ok(location) => {
                    debug!(attempt, "conversion job accepted");
                    return Ok(location);
                }
                Err(AttemptError::Transient(message)) if attempt < self.submit_attempts => {
                    warn!(attempt, error = %message, "conversion submit failed, retrying");
                    self.pause(attempt).await;
                    attempt += 1;
                }
                Err(AttemptError::Transient(message)) => {
                    return Err(DocflowError::Network(format!(
                        "conversion submit failed after {attempt} attempts: {message}"
                    )));
                }
                Err(AttemptError::Fatal(message)) => {
                    return Err(DocflowError::NormalizationFailed(message));
                }
            }
        }
    }

    #[instrument(skip_all)]
    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(location).await {
                Ok(bytes) => {
                    debug!(attempt, size = bytes.len(), "converted file downloaded");
                    return Ok(bytes);
                }
                Err(AttemptError::Transient(message)) if attempt < self.fetch_attempts => {
                    warn!(attempt, error = %message, "converted file download failed, retrying");
                    self.pause(attempt).await;
                    attempt += 1;
                }
                Err(AttemptError::Transient(message) | AttemptError::Fatal(message)) => {
                    return Err(DocflowError::Network(format!(
                        "converted file download failed: {message}"
                    )));
                }
            }
        }
    }
}
