//! External collaborators of the summary sub-pipeline: text extraction and
//! the generative summarization service.

use std::time::Duration;

use async_trait::async_trait;
use docflow_shared::{DocflowError, Result, SummarizationConfig, read_secret};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

const PROMPT_PREFIX: &str =
    "Please provide a concise summary of this document, highlighting the key takeaways: ";

/// Produces a summary of plain text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Transient failures (timeouts, 429, 5xx) are reported as
    /// [`DocflowError::Network`]; everything else as `SummarizationFailed`.
    async fn summarize(&self, text: &str) -> Result<String>;
}

/// Extracts plain text from canonical PDF bytes.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, pdf: Vec<u8>) -> Result<String>;
}

// ---------------------------------------------------------------------------
// PDF text extraction
// ---------------------------------------------------------------------------

/// [`TextExtractor`] backed by `pdf-extract`, run on the blocking pool.
pub struct PdfTextExtractor;

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, pdf: Vec<u8>) -> Result<String> {
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&pdf))
            .await
            .map_err(|e| DocflowError::SummarizationFailed(format!("extraction task failed: {e}")))?
            .map_err(|e| DocflowError::SummarizationFailed(format!("text extraction failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// [`Summarizer`] calling the Gemini `generateContent` endpoint.
pub struct GeminiSummarizer {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiSummarizer {
    pub fn new(config: &SummarizationConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DocflowError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    /// Build a summarizer reading the API key from the configured env var.
    pub fn from_config(config: &SummarizationConfig) -> Result<Self> {
        Self::new(config, read_secret(&config.api_key_env)?)
    }
}

#[async_trait]
impl Summarizer for GeminiSummarizer {
    #[instrument(skip_all, fields(model = %self.model, chars = text.len()))]
    async fn summarize(&self, text: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        );
        let body = serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": format!("{PROMPT_PREFIX}{text}") }]
            }]
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    DocflowError::Network(format!("summarization request failed: {e}"))
                } else {
                    DocflowError::SummarizationFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {body}");
            return Err(
                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    DocflowError::Network(message)
                } else {
                    DocflowError::SummarizationFailed(message)
                },
            );
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            DocflowError::SummarizationFailed(format!("invalid summarization response: {e}"))
        })?;

        let summary: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if summary.trim().is_empty() {
            return Err(DocflowError::SummarizationFailed(
                "service returned an empty summary".into(),
            ));
        }
        debug!(chars = summary.len(), "summary generated");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn summarizer(endpoint: &str) -> GeminiSummarizer {
        let config = SummarizationConfig {
            endpoint: endpoint.to_string(),
            model: "test-model".into(),
            ..SummarizationConfig::default()
        };
        GeminiSummarizer::new(&config, "key-123".into()).unwrap()
    }

    #[tokio::test]
    async fn parses_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/test-model:generateContent"))
            .and(header("x-goog-api-key", "key-123"))
            .and(body_string_contains("highlighting the key takeaways: Quarterly numbers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "Revenue " }, { "text": "grew." }] }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let summary = summarizer(&server.uri())
            .summarize("Quarterly numbers")
            .await
            .unwrap();
        assert_eq!(summary, "Revenue grew.");
    }

    #[tokio::test]
    async fn empty_candidates_fail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": []
            })))
            .mount(&server)
            .await;

        let err = summarizer(&server.uri()).summarize("text").await.unwrap_err();
        assert!(matches!(err, DocflowError::SummarizationFailed(_)));
    }

    #[tokio::test]
    async fn classifies_http_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .mount(&server)
            .await;

        let s = summarizer(&server.uri());
        assert!(matches!(s.summarize("x").await, Err(DocflowError::Network(_))));
        assert!(matches!(
            s.summarize("x").await,
            Err(DocflowError::SummarizationFailed(ref m)) if m.contains("bad request")
        ));
    }

    #[tokio::test]
    async fn garbage_pdf_fails_extraction() {
        let err = PdfTextExtractor
            .extract(b"not a pdf at all".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, DocflowError::SummarizationFailed(_)));
    }
}
