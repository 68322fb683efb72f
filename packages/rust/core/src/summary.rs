//! Summary sub-pipeline.
//!
//! Runs as its own `summarize` workflow instance after a document is READY.
//! Failures stay here: the instance is marked FAILED, a warning is logged and
//! the document is untouched.

use std::sync::Arc;
use std::time::Duration;

use docflow_blob::BlobStore;
use docflow_shared::{DocflowError, DocumentStatus, Result, SummarizationConfig};
use docflow_storage::{InstanceStatus, NewWorkflowInstance, Storage, WorkflowInstance, WorkflowKind};
use tracing::{info, instrument, warn};

use crate::summarizer::{Summarizer, TextExtractor};
use crate::workflow::StepContext;

/// Deterministic id of the summary instance for a document, so enqueueing
/// twice creates one instance.
pub fn summary_instance_id(document_id: &str) -> String {
    format!("{document_id}:summary")
}

#[derive(Clone)]
pub struct SummaryPipeline {
    storage: Arc<Storage>,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn TextExtractor>,
    summarizer: Arc<dyn Summarizer>,
    max_attempts: u32,
    max_input_chars: usize,
    backoff: Duration,
}

impl SummaryPipeline {
    pub fn new(
        storage: Arc<Storage>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
        summarizer: Arc<dyn Summarizer>,
        config: &SummarizationConfig,
    ) -> Self {
        Self {
            storage,
            blobs,
            extractor,
            summarizer,
            max_attempts: config.max_attempts.max(1),
            max_input_chars: config.max_input_chars,
            backoff: Duration::from_secs(1),
        }
    }

    /// Override the base delay between summarization attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Create the summary instance for a document. Returns its id.
    pub async fn enqueue(&self, document_id: &str) -> Result<String> {
        let id = summary_instance_id(document_id);
        let created = self
            .storage
            .insert_workflow_instance(&NewWorkflowInstance {
                id: &id,
                kind: WorkflowKind::Summarize,
                document_id,
                input: None,
                input_json: "{}",
            })
            .await?;
        if created {
            info!(document_id, instance_id = %id, "summary enqueued");
        }
        Ok(id)
    }

    /// Run a summary instance to completion. Never fails the caller.
    #[instrument(skip_all, fields(instance_id = %instance.id, document_id = %instance.document_id))]
    pub async fn run(&self, instance: &WorkflowInstance) {
        let ctx = StepContext::new(&self.storage, &instance.id);
        match self.execute(&ctx, &instance.document_id).await {
            Ok(created) => {
                info!(created, "document summary generated");
                if let Err(e) = self
                    .storage
                    .finish_instance(&instance.id, InstanceStatus::Completed, None)
                    .await
                {
                    warn!(error = %e, "failed to close summary instance");
                }
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "document summary dropped");
                let message = e.to_string();
                if let Err(e) = self
                    .storage
                    .finish_instance(&instance.id, InstanceStatus::Failed, Some(&message))
                    .await
                {
                    warn!(error = %e, "failed to close summary instance");
                }
            }
        }
    }

    async fn execute(&self, ctx: &StepContext<'_>, document_id: &str) -> Result<bool> {
        let text: String = ctx
            .step("extract-text", || async {
                let document = self
                    .storage
                    .get_document(document_id)
                    .await?
                    .ok_or_else(|| DocflowError::not_found("document", document_id))?;
                let key = match (&document.status, &document.storage_key) {
                    (DocumentStatus::Ready, Some(key)) => key.clone(),
                    _ => {
                        return Err(DocflowError::SummarizationFailed(format!(
                            "document is {}, not READY",
                            document.status
                        )));
                    }
                };
                let pdf = self.blobs.get(&key).await?;
                let text = self.extractor.extract(pdf).await?;
                let text = text.trim();
                if text.is_empty() {
                    return Err(DocflowError::SummarizationFailed(
                        "no extractable text".into(),
                    ));
                }
                Ok(truncate_chars(text, self.max_input_chars))
            })
            .await?;

        let summary: String = ctx
            .step("summarize", || self.summarize_with_retry(&text))
            .await?;

        ctx.step("store-summary", || async {
            self.storage.insert_summary_once(document_id, &summary).await
        })
        .await
    }

    async fn summarize_with_retry(&self, text: &str) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.summarizer.summarize(text).await {
                Ok(summary) => return Ok(summary),
                Err(DocflowError::Network(message)) if attempt < self.max_attempts => {
                    warn!(attempt, error = %message, "summarization failed, retrying");
                    let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(DocflowError::Network(message)) => {
                    return Err(DocflowError::SummarizationFailed(format!(
                        "gave up after {attempt} attempts: {message}"
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// The first `max` characters of `text`.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
