//! Ingestion pipeline: upload → validate → normalize → store → READY, then
//! fork the summary sub-pipeline.
//!
//! [`IngestionPipeline::submit`] persists the document and its workflow
//! instance, moves the document to PROCESSING and returns. The remaining
//! work runs on a background tokio task as a sequence of recorded steps, so
//! an instance interrupted by a crash resumes where it stopped (see
//! [`IngestionPipeline::resume_pending`]).

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use chrono::Utc;
use docflow_blob::BlobStore;
use docflow_cache::CacheLayer;
use docflow_convert::{FileKind, Normalizer, validate};
use docflow_shared::{
    CANONICAL_MIME, DocflowError, Document, DocumentStatus, Result, new_id,
};
use docflow_storage::{InstanceStatus, NewWorkflowInstance, Storage, WorkflowInstance, WorkflowKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn};

use crate::folders::ensure_folder_owner;
use crate::status::{StatusTracker, Transition};
use crate::summary::SummaryPipeline;
use crate::workflow::{Json, StepContext};

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s").expect("whitespace pattern is valid"));

/// Display name for an uploaded file: the base name up to its first `.`,
/// with whitespace replaced by `_`.
pub fn display_name(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);
    let stem = base.split('.').next().unwrap_or_default();
    let name = WHITESPACE.replace_all(stem.trim(), "_");
    if name.is_empty() {
        "document".to_string()
    } else {
        name.into_owned()
    }
}

/// A file handed to the pipeline.
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub filename: String,
    /// Content type claimed by the client. Recorded, never trusted.
    pub declared_mime: Option<String>,
    pub owner_id: String,
    pub folder_id: Option<String>,
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub document_id: String,
    pub instance_id: String,
    pub status: DocumentStatus,
}

/// Structured input recorded with an ingest instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IngestInput {
    filename: String,
    declared_mime: Option<String>,
    owner_id: String,
}

/// Recorded outcome of the upload step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub key: String,
    pub size_bytes: u64,
    pub sha256: String,
}

struct Inner {
    storage: Arc<Storage>,
    blobs: Arc<dyn BlobStore>,
    normalizer: Normalizer,
    status: StatusTracker,
    summaries: SummaryPipeline,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    in_flight: Mutex<HashSet<String>>,
}

/// Orchestrates ingestion and runs workflow instances in the background.
#[derive(Clone)]
pub struct IngestionPipeline {
    inner: Arc<Inner>,
}

impl IngestionPipeline {
    pub fn new(
        storage: Arc<Storage>,
        cache: CacheLayer,
        blobs: Arc<dyn BlobStore>,
        normalizer: Normalizer,
        summaries: SummaryPipeline,
        max_concurrent: usize,
    ) -> Self {
        let status = StatusTracker::new(storage.clone(), cache);
        Self {
            inner: Arc::new(Inner {
                storage,
                blobs,
                normalizer,
                status,
                summaries,
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
                tracker: TaskTracker::new(),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn status_tracker(&self) -> &StatusTracker {
        &self.inner.status
    }

    /// Accept an upload. Returns once the document is PROCESSING; validation,
    /// conversion and storage continue in the background.
    #[instrument(skip_all, fields(filename = %upload.filename, owner_id = %upload.owner_id, size = upload.bytes.len()))]
    pub async fn submit(&self, upload: Upload) -> Result<Submitted> {
        if let Some(folder_id) = &upload.folder_id {
            ensure_folder_owner(&self.inner.storage, &upload.owner_id, folder_id).await?;
        }
        let document = Document {
            id: new_id(),
            owner_id: upload.owner_id.clone(),
            name: display_name(&upload.filename),
            storage_key: None,
            size_bytes: upload.bytes.len() as u64,
            folder_id: upload.folder_id.clone(),
            status: DocumentStatus::Uploading,
            created_at: Utc::now(),
        };
        let instance_id = new_id();
        let input_json = serde_json::to_string(&IngestInput {
            filename: upload.filename.clone(),
            declared_mime: upload.declared_mime.clone(),
            owner_id: upload.owner_id.clone(),
        })
        .map_err(|e| DocflowError::PersistenceFailed(e.to_string()))?;

        self.inner
            .storage
            .create_ingestion(
                &document,
                &NewWorkflowInstance {
                    id: &instance_id,
                    kind: WorkflowKind::Ingest,
                    document_id: &document.id,
                    input: Some(&upload.bytes),
                    input_json: &input_json,
                },
            )
            .await
            .map_err(|e| DocflowError::PersistenceFailed(e.to_string()))?;

        // The runner repeats this before its first step if it fails here.
        if let Err(e) = self
            .inner
            .status
            .transition(&document.id, &Transition::Processing)
            .await
        {
            warn!(document_id = %document.id, error = %e, "could not mark document PROCESSING");
        }

        info!(document_id = %document.id, %instance_id, "document accepted");
        self.schedule(instance_id.clone());

        Ok(Submitted {
            document_id: document.id,
            instance_id,
            status: DocumentStatus::Processing,
        })
    }

    /// Schedule every unfinished instance found in the step log. Returns how
    /// many were scheduled.
    pub async fn resume_pending(&self) -> Result<usize> {
        let instances = self.inner.storage.list_resumable_instances().await?;
        let count = instances.len();
        for instance in instances {
            info!(instance_id = %instance.id, workflow = %instance.kind, "resuming workflow instance");
            self.schedule(instance.id);
        }
        Ok(count)
    }

    /// Wait until every scheduled instance, including summaries forked along
    /// the way, has finished.
    pub async fn wait_idle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Run an instance on the background runner unless it is already running.
    fn schedule(&self, instance_id: String) {
        let newly_added = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instance_id.clone());
        if !newly_added {
            return;
        }
        let this = self.clone();
        self.inner.tracker.spawn(async move {
            match this.inner.permits.clone().acquire_owned().await {
                Ok(_permit) => this.run_instance(&instance_id).await,
                Err(e) => error!(%instance_id, error = %e, "runner shut down"),
            }
            this.inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&instance_id);
        });
    }

    async fn run_instance(&self, instance_id: &str) {
        let instance = match self.inner.storage.get_workflow_instance(instance_id).await {
            Ok(Some(instance)) if !instance.status.is_finished() => instance,
            Ok(_) => return,
            Err(e) => {
                error!(%instance_id, error = %e, "cannot load workflow instance");
                return;
            }
        };
        if let Err(e) = self
            .inner
            .storage
            .set_instance_status(instance_id, InstanceStatus::Running)
            .await
        {
            error!(%instance_id, error = %e, "cannot start workflow instance");
            return;
        }

        match instance.kind {
            WorkflowKind::Ingest => self.run_ingest(&instance).await,
            WorkflowKind::Summarize => self.inner.summaries.run(&instance).await,
        }
    }

    #[instrument(skip_all, fields(instance_id = %instance.id, document_id = %instance.document_id))]
    async fn run_ingest(&self, instance: &WorkflowInstance) {
        let inner = &self.inner;
        let document_id = instance.document_id.as_str();
        let ctx = StepContext::new(&inner.storage, &instance.id);

        // Crash between creation and PROCESSING.
        match inner.storage.get_document(document_id).await {
            Ok(Some(doc)) if doc.status == DocumentStatus::Uploading => {
                if let Err(e) = inner.status.transition(document_id, &Transition::Processing).await {
                    error!(error = %e, "cannot mark document PROCESSING; will retry on resume");
                    return;
                }
            }
            // FAILED is terminal. The failure was applied but the instance
            // was never closed.
            Ok(Some(doc)) if doc.status == DocumentStatus::Failed => {
                warn!("document already FAILED, closing instance");
                self.finish(&instance.id, InstanceStatus::Failed, Some("document already failed"))
                    .await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "cannot load document; will retry on resume");
                return;
            }
        }

        match inner.storage.get_step_result(&instance.id, "mark-failed").await {
            Ok(Some(_)) => {
                warn!("mark-failed already recorded, closing instance");
                self.finish(&instance.id, InstanceStatus::Failed, Some("document already failed"))
                    .await;
                return;
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "cannot read step log; will retry on resume");
                return;
            }
        }

        match self.ingest_steps(&ctx, instance).await {
            Ok(receipt) => self.complete(&ctx, instance, receipt).await,
            Err(e) if is_step_log_error(&e) => {
                error!(error = %e, "step log unavailable; will retry on resume");
            }
            Err(e) => self.fail(&ctx, instance, e).await,
        }
    }

    /// generate-key → validate → normalize → upload.
    async fn ingest_steps(
        &self,
        ctx: &StepContext<'_>,
        instance: &WorkflowInstance,
    ) -> Result<UploadReceipt> {
        let inner = &self.inner;
        let input: IngestInput = serde_json::from_str(&instance.input_json)
            .map_err(|e| DocflowError::Workflow(format!("bad ingest input: {e}")))?;
        let raw = instance
            .input
            .as_deref()
            .ok_or_else(|| DocflowError::Workflow("ingest input bytes are missing".into()))?;

        let key: String = ctx
            .step("generate-key", || async {
                Ok(format!("{}/{}.pdf", input.owner_id, uuid::Uuid::now_v7()))
            })
            .await?;

        let kind: FileKind = ctx.step("validate", || async { validate(raw) }).await?;
        if let Some(declared) = &input.declared_mime {
            if declared != kind.mime() {
                info!(declared = %declared, detected = kind.mime(), "declared type differs from content");
            }
        }

        let pdf: Vec<u8> = ctx
            .step("normalize", || {
                inner
                    .normalizer
                    .normalize(raw.to_vec(), kind, &input.filename)
            })
            .await?;

        let Json(receipt) = ctx
            .step("upload", || async {
                let receipt = UploadReceipt {
                    key: key.clone(),
                    size_bytes: pdf.len() as u64,
                    sha256: hex_digest(&pdf),
                };
                inner
                    .blobs
                    .put(&key, pdf.clone(), CANONICAL_MIME)
                    .await
                    .map_err(|e| DocflowError::StorageWriteFailed(e.to_string()))?;
                Ok(Json(receipt))
            })
            .await?;

        Ok(receipt)
    }

    /// mark-ready → enqueue-summary.
    async fn complete(&self, ctx: &StepContext<'_>, instance: &WorkflowInstance, receipt: UploadReceipt) {
        let inner = &self.inner;
        let document_id = instance.document_id.as_str();

        let marked: Result<bool> = ctx
            .step("mark-ready", || async {
                let owner = inner
                    .status
                    .transition(
                        document_id,
                        &Transition::Ready {
                            storage_key: receipt.key.clone(),
                            size_bytes: receipt.size_bytes,
                        },
                    )
                    .await?;
                if owner.is_none() {
                    // Deleted while in flight: nothing references the blob.
                    warn!(key = %receipt.key, "document deleted during ingestion, removing blob");
                    if let Err(e) = inner.blobs.delete(&receipt.key).await {
                        warn!(key = %receipt.key, error = %e, "orphaned blob left behind");
                    }
                }
                Ok(owner.is_some())
            })
            .await;

        let ready = match marked {
            Ok(ready) => ready,
            Err(e) => {
                error!(error = %e, "cannot mark document READY; will retry on resume");
                return;
            }
        };

        if ready {
            info!(key = %receipt.key, size = receipt.size_bytes, "document ready");
            match ctx
                .step("enqueue-summary", || inner.summaries.enqueue(document_id))
                .await
            {
                Ok(summary_id) => self.schedule(summary_id),
                Err(e) => warn!(error = %e, "summary not enqueued"),
            }
        }

        self.finish(&instance.id, InstanceStatus::Completed, None).await;
    }

    /// mark-failed.
    async fn fail(&self, ctx: &StepContext<'_>, instance: &WorkflowInstance, cause: DocflowError) {
        let inner = &self.inner;
        error!(kind = cause.kind(), error = %cause, "ingestion failed");

        let marked: Result<()> = ctx
            .step("mark-failed", || async {
                inner
                    .status
                    .transition(&instance.document_id, &Transition::Failed)
                    .await?;
                Ok(())
            })
            .await;
        if let Err(e) = marked {
            error!(error = %e, "cannot mark document FAILED; will retry on resume");
            return;
        }

        let message = cause.to_string();
        self.finish(&instance.id, InstanceStatus::Failed, Some(&message))
            .await;
    }

    async fn finish(&self, instance_id: &str, status: InstanceStatus, error: Option<&str>) {
        if let Err(e) = self
            .inner
            .storage
            .finish_instance(instance_id, status, error)
            .await
        {
            warn!(%instance_id, error = %e, "cannot close workflow instance");
        }
    }
}

/// Stage errors never surface as `Storage`, so one reaching the orchestrator
/// came from the step log. It says nothing about the document.
fn is_step_log_error(e: &DocflowError) -> bool {
    matches!(e, DocflowError::Storage(_))
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
