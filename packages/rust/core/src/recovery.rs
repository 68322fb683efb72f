//! Reconciliation of documents stranded outside the step log.
//!
//! A document normally leaves UPLOADING/PROCESSING through its ingest
//! instance. If that instance is gone or already finished (a crash between
//! the instance failing and the document being marked, or rows written by an
//! older build), nothing will ever move the document again. The sweep fails
//! those records once they are older than the configured age.

use std::time::Duration;

use chrono::Utc;
use docflow_shared::{DocflowError, Document, Result};
use docflow_storage::Storage;
use tracing::{info, instrument, warn};

use crate::status::{StatusTracker, Transition};

/// Mark stale UPLOADING/PROCESSING documents FAILED. Returns the documents
/// that were swept.
#[instrument(skip_all, fields(max_age_secs = max_age.as_secs()))]
pub async fn sweep_stale(
    storage: &Storage,
    status: &StatusTracker,
    max_age: Duration,
) -> Result<Vec<Document>> {
    let max_age = chrono::Duration::from_std(max_age)
        .map_err(|e| DocflowError::validation(format!("invalid stale age: {e}")))?;
    let cutoff = Utc::now() - max_age;

    let stale = storage.find_stale_documents(&cutoff).await?;
    let mut swept = Vec::with_capacity(stale.len());
    for document in stale {
        match status.transition(&document.id, &Transition::Failed).await {
            Ok(Some(_)) => {
                warn!(document_id = %document.id, status = %document.status, "stale document marked FAILED");
                swept.push(document);
            }
            Ok(None) => {}
            Err(e) => warn!(document_id = %document.id, error = %e, "cannot fail stale document"),
        }
    }
    info!(count = swept.len(), "stale sweep finished");
    Ok(swept)
}
