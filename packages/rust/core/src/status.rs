//! Document status transitions and the cache invalidation that goes with them.

use std::sync::Arc;

use docflow_cache::{CacheLayer, keys};
use docflow_shared::{DocumentStatus, Result};
use docflow_storage::Storage;
use tracing::debug;

/// A status change to apply to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Processing,
    /// The canonical blob is stored under `storage_key`.
    Ready { storage_key: String, size_bytes: u64 },
    Failed,
}

impl Transition {
    pub fn status(&self) -> DocumentStatus {
        match self {
            Self::Processing => DocumentStatus::Processing,
            Self::Ready { .. } => DocumentStatus::Ready,
            Self::Failed => DocumentStatus::Failed,
        }
    }
}

/// Persists status changes and invalidates the affected cache entries.
///
/// Legality of a transition is the caller's concern; the tracker applies
/// whatever it is given.
#[derive(Clone)]
pub struct StatusTracker {
    storage: Arc<Storage>,
    cache: CacheLayer,
}

impl StatusTracker {
    pub fn new(storage: Arc<Storage>, cache: CacheLayer) -> Self {
        Self { storage, cache }
    }

    /// Apply `transition`. Returns the owner id, or `None` if the document no
    /// longer exists.
    pub async fn transition(&self, document_id: &str, transition: &Transition) -> Result<Option<String>> {
        let owner = match transition {
            Transition::Ready {
                storage_key,
                size_bytes,
            } => {
                self.storage
                    .mark_ready(document_id, storage_key, *size_bytes)
                    .await?
            }
            other => self.storage.update_status(document_id, other.status()).await?,
        };

        self.cache.delete(&keys::document_key(document_id)).await;
        self.cache.delete(&keys::storage_key_key(document_id)).await;

        // Lists only show READY documents, so any status change can alter them.
        if let Some(owner_id) = &owner {
            self.cache.bump_version(owner_id).await;
        }

        debug!(
            document_id,
            status = %transition.status(),
            found = owner.is_some(),
            "status transition applied"
        );
        Ok(owner)
    }
}
