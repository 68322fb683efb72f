//! Owner-scoped document queries and mutations, served through the cache.

use std::sync::Arc;
use std::time::Duration;

use docflow_blob::BlobStore;
use docflow_cache::{CacheLayer, keys};
use chrono::{DateTime, Utc};
use docflow_shared::{
    DocflowError, Document, DocumentQuery, DocumentShare, DocumentSummary, DocumentUpdate,
    Result,
};
use docflow_storage::Storage;
use tracing::{debug, info, instrument, warn};

use crate::folders::ensure_folder_owner;

/// Default lifetime of a download URL.
pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct DocumentService {
    storage: Arc<Storage>,
    cache: CacheLayer,
    blobs: Arc<dyn BlobStore>,
}

impl DocumentService {
    pub fn new(storage: Arc<Storage>, cache: CacheLayer, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            storage,
            cache,
            blobs,
        }
    }

    /// A document, any status, readable by `user_id`: its owner or a user it
    /// is shared with until the share expires.
    pub async fn find_one(&self, user_id: &str, document_id: &str) -> Result<Document> {
        let document = self.load(document_id).await?;
        if document.owner_id == user_id {
            return Ok(document);
        }
        match self.storage.get_share(document_id, user_id).await? {
            Some(share) if share.is_active_at(Utc::now()) => {
                debug!(document_id, user_id, "access through share");
                Ok(document)
            }
            Some(_) => {
                warn!(document_id, user_id, "share expired, access denied");
                Err(DocflowError::Forbidden)
            }
            None => Err(DocflowError::Forbidden),
        }
    }

    /// A document owned by `owner_id`. Shares never grant mutation.
    async fn find_owned(&self, owner_id: &str, document_id: &str) -> Result<Document> {
        let document = self.load(document_id).await?;
        if document.owner_id != owner_id {
            return Err(DocflowError::Forbidden);
        }
        Ok(document)
    }

    async fn load(&self, document_id: &str) -> Result<Document> {
        self.cache
            .get_or_load(
                &keys::document_key(document_id),
                self.cache.ttls().document,
                || self.storage.get_document(document_id),
            )
            .await?
            .ok_or_else(|| DocflowError::not_found("document", document_id))
    }

    /// Storage key of a READY document. `NotFound` until the document is READY.
    pub async fn get_storage_key(&self, user_id: &str, document_id: &str) -> Result<String> {
        self.find_one(user_id, document_id).await?;
        self.cache
            .get_or_load(
                &keys::storage_key_key(document_id),
                self.cache.ttls().storage_key,
                || self.storage.get_storage_key(document_id),
            )
            .await?
            .ok_or_else(|| DocflowError::not_found("stored document", document_id))
    }

    /// A page of the owner's READY documents.
    pub async fn list(&self, owner_id: &str, query: &DocumentQuery) -> Result<Vec<Document>> {
        let version = self.cache.version(owner_id).await;
        let documents = self
            .cache
            .get_or_load(
                &keys::list_key(owner_id, version, query, None),
                self.cache.ttls().list,
                || async { self.storage.list_documents(owner_id, query).await.map(Some) },
            )
            .await?;
        Ok(documents.unwrap_or_default())
    }

    /// Case-insensitive name search over the owner's documents, any status.
    pub async fn search(
        &self,
        owner_id: &str,
        term: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<Document>> {
        let term = term.trim();
        if term.is_empty() {
            return Err(DocflowError::validation("search term must not be empty"));
        }
        let version = self.cache.version(owner_id).await;
        let documents = self
            .cache
            .get_or_load(
                &keys::list_key(owner_id, version, query, Some(term)),
                self.cache.ttls().list,
                || async {
                    self.storage
                        .search_documents(owner_id, term, query)
                        .await
                        .map(Some)
                },
            )
            .await?;
        Ok(documents.unwrap_or_default())
    }

    /// Rename a document or move it between folders.
    #[instrument(skip_all, fields(owner_id, document_id))]
    pub async fn update(
        &self,
        owner_id: &str,
        document_id: &str,
        update: DocumentUpdate,
    ) -> Result<Document> {
        if update.is_empty() {
            return Err(DocflowError::validation("nothing to update"));
        }
        let mut update = update;
        if let Some(name) = &update.name {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(DocflowError::validation("name must not be empty"));
            }
            update.name = Some(trimmed.to_string());
        }
        if let Some(Some(folder_id)) = &update.folder_id {
            ensure_folder_owner(&self.storage, owner_id, folder_id).await?;
        }

        self.find_owned(owner_id, document_id).await?;
        let updated = self
            .storage
            .update_document(document_id, &update)
            .await?
            .ok_or_else(|| DocflowError::not_found("document", document_id))?;

        self.cache.delete(&keys::document_key(document_id)).await;
        self.cache.bump_version(owner_id).await;
        info!("document updated");
        Ok(updated)
    }

    /// Delete a document, its summary and its stored blob.
    #[instrument(skip_all, fields(owner_id, document_id))]
    pub async fn delete(&self, owner_id: &str, document_id: &str) -> Result<Document> {
        self.find_owned(owner_id, document_id).await?;
        let deleted = self
            .storage
            .delete_document(document_id)
            .await?
            .ok_or_else(|| DocflowError::not_found("document", document_id))?;

        // Row first: a missing blob behind a live READY row would break the
        // storage-key invariant, an orphaned blob does not.
        if let Some(key) = &deleted.storage_key {
            if let Err(e) = self.blobs.delete(key).await {
                warn!(key = %key, error = %e, "blob left behind after delete");
            }
        }

        self.cache.delete(&keys::document_key(document_id)).await;
        self.cache.delete(&keys::storage_key_key(document_id)).await;
        self.cache.bump_version(owner_id).await;
        info!(status = %deleted.status, "document deleted");
        Ok(deleted)
    }

    /// The summary of a document, if one has been generated.
    pub async fn get_summary(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentSummary>> {
        self.find_one(user_id, document_id).await?;
        self.storage.get_summary(document_id).await
    }

    /// A time-limited download URL for a READY document.
    pub async fn signed_url(
        &self,
        user_id: &str,
        document_id: &str,
        ttl: Duration,
    ) -> Result<String> {
        let key = self.get_storage_key(user_id, document_id).await?;
        self.blobs.signed_url(&key, ttl).await
    }

    /// Share a document with another user until `expires_at`. Sharing again
    /// with the same user replaces the expiry.
    #[instrument(skip_all, fields(owner_id, document_id, with_user))]
    pub async fn share(
        &self,
        owner_id: &str,
        document_id: &str,
        with_user: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<DocumentShare> {
        let with_user = with_user.trim();
        if with_user.is_empty() {
            return Err(DocflowError::validation("share recipient must not be empty"));
        }
        if with_user == owner_id {
            return Err(DocflowError::validation("cannot share a document with its owner"));
        }
        let now = Utc::now();
        if expires_at <= now {
            return Err(DocflowError::validation("share expiry must be in the future"));
        }
        self.find_owned(owner_id, document_id).await?;

        let share = self
            .storage
            .upsert_share(&DocumentShare {
                document_id: document_id.to_string(),
                user_id: with_user.to_string(),
                expires_at,
                created_at: now,
            })
            .await?;
        info!(expires_at = %share.expires_at, "document shared");
        Ok(share)
    }

    /// Revoke a share before it expires.
    pub async fn unshare(&self, owner_id: &str, document_id: &str, with_user: &str) -> Result<()> {
        self.find_owned(owner_id, document_id).await?;
        if !self.storage.delete_share(document_id, with_user).await? {
            return Err(DocflowError::not_found("share", with_user));
        }
        info!(document_id, with_user, "share revoked");
        Ok(())
    }

    /// Every share of an owned document, expired ones included.
    pub async fn shares(&self, owner_id: &str, document_id: &str) -> Result<Vec<DocumentShare>> {
        self.find_owned(owner_id, document_id).await?;
        self.storage.list_shares(document_id).await
    }
}
