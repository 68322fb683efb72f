//! Folder management.

use std::sync::Arc;

use chrono::Utc;
use docflow_cache::{CacheLayer, keys};
use docflow_shared::{DocflowError, Folder, Result, new_id};
use docflow_storage::Storage;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct FolderService {
    storage: Arc<Storage>,
    cache: CacheLayer,
}

impl FolderService {
    pub fn new(storage: Arc<Storage>, cache: CacheLayer) -> Self {
        Self { storage, cache }
    }

    pub async fn create(&self, owner_id: &str, name: &str) -> Result<Folder> {
        let folder = Folder {
            id: new_id(),
            owner_id: owner_id.to_string(),
            name: folder_name(name)?,
            created_at: Utc::now(),
        };
        self.storage.insert_folder(&folder).await?;
        self.cache.bump_version(owner_id).await;
        info!(folder_id = %folder.id, owner_id, "folder created");
        Ok(folder)
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<Folder>> {
        self.storage.list_folders(owner_id).await
    }

    pub async fn rename(&self, owner_id: &str, folder_id: &str, name: &str) -> Result<Folder> {
        let name = folder_name(name)?;
        self.check_owner(owner_id, folder_id).await?;
        let folder = self
            .storage
            .rename_folder(folder_id, owner_id, &name)
            .await?
            .ok_or_else(|| DocflowError::not_found("folder", folder_id))?;
        self.cache.bump_version(owner_id).await;
        Ok(folder)
    }

    /// Delete a folder. Its documents stay, detached from any folder.
    #[instrument(skip_all, fields(owner_id, folder_id))]
    pub async fn delete(&self, owner_id: &str, folder_id: &str) -> Result<Folder> {
        self.check_owner(owner_id, folder_id).await?;
        let detached = self.storage.document_ids_in_folder(folder_id).await?;
        let folder = self
            .storage
            .delete_folder(folder_id, owner_id)
            .await?
            .ok_or_else(|| DocflowError::not_found("folder", folder_id))?;

        for document_id in &detached {
            self.cache.delete(&keys::document_key(document_id)).await;
        }
        self.cache.bump_version(owner_id).await;
        info!(detached = detached.len(), "folder deleted");
        Ok(folder)
    }

    async fn check_owner(&self, owner_id: &str, folder_id: &str) -> Result<()> {
        ensure_folder_owner(&self.storage, owner_id, folder_id).await
    }
}

/// `Forbidden` unless `folder_id` exists and belongs to `owner_id`.
pub(crate) async fn ensure_folder_owner(
    storage: &Storage,
    owner_id: &str,
    folder_id: &str,
) -> Result<()> {
    match storage.get_folder(folder_id).await? {
        Some(folder) if folder.owner_id == owner_id => Ok(()),
        Some(_) => Err(DocflowError::Forbidden),
        None => Err(DocflowError::not_found("folder", folder_id)),
    }
}

fn folder_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DocflowError::validation("folder name must not be empty"));
    }
    Ok(name.to_string())
}
