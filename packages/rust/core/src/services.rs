//! Wiring of every service from the application config.

use std::sync::Arc;
use std::time::Duration;

use docflow_blob::{BlobStore, ObjectBlobStore};
use docflow_cache::CacheLayer;
use docflow_convert::{HttpConversionClient, Normalizer};
use docflow_shared::{AppConfig, Document, Result, expand_home};
use docflow_storage::Storage;
use tracing::info;

use crate::documents::DocumentService;
use crate::folders::FolderService;
use crate::pipeline::IngestionPipeline;
use crate::recovery;
use crate::summarizer::{GeminiSummarizer, PdfTextExtractor};
use crate::summary::SummaryPipeline;

/// Services sharing one database, cache and blob store.
#[derive(Clone)]
pub struct Services {
    pub storage: Arc<Storage>,
    pub cache: CacheLayer,
    pub blobs: Arc<dyn BlobStore>,
    pub documents: DocumentService,
    pub folders: FolderService,
}

impl Services {
    /// Open the database, cache and blob store named in `config`.
    pub async fn open(config: &AppConfig) -> Result<Self> {
        config.validate()?;

        let db_path = expand_home(&config.database.path)?;
        let storage = Arc::new(Storage::open(&db_path).await?);
        let cache = CacheLayer::from_config(&config.cache)?;
        let blobs: Arc<dyn BlobStore> = Arc::new(ObjectBlobStore::from_config(&config.blob)?);

        info!(db = %db_path.display(), blob = ?config.blob.backend, cache = ?config.cache.backend, "services ready");

        Ok(Self {
            documents: DocumentService::new(storage.clone(), cache.clone(), blobs.clone()),
            folders: FolderService::new(storage.clone(), cache.clone()),
            storage,
            cache,
            blobs,
        })
    }

    /// Build the ingestion pipeline with the HTTP conversion and
    /// summarization clients. Their credentials are read from the
    /// environment here, so a missing variable fails before any upload.
    pub fn pipeline(&self, config: &AppConfig) -> Result<IngestionPipeline> {
        let converter = HttpConversionClient::from_config(&config.conversion)?;
        let summaries = SummaryPipeline::new(
            self.storage.clone(),
            self.blobs.clone(),
            Arc::new(PdfTextExtractor),
            Arc::new(GeminiSummarizer::from_config(&config.summarization)?),
            &config.summarization,
        );
        Ok(IngestionPipeline::new(
            self.storage.clone(),
            self.cache.clone(),
            self.blobs.clone(),
            Normalizer::new(Arc::new(converter)),
            summaries,
            config.pipeline.max_concurrent,
        ))
    }

    /// Resume unfinished workflow instances on `pipeline`, then fail records
    /// older than `stale_after` that nothing will finish. Returns the resumed
    /// count and the swept documents.
    pub async fn recover(
        &self,
        pipeline: &IngestionPipeline,
        stale_after: Duration,
    ) -> Result<(usize, Vec<Document>)> {
        let resumed = pipeline.resume_pending().await?;
        let swept =
            recovery::sweep_stale(&self.storage, pipeline.status_tracker(), stale_after).await?;
        Ok((resumed, swept))
    }
}
