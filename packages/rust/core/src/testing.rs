//! Fixtures and stub collaborators shared by the core tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use docflow_blob::{BlobStore, ObjectBlobStore};
use docflow_cache::{CacheLayer, CacheTtls, MemoryCache};
use docflow_convert::{ConversionService, Normalizer};
pub(crate) use docflow_convert::fixtures::{docx_bytes, pdf_bytes};
use docflow_shared::{
    CANONICAL_MIME, DocflowError, Document, DocumentStatus, Result, SummarizationConfig,
    new_id,
};
use docflow_storage::{NewWorkflowInstance, Storage, WorkflowKind};

use crate::documents::DocumentService;
use crate::folders::FolderService;
use crate::pipeline::IngestionPipeline;
use crate::summarizer::{Summarizer, TextExtractor};
use crate::summary::SummaryPipeline;

pub(crate) async fn test_storage() -> Storage {
    let tmp = std::env::temp_dir().join(format!("docflow_core_test_{}.db", new_id()));
    Storage::open(&tmp).await.expect("open test db")
}

pub(crate) fn test_cache() -> CacheLayer {
    CacheLayer::new(
        Arc::new(MemoryCache::new()),
        CacheTtls {
            document: Duration::from_secs(300),
            storage_key: Duration::from_secs(300),
            list: Duration::from_secs(300),
            version: Duration::from_secs(86_400),
        },
    )
}

/// An UPLOADING document with a pending ingest instance carrying PDF bytes.
pub(crate) async fn seed_document(storage: &Storage, owner_id: &str) -> Document {
    let bytes = pdf_bytes();
    let document = Document {
        id: new_id(),
        owner_id: owner_id.to_string(),
        name: "Seed_Document".into(),
        storage_key: None,
        size_bytes: bytes.len() as u64,
        folder_id: None,
        status: DocumentStatus::Uploading,
        created_at: Utc::now(),
    };
    let input_json = serde_json::json!({
        "filename": "Seed Document.pdf",
        "declared_mime": CANONICAL_MIME,
        "owner_id": owner_id,
    })
    .to_string();
    storage
        .create_ingestion(
            &document,
            &NewWorkflowInstance {
                id: &new_id(),
                kind: WorkflowKind::Ingest,
                document_id: &document.id,
                input: Some(&bytes),
                input_json: &input_json,
            },
        )
        .await
        .expect("create ingestion");
    document
}

/// A READY document whose PDF is in `blobs`. Its ingest instance is closed.
pub(crate) async fn seed_ready_document(
    storage: &Storage,
    blobs: &Arc<dyn BlobStore>,
    owner_id: &str,
) -> Document {
    let document = seed_document(storage, owner_id).await;
    let key = format!("{owner_id}/{}.pdf", new_id());
    blobs
        .put(&key, pdf_bytes(), CANONICAL_MIME)
        .await
        .expect("put blob");
    storage
        .mark_ready(&document.id, &key, pdf_bytes().len() as u64)
        .await
        .expect("mark ready");
    for instance in storage
        .list_document_instances(&document.id)
        .await
        .expect("list instances")
    {
        storage
            .finish_instance(&instance.id, docflow_storage::InstanceStatus::Completed, None)
            .await
            .expect("finish instance");
    }
    storage
        .get_document(&document.id)
        .await
        .expect("get document")
        .expect("document exists")
}

// ---------------------------------------------------------------------------
// Stub collaborators
// ---------------------------------------------------------------------------

/// Conversion service that returns a fixed PDF and records submitted names.
pub(crate) struct StubConverter {
    fail: bool,
    calls: Mutex<Vec<String>>,
}

impl StubConverter {
    fn new(fail: bool) -> Self {
        Self {
            fail,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversionService for StubConverter {
    async fn submit(&self, _bytes: &[u8], filename: &str, _content_type: &str) -> Result<String> {
        self.calls.lock().unwrap().push(filename.to_string());
        if self.fail {
            return Err(DocflowError::NormalizationFailed(
                "conversion job failed: unsupported layout".into(),
            ));
        }
        Ok("stub://converted.pdf".into())
    }

    async fn fetch(&self, _location: &str) -> Result<Vec<u8>> {
        Ok(pdf_bytes())
    }
}

pub(crate) struct StubExtractor(String);

impl StubExtractor {
    pub(crate) fn returning(text: &str) -> Self {
        Self(text.to_string())
    }
}

#[async_trait]
impl TextExtractor for StubExtractor {
    async fn extract(&self, _pdf: Vec<u8>) -> Result<String> {
        Ok(self.0.clone())
    }
}

pub(crate) struct StubSummarizer {
    summary: String,
    calls: Mutex<Vec<String>>,
}

impl StubSummarizer {
    pub(crate) fn new(summary: &str) -> Self {
        Self {
            summary: summary.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Summarizer for StubSummarizer {
    async fn summarize(&self, text: &str) -> Result<String> {
        self.calls.lock().unwrap().push(text.to_string());
        Ok(self.summary.clone())
    }
}

/// Summarizer that always fails, transiently or not.
pub(crate) struct FailingSummarizer {
    transient: bool,
    attempts: AtomicU32,
}

impl FailingSummarizer {
    pub(crate) fn transient() -> Self {
        Self {
            transient: true,
            attempts: AtomicU32::new(0),
        }
    }

    pub(crate) fn permanent() -> Self {
        Self {
            transient: false,
            attempts: AtomicU32::new(0),
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for FailingSummarizer {
    async fn summarize(&self, _text: &str) -> Result<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.transient {
            Err(DocflowError::Network("HTTP 503 Service Unavailable".into()))
        } else {
            Err(DocflowError::SummarizationFailed("HTTP 400 Bad Request".into()))
        }
    }
}

/// Blob store whose writes always fail. Reads and deletes go to memory.
pub(crate) struct ReadOnlyBlobStore {
    inner: ObjectBlobStore,
    puts: AtomicU32,
}

impl ReadOnlyBlobStore {
    pub(crate) fn puts(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for ReadOnlyBlobStore {
    async fn put(&self, _key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(DocflowError::Blob("bucket is read-only".into()))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.get(key).await
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String> {
        self.inner.signed_url(key, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Fully wired services over a temp database, in-memory blobs and cache.
pub(crate) struct Harness {
    pub pipeline: IngestionPipeline,
    pub documents: DocumentService,
    pub folders: FolderService,
    pub storage: Arc<Storage>,
    pub blobs: Arc<dyn BlobStore>,
    pub cache: CacheLayer,
    pub converter: Arc<StubConverter>,
}

impl Harness {
    pub(crate) async fn new() -> Self {
        Self::build(false, stub_summarizer(), memory_blobs()).await
    }

    pub(crate) async fn with_failing_converter() -> Self {
        Self::build(true, stub_summarizer(), memory_blobs()).await
    }

    pub(crate) async fn with_failing_summarizer() -> Self {
        Self::build(false, Arc::new(FailingSummarizer::transient()), memory_blobs()).await
    }

    /// Harness whose blob writes fail, with the store returned for
    /// inspection.
    pub(crate) async fn with_failing_blob_writes() -> (Self, Arc<ReadOnlyBlobStore>) {
        let blobs = Arc::new(ReadOnlyBlobStore {
            inner: ObjectBlobStore::memory(),
            puts: AtomicU32::new(0),
        });
        let harness = Self::build(false, stub_summarizer(), blobs.clone()).await;
        (harness, blobs)
    }

    async fn build(
        fail_conversion: bool,
        summarizer: Arc<dyn Summarizer>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let storage = Arc::new(test_storage().await);
        let cache = test_cache();
        let converter = Arc::new(StubConverter::new(fail_conversion));

        let summaries = SummaryPipeline::new(
            storage.clone(),
            blobs.clone(),
            Arc::new(StubExtractor::returning("Extracted body text")),
            summarizer,
            &SummarizationConfig::default(),
        )
        .with_backoff(Duration::ZERO);

        let pipeline = IngestionPipeline::new(
            storage.clone(),
            cache.clone(),
            blobs.clone(),
            Normalizer::new(converter.clone()),
            summaries,
            2,
        );

        Self {
            pipeline,
            documents: DocumentService::new(storage.clone(), cache.clone(), blobs.clone()),
            folders: FolderService::new(storage.clone(), cache.clone()),
            storage,
            blobs,
            cache,
            converter,
        }
    }
}

fn stub_summarizer() -> Arc<dyn Summarizer> {
    Arc::new(StubSummarizer::new("stub summary"))
}

fn memory_blobs() -> Arc<dyn BlobStore> {
    Arc::new(ObjectBlobStore::memory())
}
