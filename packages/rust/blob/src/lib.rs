//! Durable blob storage for canonical documents.
//!
//! [`ObjectBlobStore`] adapts `object_store` (S3, local filesystem or
//! in-memory) to the narrow [`BlobStore`] interface the pipeline needs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docflow_shared::{BlobBackend, BlobConfig, DocflowError, Result, expand_home};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use tracing::{debug, info, instrument};

/// Blob store operations used by the pipeline and document services.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` under `key`, replacing any existing object.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// A time-limited URL granting read access to `key`.
    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Remove `key`. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Backend-specific state needed beyond the generic store.
enum Backend {
    S3(Arc<object_store::aws::AmazonS3>),
    Local { root: PathBuf },
    Memory,
}

/// [`BlobStore`] over an `object_store` backend.
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
    backend: Backend,
}

impl ObjectBlobStore {
    /// Build the backend selected in `[blob]`.
    pub fn from_config(config: &BlobConfig) -> Result<Self> {
        match config.backend {
            BlobBackend::Local => Self::local(expand_home(&config.root)?),
            BlobBackend::Memory => Ok(Self::memory()),
            BlobBackend::S3 => {
                let bucket = config.bucket.as_deref().ok_or_else(|| {
                    DocflowError::config("blob.bucket is required for the s3 backend")
                })?;
                Self::s3(bucket, config.region.as_deref())
            }
        }
    }

    /// S3 bucket. Credentials come from the standard AWS environment.
    pub fn s3(bucket: &str, region: Option<&str>) -> Result<Self> {
        info!(bucket, "creating S3 blob store");
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        let store = Arc::new(builder.build().map_err(blob_err)?);
        Ok(Self {
            store: store.clone(),
            backend: Backend::S3(store),
        })
    }

    /// Files under `root`, created if missing.
    pub fn local(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root).map_err(|e| DocflowError::io(&root, e))?;
        let root = std::fs::canonicalize(&root).map_err(|e| DocflowError::io(&root, e))?;
        info!(root = %root.display(), "creating local blob store");
        let store = LocalFileSystem::new_with_prefix(&root).map_err(blob_err)?;
        Ok(Self {
            store: Arc::new(store),
            backend: Backend::Local { root },
        })
    }

    pub fn memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            backend: Backend::Memory,
        }
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    #[instrument(skip_all, fields(key = %key, size = bytes.len()))]
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let path = parse_key(key)?;
        let mut opts = PutOptions::default();
        // The local filesystem cannot persist object attributes.
        if !matches!(self.backend, Backend::Local { .. }) {
            let mut attributes = Attributes::new();
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
            opts.attributes = attributes;
        }
        self.store
            .put_opts(&path, PutPayload::from(bytes), opts)
            .await
            .map_err(blob_err)?;
        debug!("blob written");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = parse_key(key)?;
        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(DocflowError::not_found("blob", key));
            }
            Err(e) => return Err(blob_err(e)),
        };
        let bytes = result.bytes().await.map_err(blob_err)?;
        Ok(bytes.to_vec())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String> {
        let path = parse_key(key)?;
        match &self.backend {
            Backend::S3(store) => {
                let url = store
                    .signed_url(reqwest::Method::GET, &path, ttl)
                    .await
                    .map_err(blob_err)?;
                Ok(url.to_string())
            }
            Backend::Local { root, .. } => {
                let file = root.join(path.to_string());
                url::Url::from_file_path(&file)
                    .map(|u| u.to_string())
                    .map_err(|()| {
                        DocflowError::Blob(format!("not an absolute path: {}", file.display()))
                    })
            }
            // Nothing outside the process can read it; the URL only names the key.
            Backend::Memory => Ok(format!("memory:///{path}")),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = parse_key(key)?;
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(blob_err(e)),
        }
    }
}

fn parse_key(key: &str) -> Result<Path> {
    Path::parse(key).map_err(|e| DocflowError::validation(format!("invalid blob key '{key}': {e}")))
}

fn blob_err(e: object_store::Error) -> DocflowError {
    DocflowError::Blob(e.to_string())
}
