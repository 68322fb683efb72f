//! Application configuration for docflow.
//!
//! User config lives at `~/.docflow/docflow.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored in the file, only the names of the environment
//! variables that hold them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocflowError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docflow";

// ---------------------------------------------------------------------------
// Config structs (matching docflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub blob: BlobConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub conversion: ConversionConfig,

    #[serde(default)]
    pub summarization: SummarizationConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "~/.docflow/docflow.db".into()
}

/// Blob store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    /// Files under `root` on the local filesystem.
    #[default]
    Local,
    /// Process-local memory. Nothing survives a restart.
    Memory,
    /// Amazon S3 (credentials from the standard AWS environment variables).
    S3,
}

/// `[blob]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    #[serde(default)]
    pub backend: BlobBackend,

    /// Root directory for the local backend.
    #[serde(default = "default_blob_root")]
    pub root: String,

    /// Bucket name for the S3 backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Region for the S3 backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::default(),
            root: default_blob_root(),
            bucket: None,
            region: None,
        }
    }
}

fn default_blob_root() -> String {
    "~/.docflow/blobs".into()
}

/// Cache backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
    /// Disables caching.
    None,
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,

    /// Redis/Valkey URL for the redis backend.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// TTL for single-document lookups.
    #[serde(default = "default_document_ttl")]
    pub document_ttl_secs: u64,

    /// TTL for storage-key lookups.
    #[serde(default = "default_storage_key_ttl")]
    pub storage_key_ttl_secs: u64,

    /// TTL for list and search results.
    #[serde(default = "default_list_ttl")]
    pub list_ttl_secs: u64,

    /// TTL for per-owner version counters. Must exceed `list_ttl_secs`.
    #[serde(default = "default_version_ttl")]
    pub version_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            url: default_redis_url(),
            document_ttl_secs: default_document_ttl(),
            storage_key_ttl_secs: default_storage_key_ttl(),
            list_ttl_secs: default_list_ttl(),
            version_ttl_secs: default_version_ttl(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".into()
}
fn default_document_ttl() -> u64 {
    120
}
fn default_storage_key_ttl() -> u64 {
    600
}
fn default_list_ttl() -> u64 {
    300
}
fn default_version_ttl() -> u64 {
    24 * 60 * 60
}

/// `[conversion]` section: the external format-conversion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Base URL of the conversion API.
    #[serde(default = "default_conversion_endpoint")]
    pub endpoint: String,

    /// Env var holding the application id.
    #[serde(default = "default_conversion_app_id_env")]
    pub application_id_env: String,

    /// Env var holding the secret key.
    #[serde(default = "default_conversion_secret_env")]
    pub secret_key_env: String,

    /// Timeout for the job submission request.
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,

    /// Total attempts for job submission.
    #[serde(default = "default_submit_attempts")]
    pub submit_attempts: u32,

    /// Timeout for downloading the converted file.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Retries for the download after the first attempt.
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_conversion_endpoint(),
            application_id_env: default_conversion_app_id_env(),
            secret_key_env: default_conversion_secret_env(),
            submit_timeout_secs: default_submit_timeout(),
            submit_attempts: default_submit_attempts(),
            fetch_timeout_secs: default_fetch_timeout(),
            fetch_retries: default_fetch_retries(),
        }
    }
}

fn default_conversion_endpoint() -> String {
    "https://api2.docconversionapi.com".into()
}
fn default_conversion_app_id_env() -> String {
    "DOCFLOW_CONVERSION_APP_ID".into()
}
fn default_conversion_secret_env() -> String {
    "DOCFLOW_CONVERSION_SECRET".into()
}
fn default_submit_timeout() -> u64 {
    10
}
fn default_submit_attempts() -> u32 {
    3
}
fn default_fetch_timeout() -> u64 {
    120
}
fn default_fetch_retries() -> u32 {
    1
}

impl ConversionConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// `[summarization]` section: the external AI summarization service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationConfig {
    /// Base URL of the generative language API.
    #[serde(default = "default_summarization_endpoint")]
    pub endpoint: String,

    /// Model used for summaries.
    #[serde(default = "default_summarization_model")]
    pub model: String,

    /// Env var holding the API key.
    #[serde(default = "default_summarization_key_env")]
    pub api_key_env: String,

    /// Attempts per summary before it is dropped.
    #[serde(default = "default_summarization_attempts")]
    pub max_attempts: u32,

    /// Extracted text is truncated to this many characters.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Request timeout.
    #[serde(default = "default_summarization_timeout")]
    pub timeout_secs: u64,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_summarization_endpoint(),
            model: default_summarization_model(),
            api_key_env: default_summarization_key_env(),
            max_attempts: default_summarization_attempts(),
            max_input_chars: default_max_input_chars(),
            timeout_secs: default_summarization_timeout(),
        }
    }
}

fn default_summarization_endpoint() -> String {
    "https://generativelanguage.googleapis.com".into()
}
fn default_summarization_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_summarization_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_summarization_attempts() -> u32 {
    2
}
fn default_max_input_chars() -> usize {
    100_000
}
fn default_summarization_timeout() -> u64 {
    60
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum workflow instances executing at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// UPLOADING/PROCESSING records older than this with no live workflow
    /// are swept to FAILED.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            stale_after_secs: default_stale_after(),
        }
    }
}

fn default_max_concurrent() -> usize {
    4
}
fn default_stale_after() -> u64 {
    15 * 60
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| DocflowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docflow/docflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocflowError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| DocflowError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocflowError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocflowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocflowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| DocflowError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Read a secret from the environment variable named by `var_name`.
pub fn read_secret(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(DocflowError::config(format!(
            "secret not found. Set the {var_name} environment variable."
        ))),
    }
}

impl AppConfig {
    /// Reject combinations the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_concurrent == 0 {
            return Err(DocflowError::config("pipeline.max_concurrent must be at least 1"));
        }
        if self.conversion.submit_attempts == 0 {
            return Err(DocflowError::config("conversion.submit_attempts must be at least 1"));
        }
        if self.summarization.max_attempts == 0 {
            return Err(DocflowError::config("summarization.max_attempts must be at least 1"));
        }
        if self.cache.version_ttl_secs <= self.cache.list_ttl_secs {
            return Err(DocflowError::config(
                "cache.version_ttl_secs must be greater than cache.list_ttl_secs",
            ));
        }
        if self.blob.backend == BlobBackend::S3 && self.blob.bucket.is_none() {
            return Err(DocflowError::config("blob.bucket is required for the s3 backend"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[cache]"));
        assert!(toml_str.contains("GEMINI_API_KEY"));
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.conversion.submit_attempts, 3);
        assert_eq!(parsed.conversion.fetch_retries, 1);
        assert_eq!(parsed.cache.document_ttl_secs, 120);
        assert_eq!(parsed.cache.list_ttl_secs, 300);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[blob]
backend = "s3"
bucket = "uploads"
region = "eu-west-1"

[cache]
backend = "redis"
url = "redis://cache:6379"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.blob.backend, BlobBackend::S3);
        assert_eq!(config.blob.bucket.as_deref(), Some("uploads"));
        assert_eq!(config.cache.backend, CacheBackendKind::Redis);
        assert_eq!(config.cache.storage_key_ttl_secs, 600);
        assert_eq!(config.pipeline.max_concurrent, 4);
        config.validate().expect("valid");
    }

    #[test]
    fn rejects_version_ttl_shorter_than_list_ttl() {
        let mut config = AppConfig::default();
        config.cache.version_ttl_secs = 60;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("version_ttl_secs"));
    }

    #[test]
    fn s3_requires_bucket() {
        let mut config = AppConfig::default();
        config.blob.backend = BlobBackend::S3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_secret_is_config_error() {
        // Use a unique env var name to avoid interfering with other tests
        let result = read_secret("DOCFLOW_TEST_NONEXISTENT_SECRET_12345");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("DOCFLOW_TEST_NONEXISTENT"));
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(
            expand_home("/var/lib/docflow.db").unwrap(),
            PathBuf::from("/var/lib/docflow.db")
        );
    }
}
