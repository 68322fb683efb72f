//! Shared types, error model, and configuration for docflow.
//!
//! This crate is the foundation depended on by all other docflow crates.
//! It provides:
//! - [`DocflowError`], the unified error type
//! - Domain types ([`Document`], [`DocumentStatus`], [`DocumentSummary`], [`Folder`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BlobBackend, BlobConfig, CacheBackendKind, CacheConfig, ConversionConfig,
    DatabaseConfig, PipelineConfig, SummarizationConfig, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from, read_secret,
};
pub use error::{DocflowError, Result};
pub use types::{
    CANONICAL_MIME, Document, DocumentQuery, DocumentShare, DocumentStatus, DocumentSummary,
    DocumentUpdate, Folder, SortOrder, format_timestamp, new_id,
};
