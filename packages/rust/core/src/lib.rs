//! Core ingestion pipeline and document services for docflow.
//!
//! This crate ties together validation, normalization, blob storage and the
//! durable step log into the background ingestion workflow, forks the
//! summary sub-pipeline, and serves cached document and folder queries.

pub mod documents;
pub mod folders;
pub mod pipeline;
pub mod recovery;
pub mod services;
pub mod status;
pub mod summarizer;
pub mod summary;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use documents::{DEFAULT_URL_TTL, DocumentService};
pub use folders::FolderService;
pub use pipeline::{IngestionPipeline, Submitted, Upload};
pub use services::Services;
pub use status::{StatusTracker, Transition};
