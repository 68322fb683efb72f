//! Validation and normalization stages of the ingestion pipeline.
//!
//! - [`detect`] sniffs the real content type of an upload and enforces the
//!   size ceiling and type allow-list.
//! - [`client`] talks to the external format-conversion service.
//! - [`normalize`] turns any accepted upload into PDF bytes.

pub mod client;
pub mod detect;
#[cfg(any(test, feature = "testing"))]
pub mod fixtures;
pub mod normalize;

pub use client::{ConversionCredentials, ConversionService, HttpConversionClient};
pub use detect::{FileKind, MAX_UPLOAD_BYTES, validate};
pub use normalize::Normalizer;
