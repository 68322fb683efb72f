//! Cache key layout.
//!
//! Listing keys embed the owner's current listing version, so bumping the
//! version orphans every page cached under the old one. Orphans expire on
//! their own TTL.

use docflow_shared::DocumentQuery;
use sha2::{Digest, Sha256};

/// Full document record.
pub fn document_key(document_id: &str) -> String {
    format!("document:{document_id}")
}

/// Storage key of a READY document.
pub fn storage_key_key(document_id: &str) -> String {
    format!("document:{document_id}:storageKey")
}

/// Listing version counter of an owner.
pub fn version_key(owner_id: &str) -> String {
    format!("user:{owner_id}:documents:version")
}

/// One page of an owner's listing, or of a name search when `search` is set.
pub fn list_key(
    owner_id: &str,
    version: u64,
    query: &DocumentQuery,
    search: Option<&str>,
) -> String {
    let folder = query.folder_id.as_deref().unwrap_or("all");
    let mut key = format!(
        "documents:user:{owner_id}:v{version}:folder:{folder}:order:{}:limit:{}:offset:{}",
        query.order.as_str(),
        query.limit,
        query.offset
    );
    if let Some(term) = search {
        // Hash the term so arbitrary user input never shapes the key.
        let digest = Sha256::digest(term.to_lowercase().as_bytes());
        let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        key.push_str(":search:");
        key.push_str(&hex);
    }
    key
}
