//! Read-through cache for document metadata and listings.
//!
//! Three backends sit behind [`CacheBackend`]: an in-process map, Redis via
//! `deadpool-redis`, and a no-op. [`CacheLayer`] adds JSON encoding,
//! negative caching and the per-owner listing version used to invalidate
//! every cached list page of an owner at once.
//!
//! The cache is never authoritative. Backend failures are logged and treated
//! as misses so a broken cache degrades to database reads.

mod backend;
pub mod keys;
mod layer;

pub use backend::{CacheBackend, MemoryCache, NoCache, RedisCache};
pub use layer::{CacheLayer, CacheTtls, Cached};
