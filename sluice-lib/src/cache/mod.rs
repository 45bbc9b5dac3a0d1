//! Segmented concurrent cache for Sluice.
//!
//! A bounded key/value store shared by every rate-limited identity. It provides:
//!
//! - **Segments**: the key space is split into a fixed number of shards, each
//!   guarded by its own `RwLock`, so unrelated keys rarely contend.
//! - **Recency list**: one global arena-backed doubly linked list, guarded by
//!   a dedicated mutex, ordering live entries from most to least recently
//!   promoted. Eviction always walks from its tail.
//! - **Eviction**: weight-based (`maximum_weight` with a configurable weigher)
//!   and time-based (`expire_after_access`, `expire_after_write`), sharing the
//!   same strict LRU order. Expired entries are found lazily, never by a
//!   background sweeper.
//! - **Single-flight loading**: `compute_if_absent` publishes a placeholder
//!   before the loader runs; concurrent callers for the same key wait on it
//!   instead of loading again.
//!
//! # Lock ordering
//!
//! The list mutex may be taken first and a segment lock second (to remove an
//! already known key while evicting, or to clear every segment in
//! `invalidate_all`). No code path waits for the list mutex while holding a
//! segment lock, and loaders and removal listeners never run under either.
//!
//! # Example Usage
//!
//! ```ignore
//! use sluice_lib::cache::CacheBuilder;
//!
//! let cache = CacheBuilder::new().maximum_weight(10_000).build()?;
//! let value = cache.compute_if_absent("tenant-a".to_string(), |key| {
//!     Ok::<_, std::io::Error>(key.len())
//! })?;
//! ```

mod builder;
mod entry;
mod recency;
mod segment;
mod segmented;

pub use builder::{CacheBuilder, RemovalListener, Weigher};
pub use entry::{RemovalNotification, RemovalReason};
pub use segment::CacheStats;
pub use segmented::{Iter, Keys, SegmentedCache, Values};

use ahash::RandomState;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;

/// Number of segments every cache is split into.
pub const SEGMENT_COUNT: usize = 256;

/// Failure of the loader passed to `compute_if_absent`.
///
/// Cloneable so every caller waiting on the same load observes the same error.
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    #[error("loader failed: {0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync>),

    #[error("loader panicked")]
    Panicked,
}

#[inline]
fn hash<T: Hash>(key: T, hasher: &RandomState) -> u64 {
    hasher.hash_one(key)
}
