use crate::error::Result;
use crate::types::{Posting, ResourceMetadata, StoreStats};
use async_trait::async_trait;

pub mod cache;
pub mod file;
pub mod memory;
pub mod postgres;

pub use cache::CachingStore;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// The storage contract every backend satisfies (§4.4): a hash-keyed
/// posting-list index plus a resource metadata table. `add`/`delete` only
/// enqueue; `flush_store`/`flush_delete` make the change durable and
/// visible to `query` (§5's per-resource atomicity requirement).
#[async_trait]
pub trait Store: Send + Sync {
    async fn add(&self, hash: u64, resource_id: i32, t1: i32) -> Result<()>;
    async fn flush_store(&self) -> Result<()>;

    async fn delete(&self, hash: u64, resource_id: i32, t1: i32) -> Result<()>;
    async fn flush_delete(&self) -> Result<()>;

    /// Returns `(matched_hash, posting)` for every hash `h'` with
    /// `|h' - hash| <= query_range`; `matched_hash` is `h'` itself, kept
    /// alongside the posting so callers (the matcher) can report which
    /// neighbour hash actually matched (§3, "Match hit").
    async fn query(&self, hash: u64, query_range: u64) -> Result<Vec<(u64, Posting)>>;

    async fn put_metadata(&self, metadata: ResourceMetadata) -> Result<()>;
    async fn get_metadata(&self, id: i32) -> Result<Option<ResourceMetadata>>;
    async fn delete_metadata(&self, id: i32) -> Result<()>;

    async fn clear(&self) -> Result<()>;
    async fn stats(&self) -> Result<StoreStats>;

    /// The fallible async half of §5's "Resource lifetime" contract: flushes
    /// any pending batches and surfaces I/O errors a `Drop` impl never
    /// could. Each backend additionally carries a `Drop` that releases its
    /// handle and warns if it is dropped with unflushed writes still
    /// pending (a caller that skipped `close()`); the default body here
    /// covers the common "flush both queues" case, overridden only where a
    /// backend has more than its own queues to close (e.g. the caching
    /// composite).
    async fn close(&self) -> Result<()> {
        self.flush_store().await?;
        self.flush_delete().await?;
        Ok(())
    }
}

/// Symmetric neighbourhood `[hash - q, hash + q]` with saturating bounds,
/// since `hash` is unsigned and `q` can exceed it near zero.
pub(crate) fn neighbourhood(hash: u64, query_range: u64) -> (u64, u64) {
    (hash.saturating_sub(query_range), hash.saturating_add(query_range))
}
