use super::{FileStore, Store};
use crate::error::Result;
use crate::types::{Posting, ResourceMetadata, StoreStats};
use async_trait::async_trait;
use std::sync::Arc;

/// Read/write-through composite (§4.4): every write goes to the
/// authoritative `primary` backend *and* the `cache` [`FileStore`], so the
/// `<id>.tdb` cache file engine.rs consults before re-decoding/extracting
/// a resource (`USE_CACHED_PRINTS`, §6) always mirrors the primary's
/// content. Reads go to `primary`, which has the real index; `cache` is
/// never queried directly, only loaded wholesale by the engine on a
/// cache hit.
pub struct CachingStore {
    primary: Arc<dyn Store>,
    cache: FileStore,
}

impl CachingStore {
    pub fn new(primary: Arc<dyn Store>, cache: FileStore) -> Self {
        Self { primary, cache }
    }
}

#[async_trait]
impl Store for CachingStore {
    async fn add(&self, hash: u64, resource_id: i32, t1: i32) -> Result<()> {
        self.primary.add(hash, resource_id, t1).await?;
        self.cache.add(hash, resource_id, t1).await?;
        Ok(())
    }

    async fn flush_store(&self) -> Result<()> {
        self.primary.flush_store().await?;
        self.cache.flush_store().await?;
        Ok(())
    }

    async fn delete(&self, hash: u64, resource_id: i32, t1: i32) -> Result<()> {
        self.primary.delete(hash, resource_id, t1).await?;
        self.cache.delete(hash, resource_id, t1).await?;
        Ok(())
    }

    async fn flush_delete(&self) -> Result<()> {
        self.primary.flush_delete().await?;
        self.cache.flush_delete().await?;
        Ok(())
    }

    async fn query(&self, hash: u64, query_range: u64) -> Result<Vec<(u64, Posting)>> {
        self.primary.query(hash, query_range).await
    }

    async fn put_metadata(&self, metadata: ResourceMetadata) -> Result<()> {
        self.primary.put_metadata(metadata.clone()).await?;
        self.cache.put_metadata(metadata).await?;
        Ok(())
    }

    async fn get_metadata(&self, id: i32) -> Result<Option<ResourceMetadata>> {
        match self.primary.get_metadata(id).await? {
            Some(m) => Ok(Some(m)),
            None => self.cache.get_metadata(id).await,
        }
    }

    async fn delete_metadata(&self, id: i32) -> Result<()> {
        self.primary.delete_metadata(id).await?;
        self.cache.delete_metadata(id).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.primary.clear().await?;
        self.cache.clear().await?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.primary.stats().await
    }

    /// Overrides the trait default since a composite has two queues to
    /// close, not one (§5, "Resource lifetime").
    async fn close(&self) -> Result<()> {
        self.primary.close().await?;
        self.cache.close().await?;
        Ok(())
    }
}
