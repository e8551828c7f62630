use super::{neighbourhood, Store};
use crate::error::Result;
use crate::types::{Posting, ResourceMetadata, StoreStats};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// In-process backend (§4.4): an ordered map so the `±Q` neighbour
/// lookup is a direct range scan, no secondary sorted index needed.
///
/// `pending_*` hold postings/deletes `add`ed but not yet `flush`ed; the
/// committed map is only ever mutated by the two flush calls, giving the
/// per-resource atomicity §5 asks for (a reader either sees none or all
/// of a batch).
pub struct MemoryStore {
    committed: RwLock<BTreeMap<u64, Vec<(i32, i32)>>>,
    metadata: RwLock<HashMap<i32, ResourceMetadata>>,
    pending_add: RwLock<Vec<(u64, i32, i32)>>,
    pending_delete: RwLock<Vec<(u64, i32, i32)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            committed: RwLock::new(BTreeMap::new()),
            metadata: RwLock::new(HashMap::new()),
            pending_add: RwLock::new(Vec::new()),
            pending_delete: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort half of §5's "Resource lifetime" contract: the `BTreeMap`s
/// need no explicit release, so this only warns about writes a caller
/// queued with `add`/`delete` but never `flush`ed before dropping the
/// store — `close()` is the fallible path that catches this properly.
impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Ok(pending) = self.pending_add.try_read() {
            if !pending.is_empty() {
                log::warn!("MemoryStore dropped with {} unflushed additions", pending.len());
            }
        }
        if let Ok(pending) = self.pending_delete.try_read() {
            if !pending.is_empty() {
                log::warn!("MemoryStore dropped with {} unflushed deletes", pending.len());
            }
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn add(&self, hash: u64, resource_id: i32, t1: i32) -> Result<()> {
        self.pending_add.write().await.push((hash, resource_id, t1));
        Ok(())
    }

    async fn flush_store(&self) -> Result<()> {
        let mut pending = self.pending_add.write().await;
        if pending.is_empty() {
            return Ok(());
        }
        let mut committed = self.committed.write().await;
        for (hash, resource_id, t1) in pending.drain(..) {
            committed.entry(hash).or_default().push((resource_id, t1));
        }
        Ok(())
    }

    async fn delete(&self, hash: u64, resource_id: i32, t1: i32) -> Result<()> {
        self.pending_delete
            .write()
            .await
            .push((hash, resource_id, t1));
        Ok(())
    }

    async fn flush_delete(&self) -> Result<()> {
        let mut pending = self.pending_delete.write().await;
        if pending.is_empty() {
            return Ok(());
        }
        let mut committed = self.committed.write().await;
        for (hash, resource_id, t1) in pending.drain(..) {
            if let Some(postings) = committed.get_mut(&hash) {
                postings.retain(|&(rid, t)| !(rid == resource_id && t == t1));
                if postings.is_empty() {
                    committed.remove(&hash);
                }
            }
        }
        Ok(())
    }

    async fn query(&self, hash: u64, query_range: u64) -> Result<Vec<(u64, Posting)>> {
        let (lo, hi) = neighbourhood(hash, query_range);
        let committed = self.committed.read().await;
        let mut out = Vec::new();
        for (&matched_hash, postings) in committed.range(lo..=hi) {
            out.extend(
                postings
                    .iter()
                    .map(|&(resource_id, t1)| (matched_hash, Posting { resource_id, t1 })),
            );
        }
        Ok(out)
    }

    async fn put_metadata(&self, metadata: ResourceMetadata) -> Result<()> {
        self.metadata.write().await.insert(metadata.id, metadata);
        Ok(())
    }

    async fn get_metadata(&self, id: i32) -> Result<Option<ResourceMetadata>> {
        Ok(self.metadata.read().await.get(&id).cloned())
    }

    async fn delete_metadata(&self, id: i32) -> Result<()> {
        self.metadata.write().await.remove(&id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.committed.write().await.clear();
        self.metadata.write().await.clear();
        self.pending_add.write().await.clear();
        self.pending_delete.write().await.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let committed = self.committed.read().await;
        let num_postings = committed.values().map(|v| v.len()).sum();
        let num_resources = self.metadata.read().await.len();
        Ok(StoreStats {
            num_postings,
            num_resources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_is_invisible_until_flushed() {
        let store = MemoryStore::new();
        store.add(100, 1, 0).await.unwrap();
        assert!(store.query(100, 0).await.unwrap().is_empty());

        store.flush_store().await.unwrap();
        let postings = store.query(100, 0).await.unwrap();
        assert_eq!(postings, vec![(100, Posting { resource_id: 1, t1: 0 })]);
    }

    #[tokio::test]
    async fn neighbour_lookup_returns_hashes_within_query_range() {
        let store = MemoryStore::new();
        for h in [98, 99, 100, 101, 102] {
            store.add(h, 1, 0).await.unwrap();
        }
        store.flush_store().await.unwrap();

        let postings = store.query(100, 1).await.unwrap();
        assert_eq!(postings.len(), 3);
    }

    #[tokio::test]
    async fn delete_then_flush_removes_the_posting() {
        let store = MemoryStore::new();
        store.add(100, 1, 0).await.unwrap();
        store.flush_store().await.unwrap();

        store.delete(100, 1, 0).await.unwrap();
        store.flush_delete().await.unwrap();
        assert!(store.query(100, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn metadata_round_trips() {
        let store = MemoryStore::new();
        let meta = ResourceMetadata {
            id: 7,
            path: "a.wav".into(),
            duration_seconds: 3.5,
            num_fingerprints: 20,
        };
        store.put_metadata(meta.clone()).await.unwrap();
        assert_eq!(store.get_metadata(7).await.unwrap(), Some(meta));

        store.delete_metadata(7).await.unwrap();
        assert_eq!(store.get_metadata(7).await.unwrap(), None);
    }

    #[tokio::test]
    async fn close_flushes_pending_adds_and_deletes() {
        let store = MemoryStore::new();
        store.add(100, 1, 0).await.unwrap();
        store.close().await.unwrap();
        assert_eq!(store.query(100, 0).await.unwrap().len(), 1);

        store.delete(100, 1, 0).await.unwrap();
        store.close().await.unwrap();
        assert!(store.query(100, 0).await.unwrap().is_empty());
    }
}
