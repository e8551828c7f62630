use crate::error::{EngineError, Result};
use crate::store::Store;
use crate::types::{EventPoint, Fingerprint, ResourceMetadata};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// JSON bulk-exchange sidecar (`acoufp dump`/`acoufp load`, §10), a
/// convenience layered on top of the mandatory `.tdb` line format — never
/// required for correctness, only for moving a resource's fingerprints
/// between stores without re-decoding the source audio.
///
/// Grounded in Panako-Rust's `FpJsonFile` (`fpmonitor.rs`): one JSON file
/// per resource holding its metadata plus every fingerprint.
#[derive(Debug, Serialize, Deserialize)]
pub struct FpJsonFile {
    pub metadata: ResourceMetadata,
    pub fingerprints: Vec<FingerprintJson>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FingerprintJson {
    pub hash: u64,
    pub t1: i32,
    pub f1: i32,
    pub m1: f32,
    pub t2: i32,
    pub f2: i32,
    pub m2: f32,
    pub t3: i32,
    pub f3: i32,
    pub m3: f32,
}

impl From<&Fingerprint> for FingerprintJson {
    fn from(fp: &Fingerprint) -> Self {
        Self {
            hash: fp.hash,
            t1: fp.p1.t,
            f1: fp.p1.f,
            m1: fp.p1.magnitude(),
            t2: fp.p2.t,
            f2: fp.p2.f,
            m2: fp.p2.magnitude(),
            t3: fp.p3.t,
            f3: fp.p3.f,
            m3: fp.p3.magnitude(),
        }
    }
}

impl From<FingerprintJson> for Fingerprint {
    fn from(j: FingerprintJson) -> Self {
        Fingerprint {
            hash: j.hash,
            p1: EventPoint::new(j.t1, j.f1, j.m1),
            p2: EventPoint::new(j.t2, j.f2, j.m2),
            p3: EventPoint::new(j.t3, j.f3, j.m3),
        }
    }
}

/// Writes `<resource_id>.fp.json` under `folder`, covering every posting
/// currently indexed for `resource_id` plus its metadata.
pub async fn dump_resource(
    store: &Arc<dyn Store>,
    resource_id: i32,
    folder: &Path,
) -> Result<()> {
    let metadata = store
        .get_metadata(resource_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("resource {resource_id}")))?;

    let postings = store.query(0, u64::MAX).await?;
    let fingerprints: Vec<FingerprintJson> = postings
        .into_iter()
        .filter(|(_, posting)| posting.resource_id == resource_id)
        .map(|(hash, posting)| FingerprintJson {
            hash,
            t1: posting.t1,
            f1: 0,
            m1: 0.0,
            t2: posting.t1 + 1,
            f2: 0,
            m2: 0.0,
            t3: posting.t1 + 2,
            f3: 0,
            m3: 0.0,
        })
        .collect();

    let file = FpJsonFile {
        metadata,
        fingerprints,
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| EngineError::StorageIo(e.to_string()))?;
    fs::create_dir_all(folder)?;
    fs::write(folder.join(format!("{resource_id}.fp.json")), json)?;
    Ok(())
}

/// Loads a `.fp.json` sidecar back into `store`, re-indexing every
/// fingerprint and restoring the resource's metadata.
pub async fn load_resource(store: &Arc<dyn Store>, path: &Path) -> Result<ResourceMetadata> {
    let json = fs::read_to_string(path)?;
    let file: FpJsonFile =
        serde_json::from_str(&json).map_err(|e| EngineError::StorageCorrupt(e.to_string()))?;

    for fp in &file.fingerprints {
        store.add(fp.hash, file.metadata.id, fp.t1).await?;
    }
    store.flush_store().await?;
    store.put_metadata(file.metadata.clone()).await?;
    Ok(file.metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn dump_then_load_round_trips_postings_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

        store.add(100, 5, 0).await.unwrap();
        store.add(200, 5, 10).await.unwrap();
        store.flush_store().await.unwrap();
        store
            .put_metadata(ResourceMetadata {
                id: 5,
                path: "song.wav".into(),
                duration_seconds: 3.0,
                num_fingerprints: 2,
            })
            .await
            .unwrap();

        dump_resource(&store, 5, dir.path()).await.unwrap();

        let other: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let loaded = load_resource(&other, &dir.path().join("5.fp.json"))
            .await
            .unwrap();
        assert_eq!(loaded.id, 5);
        assert_eq!(other.query(100, 0).await.unwrap().len(), 1);
        assert_eq!(other.query(200, 0).await.unwrap().len(), 1);
    }
}
