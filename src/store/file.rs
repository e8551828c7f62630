use super::Store;
use crate::error::{EngineError, Result};
use crate::types::{Posting, ResourceMetadata, StoreStats};
use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// Append-only backend (§4.4, §6): one `<resource_id>.tdb` file of
/// `hash resource_id t1` lines per resource, plus a
/// `<resource_id>_meta_data.txt` sidecar. Suitable for bulk load/dump and
/// as the cache tier of [`super::CachingStore`]; `query` has to scan
/// every `.tdb` file in the folder since there is no persistent ordered
/// index, unlike [`super::MemoryStore`] or [`super::PostgresStore`].
pub struct FileStore {
    folder: PathBuf,
    write_lock: Arc<Mutex<()>>,
    pending_add: RwLock<Vec<(u64, i32, i32)>>,
    pending_delete: RwLock<Vec<(u64, i32, i32)>>,
}

impl FileStore {
    pub fn new(folder: impl Into<PathBuf>) -> Result<Self> {
        let folder = folder.into();
        fs::create_dir_all(&folder)?;
        Ok(Self {
            folder,
            write_lock: Arc::new(Mutex::new(())),
            pending_add: RwLock::new(Vec::new()),
            pending_delete: RwLock::new(Vec::new()),
        })
    }

    fn tdb_path(&self, resource_id: i32) -> PathBuf {
        self.folder.join(format!("{resource_id}.tdb"))
    }

    fn meta_path(&self, resource_id: i32) -> PathBuf {
        self.folder.join(format!("{resource_id}_meta_data.txt"))
    }

    fn list_tdb_files(folder: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(folder)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("tdb") {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn read_postings(path: &Path) -> Result<Vec<(u64, i32, i32)>> {
        let file = fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_posting_line(&line) {
                Some(triple) => out.push(triple),
                None => {
                    log::warn!(
                        "skipping corrupt posting line {} in {}: {line:?}",
                        lineno + 1,
                        path.display()
                    );
                }
            }
        }
        Ok(out)
    }
}

/// No persistent file handle is held between calls (each operation opens,
/// writes and closes), so the only thing left to release on drop is a
/// warning for writes a caller never `flush`ed — `close()` is the fallible
/// path that flushes them properly before the store goes away.
impl Drop for FileStore {
    fn drop(&mut self) {
        if let Ok(pending) = self.pending_add.try_read() {
            if !pending.is_empty() {
                log::warn!("FileStore at {} dropped with {} unflushed additions", self.folder.display(), pending.len());
            }
        }
        if let Ok(pending) = self.pending_delete.try_read() {
            if !pending.is_empty() {
                log::warn!("FileStore at {} dropped with {} unflushed deletes", self.folder.display(), pending.len());
            }
        }
    }
}

fn parse_posting_line(line: &str) -> Option<(u64, i32, i32)> {
    let mut fields = line.split_whitespace();
    let hash = fields.next()?.parse::<u64>().ok()?;
    let resource_id = fields.next()?.parse::<i32>().ok()?;
    let t1 = fields.next()?.parse::<i32>().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((hash, resource_id, t1))
}

#[async_trait]
impl Store for FileStore {
    async fn add(&self, hash: u64, resource_id: i32, t1: i32) -> Result<()> {
        self.pending_add.write().await.push((hash, resource_id, t1));
        Ok(())
    }

    async fn flush_store(&self) -> Result<()> {
        let mut pending = self.pending_add.write().await;
        if pending.is_empty() {
            return Ok(());
        }
        let mut by_resource: std::collections::HashMap<i32, Vec<(u64, i32)>> =
            std::collections::HashMap::new();
        for (hash, resource_id, t1) in pending.drain(..) {
            by_resource.entry(resource_id).or_default().push((hash, t1));
        }

        let lock = self.write_lock.clone();
        let folder = self.folder.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let _guard = lock.lock().unwrap();
            for (resource_id, lines) in by_resource {
                let path = folder.join(format!("{resource_id}.tdb"));
                let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
                for (hash, t1) in lines {
                    writeln!(file, "{hash} {resource_id} {t1}")?;
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| EngineError::StorageIo(e.to_string()))??;
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
        let mut by_resource: std::collections::HashMap<i32, Vec<(u64, i32)>> =
            std::collections::HashMap::new();
        for (hash, resource_id, t1) in pending.drain(..) {
            by_resource.entry(resource_id).or_default().push((hash, t1));
        }

        let lock = self.write_lock.clone();
        let folder = self.folder.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let _guard = lock.lock().unwrap();
            for (resource_id, victims) in by_resource {
                let path = folder.join(format!("{resource_id}.tdb"));
                if !path.exists() {
                    continue;
                }
                let mut remaining = FileStore::read_postings(&path)?;
                remaining.retain(|&(h, rid, t)| {
                    !victims
                        .iter()
                        .any(|&(vh, vt)| vh == h && vt == t && rid == resource_id)
                });
                let mut file = fs::File::create(&path)?;
                for (h, rid, t) in remaining {
                    writeln!(file, "{h} {rid} {t}")?;
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| EngineError::StorageIo(e.to_string()))??;
        Ok(())
    }

    async fn query(&self, hash: u64, query_range: u64) -> Result<Vec<(u64, Posting)>> {
        let folder = self.folder.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<(u64, Posting)>> {
            let mut out = Vec::new();
            for path in FileStore::list_tdb_files(&folder)? {
                for (h, resource_id, t1) in FileStore::read_postings(&path)? {
                    let diff = h.max(hash) - h.min(hash);
                    if diff <= query_range {
                        out.push((h, Posting { resource_id, t1 }));
                    }
                }
            }
            Ok(out)
        })
        .await
        .map_err(|e| EngineError::StorageIo(e.to_string()))?
    }

    async fn put_metadata(&self, metadata: ResourceMetadata) -> Result<()> {
        let path = self.meta_path(metadata.id);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut file = fs::File::create(&path)?;
            writeln!(
                file,
                "{}\t{}\t{}",
                metadata.path, metadata.duration_seconds, metadata.num_fingerprints
            )?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::StorageIo(e.to_string()))?
    }

    async fn get_metadata(&self, id: i32) -> Result<Option<ResourceMetadata>> {
        let path = self.meta_path(id);
        tokio::task::spawn_blocking(move || -> Result<Option<ResourceMetadata>> {
            if !path.exists() {
                return Ok(None);
            }
            let content = fs::read_to_string(&path)?;
            let mut fields = content.trim_end().splitn(3, '\t');
            let (Some(resource_path), Some(duration), Some(count)) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err(EngineError::StorageCorrupt(format!(
                    "malformed metadata file {}",
                    path.display()
                )));
            };
            let duration_seconds = duration
                .parse::<f32>()
                .map_err(|e| EngineError::StorageCorrupt(e.to_string()))?;
            let num_fingerprints = count
                .parse::<i32>()
                .map_err(|e| EngineError::StorageCorrupt(e.to_string()))?;
            Ok(Some(ResourceMetadata {
                id,
                path: resource_path.to_string(),
                duration_seconds,
                num_fingerprints,
            }))
        })
        .await
        .map_err(|e| EngineError::StorageIo(e.to_string()))?
    }

    async fn delete_metadata(&self, id: i32) -> Result<()> {
        let path = self.meta_path(id);
        tokio::task::spawn_blocking(move || -> Result<()> {
            if path.exists() {
                fs::remove_file(path)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| EngineError::StorageIo(e.to_string()))?
    }

    async fn clear(&self) -> Result<()> {
        self.pending_add.write().await.clear();
        self.pending_delete.write().await.clear();
        let lock = self.write_lock.clone();
        let folder = self.folder.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let _guard = lock.lock().unwrap();
            for entry in fs::read_dir(&folder)? {
                let path = entry?.path();
                if path.is_file() {
                    fs::remove_file(path)?;
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| EngineError::StorageIo(e.to_string()))?
    }

    async fn stats(&self) -> Result<StoreStats> {
        let folder = self.folder.clone();
        tokio::task::spawn_blocking(move || -> Result<StoreStats> {
            let mut num_postings = 0;
            let mut num_resources = 0;
            for entry in fs::read_dir(&folder)? {
                let path = entry?.path();
                match path.extension().and_then(|e| e.to_str()) {
                    Some("tdb") => num_postings += FileStore::read_postings(&path)?.len(),
                    _ => {
                        if path
                            .file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.ends_with("_meta_data.txt"))
                        {
                            num_resources += 1;
                        }
                    }
                }
            }
            Ok(StoreStats {
                num_postings,
                num_resources,
            })
        })
        .await
        .map_err(|e| EngineError::StorageIo(e.to_string()))?
    }
}
