use crate::config::{Config, StorageBackend};
use crate::decode;
use crate::error::{EngineError, Result};
use crate::extractor::EventPointExtractor;
use crate::fingerprint::FingerprintBuilder;
use crate::matcher::{self, MatchParams};
use crate::resource_id::resource_id_for_path;
use crate::store::{CachingStore, FileStore, MemoryStore, PostgresStore, Store};
use crate::types::{EventPoint, Fingerprint, QueryResult, ResourceMetadata};
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The engine wires a [`Config`] to a concrete [`Store`] and exposes the
/// two operations the whole system is about (§1): `store` and `query`,
/// plus deletion and the sliding-window monitor of §4.6.
///
/// This is the explicit context object SPEC_FULL.md §9 asks for in place
/// of the source's process-wide singleton backends.
pub struct Engine {
    pub config: Config,
    pub store: Arc<dyn Store>,
}

impl Engine {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        Self { config, store }
    }

    /// Builds the store described by `config.storage_backend`
    /// (optionally wrapped in the caching composite, §4.4).
    pub fn from_config(config: Config) -> Result<Self> {
        let primary: Arc<dyn Store> = match config.storage_backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::File => Arc::new(FileStore::new(Path::new(&config.cache_folder))?),
            StorageBackend::Postgres => {
                let url = config.database_url.as_ref().ok_or_else(|| {
                    EngineError::Config("DATABASE_URL is required for the postgres backend".into())
                })?;
                Arc::new(PostgresStore::connect(url)?)
            }
        };

        let store: Arc<dyn Store> = if config.cache_to_file
            && !matches!(config.storage_backend, StorageBackend::File)
        {
            let cache = FileStore::new(Path::new(&config.cache_folder))?;
            Arc::new(CachingStore::new(primary, cache))
        } else {
            primary
        };

        Ok(Self::new(config, store))
    }

    fn extractor(&self) -> EventPointExtractor<'_> {
        EventPointExtractor::new(&self.config)
    }

    fn fingerprint_builder(&self) -> FingerprintBuilder<'_> {
        FingerprintBuilder::new(&self.config)
    }

    fn build_fingerprints_from_samples(&self, samples: &[f32]) -> Vec<Fingerprint> {
        let points: Vec<EventPoint> = self.extractor().extract(samples);
        self.fingerprint_builder().build(&points)
    }

    /// §1 "store": decode, extract, fingerprint and index a resource,
    /// and write its fingerprint report sidecar (§6).
    pub async fn store_path(&self, path: &Path) -> Result<Option<ResourceMetadata>> {
        let resource_id = resource_id_for_path(path)?;
        let path_str = path.to_string_lossy().to_string();

        let (fingerprints, duration_seconds) = if self.config.use_cached_prints {
            match self.load_cached_fingerprints(resource_id).await? {
                Some(cached) => cached,
                None => self.decode_and_fingerprint(path)?,
            }
        } else {
            self.decode_and_fingerprint(path)?
        };

        if fingerprints.is_empty() {
            log::warn!("{}: zero fingerprints produced, not storing metadata", path_str);
            return Ok(None);
        }

        for fp in &fingerprints {
            self.store.add(fp.hash, resource_id, fp.t1()).await?;
        }
        self.store.flush_store().await?;

        let metadata = ResourceMetadata {
            id: resource_id,
            path: path_str,
            duration_seconds,
            num_fingerprints: fingerprints.len() as i32,
        };
        self.store.put_metadata(metadata.clone()).await?;

        write_fingerprint_report(path, &self.config, &fingerprints)?;

        Ok(Some(metadata))
    }

    fn decode_and_fingerprint(&self, path: &Path) -> Result<(Vec<Fingerprint>, f32)> {
        let samples = decode::decode_to_mono(path, self.config.sample_rate, None, None)?;
        let duration_seconds = samples.len() as f32 / self.config.sample_rate as f32;
        let fingerprints = self.build_fingerprints_from_samples(&samples);
        Ok((fingerprints, duration_seconds))
    }

    /// §7 "use cached prints": if a `<id>.tdb` exists in the configured
    /// cache folder, rebuild the fingerprint set from it instead of
    /// re-decoding and re-extracting (only `hash`/`t1` survive the
    /// round trip, so `p2`/`p3` are zeroed; they're diagnostics-only).
    async fn load_cached_fingerprints(
        &self,
        resource_id: i32,
    ) -> Result<Option<(Vec<Fingerprint>, f32)>> {
        let cache = FileStore::new(Path::new(&self.config.cache_folder))?;
        let Some(metadata) = cache.get_metadata(resource_id).await? else {
            return Ok(None);
        };
        let postings = cache.query(0, u64::MAX).await?;
        let fingerprints: Vec<Fingerprint> = postings
            .into_iter()
            .filter(|(_, posting)| posting.resource_id == resource_id)
            .map(|(hash, posting)| Fingerprint {
                hash,
                p1: EventPoint::new(posting.t1, 0, 0.0),
                p2: EventPoint::new(posting.t1 + 1, 0, 0.0),
                p3: EventPoint::new(posting.t1 + 2, 0, 0.0),
            })
            .collect();
        if fingerprints.is_empty() {
            return Ok(None);
        }
        log::info!("loaded {} cached fingerprints for resource {resource_id}", fingerprints.len());
        Ok(Some((fingerprints, metadata.duration_seconds)))
    }

    /// Duration of a clip at the engine's configured sample rate, used by
    /// the monitor (§4.6) to know when to stop sliding the window.
    pub fn probe_duration_seconds(&self, path: &Path) -> Result<f32> {
        let samples = decode::decode_to_mono(path, self.config.sample_rate, None, None)?;
        Ok(samples.len() as f32 / self.config.sample_rate as f32)
    }

    /// §1 "query": decode a whole clip (or a sub-window, for the
    /// monitor) and run the matcher against the current index.
    pub async fn query_path(&self, path: &Path) -> Result<Vec<QueryResult>> {
        self.query_window(path, None, None, 0.0, &HashSet::new(), None)
            .await
    }

    /// `deadline` is the caller-supplied cutoff of §5's "Cancellation/timeouts":
    /// once it passes, the matcher stops starting new resource groups and
    /// returns what it has with `QueryResult::cancelled` set.
    pub async fn query_window(
        &self,
        path: &Path,
        start_s: Option<f32>,
        len_s: Option<f32>,
        time_offset_s: f32,
        avoid_ids: &HashSet<i32>,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<Vec<QueryResult>> {
        // A deadline that has already passed leaves no partial work to
        // report; an empty Vec would be indistinguishable from "no
        // matches", so this is a hard error instead.
        if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
            return Err(EngineError::Cancelled);
        }

        let samples = decode::decode_to_mono(path, self.config.sample_rate, start_s, len_s)?;
        let fingerprints = self.build_fingerprints_from_samples(&samples);
        let query_path = path.to_string_lossy().to_string();

        matcher::match_fingerprints(
            self.store.as_ref(),
            &self.config,
            &fingerprints,
            MatchParams {
                query_path: &query_path,
                query_time_offset_s: time_offset_s,
                avoid_ids,
                deadline,
            },
        )
        .await
    }

    /// Removes a previously stored resource. Re-derives its fingerprints
    /// from the same audio file (decoding is deterministic, §4.1) so
    /// every `(hash, t1)` pair can be deleted individually, matching
    /// `delete` idempotence (§8).
    pub async fn delete_path(&self, path: &Path) -> Result<()> {
        let resource_id = resource_id_for_path(path)?;
        if self.store.get_metadata(resource_id).await?.is_none() {
            return Ok(());
        }

        let (fingerprints, _) = self.decode_and_fingerprint(path)?;
        for fp in &fingerprints {
            self.store.delete(fp.hash, resource_id, fp.t1()).await?;
        }
        self.store.flush_delete().await?;
        self.store.delete_metadata(resource_id).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    /// The fallible half of §5's "Resource lifetime" contract: flushes
    /// the backing store's pending batches before the engine (and the
    /// store handle it owns) goes out of scope.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}

/// Writes the store side-effect report of §6: `<basename>.txt` next to
/// the decoded resource, one header plus one line per fingerprint.
fn write_fingerprint_report(path: &Path, config: &Config, fingerprints: &[Fingerprint]) -> Result<()> {
    let report_path = path.with_extension("txt");
    let mut file = File::create(&report_path)?;

    let duration_s = fingerprints
        .iter()
        .map(|f| f.p3.t)
        .max()
        .unwrap_or(0) as f32
        * config.hop as f32
        / config.sample_rate as f32;

    writeln!(file, "Duration: {duration_s:.3}")?;
    writeln!(file, "Number of Prints: {}", fingerprints.len())?;
    writeln!(
        file,
        "Fingerprint format: Hash, t1, f1, m1, t2, f2, m2, t3, f3, m3, ts"
    )?;

    let frame_to_ms = 1000.0 * config.hop as f32 / config.sample_rate as f32;
    for fp in fingerprints {
        let ts = fp.p1.t.min(fp.p2.t).min(fp.p3.t) as f32 * frame_to_ms;
        writeln!(
            file,
            "{} {} {} {} {} {} {} {} {} {} {:.3}",
            fp.hash,
            fp.p1.t,
            fp.p1.f,
            fp.p1.magnitude(),
            fp.p2.t,
            fp.p2.f,
            fp.p2.magnitude(),
            fp.p3.t,
            fp.p3.f,
            fp.p3.magnitude(),
            ts,
        )?;
    }
    Ok(())
}

/// Naming helper shared by the CLI and the cache loader: the `.tdb`/`.fp`
/// filename for a resource id (§6).
pub fn cache_file_for(cache_folder: &Path, resource_id: i32) -> PathBuf {
    cache_folder.join(format!("{resource_id}.tdb"))
}
