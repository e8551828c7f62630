use super::Store;
use crate::error::{EngineError, Result};
use crate::schema::{fingerprint, resource};
use crate::types::{Posting, ResourceMetadata, StoreStats};
use async_trait::async_trait;
use diesel::prelude::*;
use diesel::upsert::on_constraint;
use diesel::{Connection, PgConnection, QueryableByName};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = fingerprint)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct FingerprintRow {
    hash: i64,
    resource_id: i32,
    t1: i32,
}

#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = resource)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ResourceRow {
    id: i32,
    path: String,
    duration_seconds: f32,
    num_fingerprints: i32,
}

#[derive(QueryableByName, Debug)]
struct PostingRow {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    hash: i64,
    #[diesel(sql_type = diesel::sql_types::Int4)]
    resource_id: i32,
    #[diesel(sql_type = diesel::sql_types::Int4)]
    t1: i32,
}

impl From<ResourceRow> for ResourceMetadata {
    fn from(row: ResourceRow) -> Self {
        ResourceMetadata {
            id: row.id,
            path: row.path,
            duration_seconds: row.duration_seconds,
            num_fingerprints: row.num_fingerprints,
        }
    }
}

impl From<ResourceMetadata> for ResourceRow {
    fn from(meta: ResourceMetadata) -> Self {
        ResourceRow {
            id: meta.id,
            path: meta.path,
            duration_seconds: meta.duration_seconds,
            num_fingerprints: meta.num_fingerprints,
        }
    }
}

/// The "KV-on-disk" backend of §4.4, realised with Postgres rather than
/// a hand-rolled ordered key-value store: `hash BETWEEN lo AND hi`
/// against a b-tree index on `fingerprint.hash` gives the same range
/// scan a literal `hash:t1:resource_id`-keyed KV store would.
///
/// Diesel's `PgConnection` is synchronous; every call runs the blocking
/// query inside `spawn_blocking` over a connection guarded by a plain
/// `Mutex`, per SPEC_FULL.md §5.
pub struct PostgresStore {
    conn: Arc<Mutex<PgConnection>>,
    pending_add: RwLock<Vec<(u64, i32, i32)>>,
    pending_delete: RwLock<Vec<(u64, i32, i32)>>,
}

impl PostgresStore {
    pub fn connect(database_url: &str) -> Result<Self> {
        let conn = PgConnection::establish(database_url)
            .map_err(|e| EngineError::StorageIo(format!("connecting to postgres: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            pending_add: RwLock::new(Vec::new()),
            pending_delete: RwLock::new(Vec::new()),
        })
    }

    async fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| EngineError::StorageIo("postgres connection mutex poisoned".into()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| EngineError::StorageIo(e.to_string()))?
    }
}

/// `PgConnection`'s own `Drop` already closes the socket; this only warns
/// about writes a caller queued but never `flush`ed, the same discipline
/// as the other backends. `close()` is the fallible path that flushes
/// them properly.
impl Drop for PostgresStore {
    fn drop(&mut self) {
        if let Ok(pending) = self.pending_add.try_read() {
            if !pending.is_empty() {
                log::warn!("PostgresStore dropped with {} unflushed additions", pending.len());
            }
        }
        if let Ok(pending) = self.pending_delete.try_read() {
            if !pending.is_empty() {
                log::warn!("PostgresStore dropped with {} unflushed deletes", pending.len());
            }
        }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn add(&self, hash: u64, resource_id: i32, t1: i32) -> Result<()> {
        self.pending_add.write().await.push((hash, resource_id, t1));
        Ok(())
    }

    async fn flush_store(&self) -> Result<()> {
        let mut pending = self.pending_add.write().await;
        if pending.is_empty() {
            return Ok(());
        }
        let rows: Vec<FingerprintRow> = pending
            .drain(..)
            .map(|(hash, resource_id, t1)| FingerprintRow {
                hash: hash as i64,
                resource_id,
                t1,
            })
            .collect();
        drop(pending);

        self.run_blocking(move |conn| {
            conn.transaction(|conn| {
                const BATCH_SIZE: usize = 5_000;
                for batch in rows.chunks(BATCH_SIZE) {
                    diesel::insert_into(fingerprint::table)
                        .values(batch)
                        .on_conflict(on_constraint("fingerprint_pkey"))
                        .do_nothing()
                        .execute(conn)?;
                }
                Ok::<(), diesel::result::Error>(())
            })
            .map_err(EngineError::from)
        })
        .await
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
        let victims: Vec<(i64, i32, i32)> = pending
            .drain(..)
            .map(|(hash, resource_id, t1)| (hash as i64, resource_id, t1))
            .collect();
        drop(pending);

        self.run_blocking(move |conn| {
            conn.transaction(|conn| {
                for (hash, resource_id, t1) in &victims {
                    diesel::delete(
                        fingerprint::table.filter(
                            fingerprint::hash
                                .eq(hash)
                                .and(fingerprint::resource_id.eq(resource_id))
                                .and(fingerprint::t1.eq(t1)),
                        ),
                    )
                    .execute(conn)?;
                }
                Ok::<(), diesel::result::Error>(())
            })
            .map_err(EngineError::from)
        })
        .await
    }

    async fn query(&self, hash: u64, query_range: u64) -> Result<Vec<(u64, Posting)>> {
        let lo = hash.saturating_sub(query_range) as i64;
        let hi = hash.saturating_add(query_range) as i64;

        self.run_blocking(move |conn| {
            let rows: Vec<PostingRow> = diesel::sql_query(
                "SELECT hash, resource_id, t1 FROM fingerprint WHERE hash BETWEEN $1 AND $2",
            )
            .bind::<diesel::sql_types::BigInt, _>(lo)
            .bind::<diesel::sql_types::BigInt, _>(hi)
            .load(conn)
            .map_err(EngineError::from)?;

            Ok(rows
                .into_iter()
                .map(|r| {
                    (
                        r.hash as u64,
                        Posting {
                            resource_id: r.resource_id,
                            t1: r.t1,
                        },
                    )
                })
                .collect())
        })
        .await
    }

    async fn put_metadata(&self, metadata: ResourceMetadata) -> Result<()> {
        let row: ResourceRow = metadata.into();
        self.run_blocking(move |conn| {
            diesel::insert_into(resource::table)
                .values(&row)
                .on_conflict(resource::id)
                .do_update()
                .set(&row)
                .execute(conn)
                .map_err(EngineError::from)?;
            Ok(())
        })
        .await
    }

    async fn get_metadata(&self, id: i32) -> Result<Option<ResourceMetadata>> {
        self.run_blocking(move |conn| {
            let row = resource::table
                .filter(resource::id.eq(id))
                .select(ResourceRow::as_select())
                .first::<ResourceRow>(conn)
                .optional()
                .map_err(EngineError::from)?;
            Ok(row.map(ResourceMetadata::from))
        })
        .await
    }

    async fn delete_metadata(&self, id: i32) -> Result<()> {
        self.run_blocking(move |conn| {
            diesel::delete(resource::table.filter(resource::id.eq(id)))
                .execute(conn)
                .map_err(EngineError::from)?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.pending_add.write().await.clear();
        self.pending_delete.write().await.clear();
        self.run_blocking(move |conn| {
            diesel::delete(fingerprint::table)
                .execute(conn)
                .map_err(EngineError::from)?;
            diesel::delete(resource::table)
                .execute(conn)
                .map_err(EngineError::from)?;
            Ok(())
        })
        .await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.run_blocking(move |conn| {
            let num_postings = fingerprint::table
                .count()
                .get_result::<i64>(conn)
                .map_err(EngineError::from)? as usize;
            let num_resources = resource::table
                .count()
                .get_result::<i64>(conn)
                .map_err(EngineError::from)? as usize;
            Ok(StoreStats {
                num_postings,
                num_resources,
            })
        })
        .await
    }
}

// Exercised only when DATABASE_URL is set; see tests/backend_equivalence.rs.
