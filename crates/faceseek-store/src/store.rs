//! The cache store: get-or-compute, stats, clear, cleanup and migration.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use faceseek_core::DetectedFace;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::backend::{CacheBackend, StoredRow};
use crate::entry::{self, CacheEntry, CURRENT_SCHEMA_VERSION};
use crate::key::{normalize, SourceKey};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("malformed cache payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown cache schema version {0}")]
    UnknownSchema(u32),
    #[error("embedding provider failed: {0}")]
    Provider(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Whether this error originated in the embedding provider rather than
    /// the store itself.
    pub fn is_provider(&self) -> bool {
        matches!(self, StoreError::Provider(_))
    }
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_faces: usize,
    /// Approximate payload size in bytes.
    pub storage_bytes: u64,
    pub oldest_updated_at: Option<DateTime<Utc>>,
    pub newest_updated_at: Option<DateTime<Utc>>,
}

/// Result of a cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub kept: usize,
    /// Entries whose validity predicate failed to evaluate. These are kept
    /// (fail-open): cleanup never deletes what it cannot verify.
    pub errors: usize,
}

/// Result of a migration pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MigrateReport {
    pub upgraded: usize,
    pub already_current: usize,
}

/// Content-addressed cache of face records, keyed by [`SourceKey`].
///
/// The store is the single writer of entry data; everything else reads
/// entry snapshots. Writes for the same key serialize behind a per-key
/// async mutex held only across the compute+persist step, so concurrent
/// requests for distinct keys never contend.
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    // Per-key mutexes live for the process lifetime; one small allocation
    // per distinct source is acceptable for cache-sized populations.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn key_lock(&self, key: &SourceKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return the cached entry for `identifier`, computing and persisting
    /// it via `compute` on a miss.
    ///
    /// An existing entry counts as a hit only at the current schema
    /// version; stale-schema entries are recomputed and overwritten. A
    /// provider failure persists nothing and surfaces as
    /// [`StoreError::Provider`]. Zero detected faces is not a failure: the
    /// empty entry is cached so the source is not re-analyzed.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        identifier: &str,
        compute: F,
    ) -> Result<CacheEntry, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<DetectedFace>, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let key = SourceKey::from_identifier(identifier);

        // Fast path: current-schema hit needs no lock and no provider I/O.
        if let Some(entry) = self.current_entry(&key).await? {
            tracing::debug!(%key, faces = entry.faces.len(), "cache hit");
            return Ok(entry);
        }

        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        // Re-check under the lock: a racing caller may have written while
        // we waited.
        if let Some(entry) = self.current_entry(&key).await? {
            return Ok(entry);
        }

        let previous = self.backend.get(&key).await?;
        let detections = compute()
            .await
            .map_err(|e| StoreError::Provider(Box::new(e)))?;

        let mut entry = CacheEntry::from_detections(detections);
        if let Some(prev) = &previous {
            // Overwriting a stale-schema entry keeps the original creation
            // time; only the content and update time are new.
            if let Some(created) = DateTime::from_timestamp(prev.created_at, 0) {
                entry.created_at = created;
            }
        }

        self.backend.put(row_for(&key, identifier, &entry)?).await?;
        tracing::debug!(%key, faces = entry.faces.len(), "cached embeddings");
        Ok(entry)
    }

    /// Read-only lookup; `None` when no entry exists. Stale-schema entries
    /// are upgraded in memory (not rewritten) so callers always see the
    /// current record layout.
    pub async fn get(&self, identifier: &str) -> Result<Option<CacheEntry>, StoreError> {
        let key = SourceKey::from_identifier(identifier);
        match self.backend.get(&key).await? {
            None => Ok(None),
            Some(row) => Ok(Some(entry_from_row(&row)?)),
        }
    }

    pub async fn stats(&self) -> Result<CacheStats, StoreError> {
        let rows = self.backend.list().await?;
        let mut stats = CacheStats {
            total_entries: rows.len(),
            total_faces: 0,
            storage_bytes: 0,
            oldest_updated_at: None,
            newest_updated_at: None,
        };
        for row in &rows {
            stats.total_faces += row.num_faces;
            stats.storage_bytes += row.payload.len() as u64;
            let updated = DateTime::from_timestamp(row.updated_at, 0);
            if stats.oldest_updated_at.is_none() || updated < stats.oldest_updated_at {
                stats.oldest_updated_at = updated;
            }
            if updated > stats.newest_updated_at {
                stats.newest_updated_at = updated;
            }
        }
        Ok(stats)
    }

    /// Remove every entry. Irrecoverable; returns the count removed.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let removed = self.backend.clear().await?;
        tracing::info!(removed, "cache cleared");
        Ok(removed)
    }

    /// Remove entries that fail the supplied validity check.
    ///
    /// The predicate receives the entry's source identifier and decoded
    /// record; `Ok(true)` keeps, `Ok(false)` removes. Undecodable payloads
    /// count as invalid and are removed. A predicate evaluation error
    /// keeps the entry and is reported in [`CleanupReport::errors`].
    pub async fn cleanup<F, Fut>(&self, validity: F) -> Result<CleanupReport, StoreError>
    where
        F: Fn(String, CacheEntry) -> Fut,
        Fut: Future<Output = Result<bool, Box<dyn std::error::Error + Send + Sync>>>,
    {
        let mut report = CleanupReport { removed: 0, kept: 0, errors: 0 };

        for row in self.backend.list().await? {
            let key = SourceKey::from_identifier(&row.identifier);
            let entry = match entry_from_row(&row) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(%key, error = %e, "removing undecodable cache entry");
                    self.backend.delete(&key).await?;
                    report.removed += 1;
                    continue;
                }
            };

            match validity(row.identifier.clone(), entry).await {
                Ok(true) => report.kept += 1,
                Ok(false) => {
                    tracing::debug!(%key, identifier = %row.identifier, "removing invalid cache entry");
                    self.backend.delete(&key).await?;
                    report.removed += 1;
                }
                Err(e) => {
                    // Fail-open: never delete what we could not verify.
                    tracing::warn!(%key, error = %e, "cleanup predicate failed; keeping entry");
                    report.kept += 1;
                    report.errors += 1;
                }
            }
        }

        tracing::info!(removed = report.removed, kept = report.kept, errors = report.errors, "cache cleanup finished");
        Ok(report)
    }

    /// Rewrite every entry older than the current schema into the current
    /// layout, filling fields the old schema lacked with explicit `None`
    /// defaults. Idempotent: a second run finds nothing to upgrade.
    pub async fn migrate(&self) -> Result<MigrateReport, StoreError> {
        let mut report = MigrateReport { upgraded: 0, already_current: 0 };

        for row in self.backend.list().await? {
            if row.schema_version >= CURRENT_SCHEMA_VERSION {
                if row.schema_version > CURRENT_SCHEMA_VERSION {
                    tracing::warn!(
                        source_key = %row.source_key,
                        version = row.schema_version,
                        "entry from a newer schema; leaving untouched"
                    );
                }
                report.already_current += 1;
                continue;
            }

            let faces = entry::decode(&row.payload)?.into_faces();
            let upgraded = StoredRow {
                payload: entry::encode_current(&faces)?,
                schema_version: CURRENT_SCHEMA_VERSION,
                num_faces: faces.len(),
                updated_at: Utc::now().timestamp(),
                ..row
            };
            self.backend.put(upgraded).await?;
            report.upgraded += 1;
        }

        tracing::info!(upgraded = report.upgraded, already_current = report.already_current, "cache migration finished");
        Ok(report)
    }

    async fn current_entry(&self, key: &SourceKey) -> Result<Option<CacheEntry>, StoreError> {
        match self.backend.get(key).await? {
            Some(row) if row.schema_version == CURRENT_SCHEMA_VERSION => {
                Ok(Some(entry_from_row(&row)?))
            }
            _ => Ok(None),
        }
    }
}

fn entry_from_row(row: &StoredRow) -> Result<CacheEntry, StoreError> {
    let payload = entry::decode(&row.payload)?;
    let epoch = DateTime::UNIX_EPOCH;
    Ok(CacheEntry {
        schema_version: payload.version(),
        faces: payload.into_faces(),
        created_at: DateTime::from_timestamp(row.created_at, 0).unwrap_or(epoch),
        updated_at: DateTime::from_timestamp(row.updated_at, 0).unwrap_or(epoch),
    })
}

fn row_for(key: &SourceKey, identifier: &str, entry: &CacheEntry) -> Result<StoredRow, StoreError> {
    Ok(StoredRow {
        source_key: key.as_str().to_string(),
        identifier: normalize(identifier),
        payload: entry::encode_current(&entry.faces)?,
        schema_version: entry.schema_version,
        num_faces: entry.faces.len(),
        created_at: entry.created_at.timestamp(),
        updated_at: entry.updated_at.timestamp(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use faceseek_core::Embedding;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> (CacheStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (CacheStore::new(backend.clone()), backend)
    }

    fn detection(values: Vec<f32>) -> DetectedFace {
        DetectedFace { bbox: None, score: Some(0.9), embedding: Embedding::new(values) }
    }

    #[derive(Debug, Error)]
    #[error("analyzer exploded")]
    struct FakeProviderError;

    #[tokio::test]
    async fn test_get_or_compute_is_idempotent() {
        let (store, _) = store();
        let calls = AtomicUsize::new(0);

        let first = store
            .get_or_compute("/img/a.jpg", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FakeProviderError>(vec![detection(vec![1.0, 0.0])])
            })
            .await
            .unwrap();

        let second = store
            .get_or_compute("/img/a.jpg", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FakeProviderError>(vec![detection(vec![0.0, 1.0])])
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.faces, second.faces);
        assert_eq!(first.faces[0].embedding.values, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_provider_failure_persists_nothing() {
        let (store, backend) = store();

        let result = store
            .get_or_compute("/img/broken.jpg", || async {
                Err::<Vec<DetectedFace>, _>(FakeProviderError)
            })
            .await;

        match result {
            Err(e) => assert!(e.is_provider(), "expected provider error, got {e:?}"),
            Ok(_) => panic!("expected failure"),
        }
        assert!(backend.list().await.unwrap().is_empty());

        // A later successful compute still works.
        let entry = store
            .get_or_compute("/img/broken.jpg", || async {
                Ok::<_, FakeProviderError>(vec![detection(vec![1.0])])
            })
            .await
            .unwrap();
        assert_eq!(entry.faces.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_faces_is_cached() {
        let (store, _) = store();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let entry = store
                .get_or_compute("/img/landscape.jpg", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, FakeProviderError>(Vec::new())
                })
                .await
                .unwrap();
            assert!(entry.faces.is_empty());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_schema_is_a_miss() {
        let (store, backend) = store();
        let key = SourceKey::from_identifier("/img/old.jpg");
        backend
            .put(StoredRow {
                source_key: key.as_str().to_string(),
                identifier: "/img/old.jpg".to_string(),
                payload: r#"{"schema_version":1,"embeddings":[[1.0,0.0]]}"#.to_string(),
                schema_version: 1,
                num_faces: 1,
                created_at: 100,
                updated_at: 100,
            })
            .await
            .unwrap();

        let calls = AtomicUsize::new(0);
        let entry = store
            .get_or_compute("/img/old.jpg", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FakeProviderError>(vec![detection(vec![0.0, 1.0])])
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(entry.is_current());
        assert_eq!(entry.faces[0].embedding.values, vec![0.0, 1.0]);
        // Recomputation keeps the original creation time.
        assert_eq!(entry.created_at.timestamp(), 100);

        let row = backend.get(&key).await.unwrap().unwrap();
        assert_eq!(row.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_get_peek_does_not_compute() {
        let (store, _) = store();
        assert!(store.get("/img/nowhere.jpg").await.unwrap().is_none());

        store
            .get_or_compute("/img/a.jpg", || async {
                Ok::<_, FakeProviderError>(vec![detection(vec![1.0])])
            })
            .await
            .unwrap();

        let peeked = store.get("/img/a.jpg").await.unwrap().unwrap();
        assert_eq!(peeked.faces.len(), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let (store, _) = store();
        store
            .get_or_compute("/img/a.jpg", || async {
                Ok::<_, FakeProviderError>(vec![detection(vec![1.0]), detection(vec![0.5])])
            })
            .await
            .unwrap();
        store
            .get_or_compute("/img/b.jpg", || async {
                Ok::<_, FakeProviderError>(vec![detection(vec![1.0])])
            })
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_faces, 3);
        assert!(stats.storage_bytes > 0);
        assert!(stats.oldest_updated_at.is_some());
        assert!(stats.newest_updated_at >= stats.oldest_updated_at);
    }

    #[tokio::test]
    async fn test_clear() {
        let (store, _) = store();
        store
            .get_or_compute("/img/a.jpg", || async {
                Ok::<_, FakeProviderError>(vec![detection(vec![1.0])])
            })
            .await
            .unwrap();

        assert_eq!(store.clear().await.unwrap(), 1);
        assert_eq!(store.stats().await.unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn test_cleanup_fail_open() {
        let (store, backend) = store();
        for id in ["/img/keep.jpg", "/img/drop.jpg", "/img/flaky.jpg"] {
            store
                .get_or_compute(id, || async {
                    Ok::<_, FakeProviderError>(vec![detection(vec![1.0])])
                })
                .await
                .unwrap();
        }

        let report = store
            .cleanup(|identifier, _entry| async move {
                match identifier.as_str() {
                    "/img/keep.jpg" => Ok(true),
                    "/img/drop.jpg" => Ok(false),
                    _ => Err("probe unavailable".into()),
                }
            })
            .await
            .unwrap();

        assert_eq!(report, CleanupReport { removed: 1, kept: 2, errors: 1 });
        // The flaky entry survived.
        let remaining = backend.list().await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().any(|r| r.identifier == "/img/flaky.jpg"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_undecodable_entries() {
        let (store, backend) = store();
        let key = SourceKey::from_identifier("/img/corrupt.jpg");
        backend
            .put(StoredRow {
                source_key: key.as_str().to_string(),
                identifier: "/img/corrupt.jpg".to_string(),
                payload: "not json".to_string(),
                schema_version: 2,
                num_faces: 0,
                created_at: 100,
                updated_at: 100,
            })
            .await
            .unwrap();

        let report = store.cleanup(|_, _| async { Ok(true) }).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(backend.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_migrate_upgrades_v1_and_is_idempotent() {
        let (store, backend) = store();
        let key = SourceKey::from_identifier("/img/legacy.jpg");
        backend
            .put(StoredRow {
                source_key: key.as_str().to_string(),
                identifier: "/img/legacy.jpg".to_string(),
                payload: r#"{"schema_version":1,"embeddings":[[1.0,0.0],[0.0,1.0]]}"#.to_string(),
                schema_version: 1,
                num_faces: 2,
                created_at: 100,
                updated_at: 100,
            })
            .await
            .unwrap();
        store
            .get_or_compute("/img/new.jpg", || async {
                Ok::<_, FakeProviderError>(vec![detection(vec![1.0])])
            })
            .await
            .unwrap();

        let report = store.migrate().await.unwrap();
        assert_eq!(report, MigrateReport { upgraded: 1, already_current: 1 });

        let migrated = store.get("/img/legacy.jpg").await.unwrap().unwrap();
        assert!(migrated.is_current());
        assert_eq!(migrated.faces.len(), 2);
        assert!(migrated.faces.iter().all(|f| f.bbox.is_none() && f.score.is_none()));
        assert_eq!(migrated.created_at.timestamp(), 100);

        // Second pass is a no-op.
        let again = store.migrate().await.unwrap();
        assert_eq!(again, MigrateReport { upgraded: 0, already_current: 2 });
    }
}
