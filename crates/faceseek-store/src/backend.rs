//! Persistence seam for the cache store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::key::SourceKey;
use crate::store::StoreError;

/// One persisted cache row: the JSON payload plus the columns the store
/// reads without decoding it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub source_key: String,
    /// Normalized source identifier, kept so cleanup can re-probe the source.
    pub identifier: String,
    pub payload: String,
    pub schema_version: u32,
    pub num_faces: usize,
    /// Unix seconds.
    pub created_at: i64,
    pub updated_at: i64,
}

/// Storage backend for cache rows. Implementations must be safe for
/// concurrent use; the row format is owned by the store, not the backend.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    async fn get(&self, key: &SourceKey) -> Result<Option<StoredRow>, StoreError>;

    /// Insert or overwrite the row for its key.
    async fn put(&self, row: StoredRow) -> Result<(), StoreError>;

    /// Remove one row; returns whether it existed.
    async fn delete(&self, key: &SourceKey) -> Result<bool, StoreError>;

    /// Every stored row. Cache populations are small (one row per image
    /// source); stats, cleanup and migration all scan.
    async fn list(&self) -> Result<Vec<StoredRow>, StoreError>;

    /// Remove everything; returns the number of rows removed.
    async fn clear(&self) -> Result<usize, StoreError>;
}

/// In-memory backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryBackend {
    rows: RwLock<HashMap<String, StoredRow>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &SourceKey) -> Result<Option<StoredRow>, StoreError> {
        Ok(self.rows.read().await.get(key.as_str()).cloned())
    }

    async fn put(&self, row: StoredRow) -> Result<(), StoreError> {
        self.rows.write().await.insert(row.source_key.clone(), row);
        Ok(())
    }

    async fn delete(&self, key: &SourceKey) -> Result<bool, StoreError> {
        Ok(self.rows.write().await.remove(key.as_str()).is_some())
    }

    async fn list(&self) -> Result<Vec<StoredRow>, StoreError> {
        let mut rows: Vec<StoredRow> = self.rows.read().await.values().cloned().collect();
        // Deterministic scan order for stats and migration logs.
        rows.sort_by(|a, b| a.source_key.cmp(&b.source_key));
        Ok(rows)
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut rows = self.rows.write().await;
        let removed = rows.len();
        rows.clear();
        Ok(removed)
    }
}
