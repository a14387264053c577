//! SQLite cache backend.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;

use crate::backend::{CacheBackend, StoredRow};
use crate::key::SourceKey;
use crate::store::StoreError;

/// SQLite-backed cache storage. One row per source key; the payload column
/// holds the versioned JSON entry.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).await?;
        conn.call(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS entries (
                    source_key     TEXT PRIMARY KEY,
                    identifier     TEXT NOT NULL,
                    payload        TEXT NOT NULL,
                    schema_version INTEGER NOT NULL,
                    num_faces      INTEGER NOT NULL,
                    created_at     INTEGER NOT NULL,
                    updated_at     INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_entries_updated_at ON entries(updated_at);
                "#,
            )?;
            Ok(())
        })
        .await?;

        tracing::info!(path = %path.display(), "cache database opened");
        Ok(Self { conn })
    }
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> Result<StoredRow, rusqlite::Error> {
    Ok(StoredRow {
        source_key: row.get("source_key")?,
        identifier: row.get("identifier")?,
        payload: row.get("payload")?,
        schema_version: row.get("schema_version")?,
        num_faces: row.get::<_, i64>("num_faces")? as usize,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    async fn get(&self, key: &SourceKey) -> Result<Option<StoredRow>, StoreError> {
        let key = key.as_str().to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        r#"
                        SELECT source_key, identifier, payload, schema_version,
                               num_faces, created_at, updated_at
                        FROM entries WHERE source_key = ?1
                        "#,
                        params![key],
                        row_from_sql,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(row)
    }

    async fn put(&self, row: StoredRow) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO entries
                        (source_key, identifier, payload, schema_version,
                         num_faces, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(source_key) DO UPDATE SET
                        identifier = excluded.identifier,
                        payload = excluded.payload,
                        schema_version = excluded.schema_version,
                        num_faces = excluded.num_faces,
                        updated_at = excluded.updated_at
                    "#,
                    params![
                        row.source_key,
                        row.identifier,
                        row.payload,
                        row.schema_version,
                        row.num_faces as i64,
                        row.created_at,
                        row.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &SourceKey) -> Result<bool, StoreError> {
        let key = key.as_str().to_string();
        let affected = self
            .conn
            .call(move |conn| {
                let affected =
                    conn.execute("DELETE FROM entries WHERE source_key = ?1", params![key])?;
                Ok(affected)
            })
            .await?;
        Ok(affected > 0)
    }

    async fn list(&self) -> Result<Vec<StoredRow>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT source_key, identifier, payload, schema_version,
                           num_faces, created_at, updated_at
                    FROM entries ORDER BY source_key
                    "#,
                )?;
                let rows = stmt
                    .query_map([], row_from_sql)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let removed = self
            .conn
            .call(|conn| {
                let removed = conn.execute("DELETE FROM entries", [])?;
                Ok(removed)
            })
            .await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(identifier: &str) -> StoredRow {
        let key = SourceKey::from_identifier(identifier);
        StoredRow {
            source_key: key.as_str().to_string(),
            identifier: identifier.to_string(),
            payload: r#"{"schema_version":2,"faces":[]}"#.to_string(),
            schema_version: 2,
            num_faces: 0,
            created_at: 1_700_000_000,
            updated_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_sqlite_roundtrip() {
        let dir = tempdir().unwrap();
        let backend = SqliteBackend::open(&dir.path().join("cache.db")).await.unwrap();

        let key = SourceKey::from_identifier("/img/a.jpg");
        assert!(backend.get(&key).await.unwrap().is_none());

        backend.put(row("/img/a.jpg")).await.unwrap();
        let fetched = backend.get(&key).await.unwrap().unwrap();
        assert_eq!(fetched.identifier, "/img/a.jpg");
        assert_eq!(fetched.schema_version, 2);

        assert!(backend.delete(&key).await.unwrap());
        assert!(!backend.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_upsert_keeps_created_at() {
        let dir = tempdir().unwrap();
        let backend = SqliteBackend::open(&dir.path().join("cache.db")).await.unwrap();

        let mut first = row("/img/a.jpg");
        first.created_at = 100;
        first.updated_at = 100;
        backend.put(first).await.unwrap();

        let mut second = row("/img/a.jpg");
        second.created_at = 999;
        second.updated_at = 200;
        second.num_faces = 3;
        backend.put(second).await.unwrap();

        let fetched = backend
            .get(&SourceKey::from_identifier("/img/a.jpg"))
            .await
            .unwrap()
            .unwrap();
        // Overwrite refreshes everything except the original creation time.
        assert_eq!(fetched.created_at, 100);
        assert_eq!(fetched.updated_at, 200);
        assert_eq!(fetched.num_faces, 3);
    }

    #[tokio::test]
    async fn test_sqlite_list_and_clear() {
        let dir = tempdir().unwrap();
        let backend = SqliteBackend::open(&dir.path().join("cache.db")).await.unwrap();

        backend.put(row("/img/a.jpg")).await.unwrap();
        backend.put(row("/img/b.jpg")).await.unwrap();
        assert_eq!(backend.list().await.unwrap().len(), 2);

        assert_eq!(backend.clear().await.unwrap(), 2);
        assert!(backend.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let backend = SqliteBackend::open(&path).await.unwrap();
            backend.put(row("/img/a.jpg")).await.unwrap();
        }

        let backend = SqliteBackend::open(&path).await.unwrap();
        let key = SourceKey::from_identifier("/img/a.jpg");
        assert!(backend.get(&key).await.unwrap().is_some());
    }
}
