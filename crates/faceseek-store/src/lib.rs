//! faceseek-store — Content-addressed embedding cache.
//!
//! Maps a [`SourceKey`] (hash of an image URL or path) to a [`CacheEntry`]
//! holding that image's face records, so embeddings are computed at most
//! once per source. Persistence goes through the [`CacheBackend`] trait:
//! SQLite in production, an in-memory map in tests.

pub mod backend;
pub mod entry;
pub mod key;
pub mod sqlite;
pub mod store;

pub use backend::{CacheBackend, MemoryBackend, StoredRow};
pub use entry::{CacheEntry, CURRENT_SCHEMA_VERSION};
pub use key::SourceKey;
pub use sqlite::SqliteBackend;
pub use store::{CacheStats, CacheStore, CleanupReport, MigrateReport, StoreError};
