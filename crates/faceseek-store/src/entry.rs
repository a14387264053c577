//! Cache entry model and versioned payload codec.
//!
//! Entries persist as JSON tagged with `schema_version`. Version 1 is the
//! legacy layout that stored bare embedding vectors only; version 2 stores
//! full face records. Upgrading a v1 payload fills the fields it never had
//! (`bbox`, `score`) with `None` — defaults are explicit, never fabricated.

use chrono::{DateTime, Utc};
use faceseek_core::{DetectedFace, Embedding, FaceRecord};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Persisted face records for one source image.
///
/// At most one entry exists per [`SourceKey`](crate::SourceKey); entries are
/// immutable once written except for explicit overwrite, cleanup removal,
/// or schema migration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Detected faces in detection order. Empty is valid: "no face found"
    /// is a real, cacheable result.
    pub faces: Vec<FaceRecord>,
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Build a fresh current-schema entry from a provider result.
    pub fn from_detections(detections: Vec<DetectedFace>) -> Self {
        let now = Utc::now();
        CacheEntry {
            faces: FaceRecord::from_detections(detections),
            schema_version: CURRENT_SCHEMA_VERSION,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_current(&self) -> bool {
        self.schema_version == CURRENT_SCHEMA_VERSION
    }
}

/// Decoded on-disk payload, one variant per known schema version.
#[derive(Debug, PartialEq)]
pub enum VersionedPayload {
    /// Legacy: embeddings only, no detection metadata.
    V1 { embeddings: Vec<Vec<f32>> },
    V2 { faces: Vec<FaceRecord> },
}

impl VersionedPayload {
    pub fn version(&self) -> u32 {
        match self {
            VersionedPayload::V1 { .. } => 1,
            VersionedPayload::V2 { .. } => 2,
        }
    }

    /// Upgrade to the current face-record layout.
    pub fn into_faces(self) -> Vec<FaceRecord> {
        match self {
            VersionedPayload::V1 { embeddings } => embeddings
                .into_iter()
                .enumerate()
                .map(|(index, values)| FaceRecord {
                    index,
                    bbox: None,
                    score: None,
                    embedding: Embedding::new(values),
                })
                .collect(),
            VersionedPayload::V2 { faces } => faces,
        }
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    schema_version: u32,
}

#[derive(Serialize, Deserialize)]
struct PayloadV1 {
    schema_version: u32,
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize, Deserialize)]
struct PayloadV2 {
    schema_version: u32,
    faces: Vec<FaceRecord>,
}

/// Serialize faces as a current-schema payload.
pub fn encode_current(faces: &[FaceRecord]) -> Result<String, StoreError> {
    let payload = PayloadV2 {
        schema_version: CURRENT_SCHEMA_VERSION,
        faces: faces.to_vec(),
    };
    Ok(serde_json::to_string(&payload)?)
}

/// Parse a payload of any known schema version.
pub fn decode(payload: &str) -> Result<VersionedPayload, StoreError> {
    let probe: VersionProbe = serde_json::from_str(payload)?;
    match probe.schema_version {
        1 => {
            let v1: PayloadV1 = serde_json::from_str(payload)?;
            Ok(VersionedPayload::V1 { embeddings: v1.embeddings })
        }
        2 => {
            let v2: PayloadV2 = serde_json::from_str(payload)?;
            Ok(VersionedPayload::V2 { faces: v2.faces })
        }
        other => Err(StoreError::UnknownSchema(other)),
    }
}
