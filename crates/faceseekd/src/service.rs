//! The face search service: embed, find, inspect and cache maintenance.
//!
//! Every public operation returns either a complete report or a tagged
//! [`ServiceError`]; batch operations isolate failures per item.

use std::collections::HashMap;
use std::sync::Arc;

use faceseek_core::{rank, select, BBox, FaceRecord, ScopeImage, TargetPolicy};
use faceseek_store::{CacheEntry, CacheStats, CacheStore, CleanupReport, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetch::ImageSource;
use crate::provider::FaceAnalyzer;

/// Coarse failure classification carried on every error reply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    ProviderFailure,
    NotFound,
    StoreIo,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Provider(String),
    #[error("no cached entry for '{0}'")]
    NotFound(String),
    #[error("cache store failure: {0}")]
    Store(StoreError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::InvalidInput(_) => ErrorKind::InvalidInput,
            ServiceError::Provider(_) => ErrorKind::ProviderFailure,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Store(_) => ErrorKind::StoreIo,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Provider(source) => ServiceError::Provider(source.to_string()),
            other => ServiceError::Store(other),
        }
    }
}

#[derive(Error, Debug)]
enum ComputeError {
    #[error("{0}")]
    Fetch(#[from] crate::fetch::FetchError),
    #[error("{0}")]
    Analyze(#[from] crate::provider::ProviderError),
}

/// Per-source outcome of a batch embed.
#[derive(Debug, Serialize)]
pub struct EmbedItem {
    pub identifier: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_faces: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EmbedReport {
    pub results: Vec<EmbedItem>,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Deserialize)]
pub struct FindRequest {
    pub target: String,
    #[serde(default)]
    pub scope: Vec<String>,
    pub threshold: Option<f32>,
    #[serde(default)]
    pub policy: TargetPolicy,
    #[serde(default)]
    pub include_details: bool,
    /// `None` falls back to the configured default; a value ≤ 0 means
    /// explicitly unlimited.
    pub max_results: Option<i64>,
}

/// One assigned target/scope face pair, with detection metadata for both sides.
#[derive(Debug, Serialize)]
pub struct PairDetail {
    pub target_index: usize,
    pub scope_index: usize,
    pub similarity: f32,
    pub target_bbox: Option<BBox>,
    pub target_score: Option<f32>,
    pub scope_bbox: Option<BBox>,
    pub scope_score: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct MatchReport {
    pub identifier: String,
    /// Best assigned pair similarity for this image.
    pub similarity: f32,
    pub matching_faces: usize,
    pub target_faces_found: usize,
    pub target_face_indices: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_faces_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_matches: Option<Vec<PairDetail>>,
}

/// A scope image that could not be analyzed; the search continued without it.
#[derive(Debug, Serialize)]
pub struct SkippedSource {
    pub identifier: String,
    pub kind: ErrorKind,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct TargetFaceInfo {
    pub index: usize,
    pub bbox: Option<BBox>,
    pub score: Option<f32>,
    pub selected: bool,
}

#[derive(Debug, Serialize)]
pub struct FindReport {
    pub target: String,
    pub threshold: f32,
    pub target_faces_total: usize,
    pub selected_target_indices: Vec<usize>,
    pub matches: Vec<MatchReport>,
    pub skipped: Vec<SkippedSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_summary: Option<Vec<TargetFaceInfo>>,
}

#[derive(Debug, Serialize)]
pub struct FaceInfo {
    pub index: usize,
    pub bbox: Option<BBox>,
    pub score: Option<f32>,
    pub embedding_dim: usize,
}

#[derive(Debug, Serialize)]
pub struct InspectReport {
    pub identifier: String,
    pub faces_count: usize,
    pub faces: Vec<FaceInfo>,
    pub schema_version: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// The face search service. Owns the cache store plus the analyzer and
/// image-source adapters; all matching is delegated to `faceseek-core`.
pub struct FaceSeek {
    store: CacheStore,
    analyzer: Arc<dyn FaceAnalyzer>,
    source: Arc<dyn ImageSource>,
    default_threshold: f32,
    default_max_results: usize,
}

impl FaceSeek {
    pub fn new(
        store: CacheStore,
        analyzer: Arc<dyn FaceAnalyzer>,
        source: Arc<dyn ImageSource>,
        default_threshold: f32,
        default_max_results: usize,
    ) -> Self {
        Self {
            store,
            analyzer,
            source,
            default_threshold,
            default_max_results,
        }
    }

    /// Cached entry for `identifier`, fetching and analyzing on a miss.
    async fn entry_for(&self, identifier: &str) -> Result<CacheEntry, ServiceError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(ServiceError::InvalidInput(
                "empty source identifier".to_string(),
            ));
        }

        let source = self.source.clone();
        let analyzer = self.analyzer.clone();
        let id = identifier.to_string();
        let entry = self
            .store
            .get_or_compute(identifier, || async move {
                let bytes = source.fetch(&id).await?;
                let faces = analyzer.detect_and_embed(&bytes).await?;
                Ok::<_, ComputeError>(faces)
            })
            .await?;
        Ok(entry)
    }

    /// Analyze and cache each source independently; one failure never
    /// aborts its siblings.
    pub async fn embed(&self, sources: &[String]) -> EmbedReport {
        let mut results = Vec::with_capacity(sources.len());
        let mut succeeded = 0;
        let mut failed = 0;

        for identifier in sources {
            match self.entry_for(identifier).await {
                Ok(entry) => {
                    succeeded += 1;
                    results.push(EmbedItem {
                        identifier: identifier.clone(),
                        success: true,
                        num_faces: Some(entry.faces.len()),
                        kind: None,
                        error: None,
                    });
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(identifier, error = %e, "embed failed for source");
                    results.push(EmbedItem {
                        identifier: identifier.clone(),
                        success: false,
                        num_faces: None,
                        kind: Some(e.kind()),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        tracing::info!(succeeded, failed, "embed batch finished");
        EmbedReport { results, succeeded, failed }
    }

    /// Search the scope images for the target's face(s).
    ///
    /// Fails wholesale only on invalid input or an unresolvable target;
    /// scope images that cannot be analyzed are skipped with the reason
    /// attached.
    pub async fn find_in(&self, req: FindRequest) -> Result<FindReport, ServiceError> {
        let threshold = req.threshold.unwrap_or(self.default_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ServiceError::InvalidInput(format!(
                "threshold {threshold} outside [0, 1]"
            )));
        }

        let limit = match req.max_results {
            Some(n) if n > 0 => Some(n as usize),
            Some(_) => None,
            None if self.default_max_results > 0 => Some(self.default_max_results),
            None => None,
        };

        let target_entry = self.entry_for(&req.target).await?;
        let selected = select(&target_entry.faces, &req.policy)
            .map_err(|e| ServiceError::InvalidInput(e.to_string()))?;
        let selected_faces: Vec<FaceRecord> = selected
            .iter()
            .map(|&i| target_entry.faces[i].clone())
            .collect();

        tracing::info!(
            target = %req.target,
            threshold,
            scope = req.scope.len(),
            selected = selected.len(),
            "find started"
        );

        let mut resolved: Vec<(String, CacheEntry)> = Vec::new();
        let mut skipped = Vec::new();
        for identifier in &req.scope {
            match self.entry_for(identifier).await {
                Ok(entry) => resolved.push((identifier.clone(), entry)),
                Err(e) => {
                    tracing::warn!(identifier, error = %e, "skipping scope image");
                    skipped.push(SkippedSource {
                        identifier: identifier.clone(),
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let scope_images: Vec<ScopeImage<'_>> = resolved
            .iter()
            .map(|(identifier, entry)| ScopeImage {
                identifier,
                faces: &entry.faces,
            })
            .collect();
        let ranked = rank(&selected_faces, &scope_images, threshold, limit);

        let target_by_index: HashMap<usize, &FaceRecord> =
            target_entry.faces.iter().map(|f| (f.index, f)).collect();
        let scope_by_id: HashMap<&str, &[FaceRecord]> = resolved
            .iter()
            .map(|(identifier, entry)| (identifier.as_str(), entry.faces.as_slice()))
            .collect();

        let matches = ranked
            .into_iter()
            .map(|m| {
                let detailed_matches = req.include_details.then(|| {
                    let scope_faces = scope_by_id.get(m.identifier.as_str()).copied();
                    m.outcome
                        .pairs
                        .iter()
                        .map(|pair| {
                            let target = target_by_index.get(&pair.target_index);
                            let scope_face = scope_faces
                                .and_then(|faces| faces.iter().find(|f| f.index == pair.scope_index));
                            PairDetail {
                                target_index: pair.target_index,
                                scope_index: pair.scope_index,
                                similarity: pair.similarity,
                                target_bbox: target.and_then(|f| f.bbox),
                                target_score: target.and_then(|f| f.score),
                                scope_bbox: scope_face.and_then(|f| f.bbox),
                                scope_score: scope_face.and_then(|f| f.score),
                            }
                        })
                        .collect()
                });
                MatchReport {
                    identifier: m.identifier,
                    similarity: m.outcome.image_similarity,
                    matching_faces: m.outcome.pairs.len(),
                    target_faces_found: m.outcome.target_faces_found,
                    target_face_indices: m.outcome.target_face_indices.clone(),
                    scope_faces_count: req.include_details.then_some(m.scope_faces_count),
                    detailed_matches,
                }
            })
            .collect();

        let target_summary = req.include_details.then(|| {
            target_entry
                .faces
                .iter()
                .map(|f| TargetFaceInfo {
                    index: f.index,
                    bbox: f.bbox,
                    score: f.score,
                    selected: selected.contains(&f.index),
                })
                .collect()
        });

        Ok(FindReport {
            target: req.target,
            threshold,
            target_faces_total: target_entry.faces.len(),
            selected_target_indices: selected,
            matches,
            skipped,
            target_summary,
        })
    }

    /// Face metadata for one source. With `cached_only`, a miss is
    /// [`ServiceError::NotFound`] instead of triggering analysis.
    pub async fn inspect(
        &self,
        identifier: &str,
        cached_only: bool,
    ) -> Result<InspectReport, ServiceError> {
        let entry = if cached_only {
            self.store
                .get(identifier)
                .await?
                .ok_or_else(|| ServiceError::NotFound(identifier.to_string()))?
        } else {
            self.entry_for(identifier).await?
        };

        Ok(InspectReport {
            identifier: identifier.to_string(),
            faces_count: entry.faces.len(),
            faces: entry
                .faces
                .iter()
                .map(|f| FaceInfo {
                    index: f.index,
                    bbox: f.bbox,
                    score: f.score,
                    embedding_dim: f.embedding.values.len(),
                })
                .collect(),
            schema_version: entry.schema_version,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        })
    }

    pub async fn cache_stats(&self) -> Result<CacheStats, ServiceError> {
        Ok(self.store.stats().await?)
    }

    pub async fn cache_clear(&self) -> Result<usize, ServiceError> {
        Ok(self.store.clear().await?)
    }

    /// Remove cache entries whose sources are confirmed gone. Sources that
    /// cannot be probed are kept.
    pub async fn cache_cleanup(&self) -> Result<CleanupReport, ServiceError> {
        let source = self.source.clone();
        let report = self
            .store
            .cleanup(move |identifier, _entry| {
                let source = source.clone();
                async move {
                    source
                        .probe(&identifier)
                        .await
                        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
                }
            })
            .await?;
        Ok(report)
    }
}
