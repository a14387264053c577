use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box for a detected face, in source-image pixel
/// coordinates. Invariant: `x1 < x2` and `y1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    /// Box area in square pixels. Degenerate boxes clamp to 0.
    pub fn area(&self) -> f32 {
        let w = (self.x2 - self.x1).max(0.0);
        let h = (self.y2 - self.y1).max(0.0);
        w * h
    }
}

/// Face embedding vector (typically 512-dimensional), L2-normalized by the
/// embedding provider so cosine similarity reduces to a dot product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Cosine similarity between two embeddings, in [-1, 1].
    ///
    /// Divides by both norms so slightly denormalized vectors (e.g. from a
    /// lossy cache round-trip) still compare correctly; for unit vectors
    /// this is exactly the dot product.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// One face as returned by the embedding provider, before it has been
/// assigned a position within a cache entry.
///
/// `bbox` and `score` are optional because entries migrated from the legacy
/// cache schema carry embeddings only; the provider itself always fills both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: Option<BBox>,
    /// Detector confidence in [0, 1].
    pub score: Option<f32>,
    pub embedding: Embedding,
}

/// One face within a cached image. `index` is the face's position in the
/// image's detection order and is stable for the lifetime of the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub index: usize,
    pub bbox: Option<BBox>,
    pub score: Option<f32>,
    pub embedding: Embedding,
}

impl FaceRecord {
    /// Attach detection-order indices to a provider result.
    pub fn from_detections(detections: Vec<DetectedFace>) -> Vec<FaceRecord> {
        detections
            .into_iter()
            .enumerate()
            .map(|(index, f)| FaceRecord {
                index,
                bbox: f.bbox,
                score: f.score,
                embedding: f.embedding,
            })
            .collect()
    }
}

/// A single assigned (target face, scope face) pair. Ephemeral — derived per
/// request, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPair {
    pub target_index: usize,
    pub scope_index: usize,
    /// Cosine similarity of the two embeddings.
    pub similarity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_bbox_area() {
        let b = BBox { x1: 10.0, y1: 20.0, x2: 30.0, y2: 50.0 };
        assert!((b.area() - 600.0).abs() < 1e-6);
    }

    #[test]
    fn test_bbox_area_degenerate() {
        let b = BBox { x1: 30.0, y1: 20.0, x2: 10.0, y2: 50.0 };
        assert_eq!(b.area(), 0.0);
    }

    #[test]
    fn test_from_detections_assigns_indices() {
        let detections = vec![
            DetectedFace { bbox: None, score: Some(0.9), embedding: Embedding::new(vec![1.0]) },
            DetectedFace { bbox: None, score: Some(0.8), embedding: Embedding::new(vec![0.5]) },
        ];
        let records = FaceRecord::from_detections(detections);
        assert_eq!(records[0].index, 0);
        assert_eq!(records[1].index, 1);
    }
}
