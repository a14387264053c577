//! Target face selection.
//!
//! A find request names which face(s) in the target image to search for:
//! all of them, the largest, the highest-confidence one, or explicit
//! indices (negative indices count from the end, Python-style).

use serde::de::{self, Deserializer};
use serde::Deserialize;
use thiserror::Error;

use crate::types::FaceRecord;

/// Which face(s) of the target image participate in matching.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TargetPolicy {
    /// Every detected face, in detection order.
    #[default]
    All,
    /// The face with the largest bounding-box area.
    Largest,
    /// The face with the highest detection score.
    Best,
    /// A single face by index; negative resolves as `len + i`.
    Index(i64),
    /// Several faces by index; duplicates collapse, order is preserved.
    Indices(Vec<i64>),
}

#[derive(Error, Debug, PartialEq)]
pub enum SelectorError {
    #[error("face index {index} out of range for {len} detected face(s)")]
    OutOfRange { index: i64, len: usize },
    #[error("target face policy '{policy}' requires at least one detected face")]
    NoFaces { policy: &'static str },
}

/// Resolve a policy against an image's face list, returning face indices.
///
/// `All` on a zero-face image returns an empty selection — the degenerate
/// "no target face" case, which downstream turns into zero matches rather
/// than an error. Every other policy on zero faces fails, as does any
/// explicit index that falls outside `[0, len)` after negative resolution.
pub fn select(faces: &[FaceRecord], policy: &TargetPolicy) -> Result<Vec<usize>, SelectorError> {
    let len = faces.len();

    if len == 0 {
        return match policy {
            TargetPolicy::All => Ok(Vec::new()),
            TargetPolicy::Largest => Err(SelectorError::NoFaces { policy: "largest" }),
            TargetPolicy::Best => Err(SelectorError::NoFaces { policy: "best" }),
            TargetPolicy::Index(i) => Err(SelectorError::OutOfRange { index: *i, len }),
            TargetPolicy::Indices(is) => Err(SelectorError::OutOfRange {
                index: is.first().copied().unwrap_or(0),
                len,
            }),
        };
    }

    match policy {
        TargetPolicy::All => Ok((0..len).collect()),
        TargetPolicy::Largest => {
            let mut best_idx = 0;
            let mut best_area = f32::NEG_INFINITY;
            for (i, face) in faces.iter().enumerate() {
                // Missing bbox (legacy v1 records) counts as zero area.
                let area = face.bbox.map(|b| b.area()).unwrap_or(0.0);
                if area > best_area {
                    best_area = area;
                    best_idx = i;
                }
            }
            Ok(vec![best_idx])
        }
        TargetPolicy::Best => {
            let mut best_idx = 0;
            let mut best_score = f32::NEG_INFINITY;
            for (i, face) in faces.iter().enumerate() {
                // Missing score ranks below every real detector score.
                let score = face.score.unwrap_or(-1.0);
                if score > best_score {
                    best_score = score;
                    best_idx = i;
                }
            }
            Ok(vec![best_idx])
        }
        TargetPolicy::Index(i) => Ok(vec![resolve_index(*i, len)?]),
        TargetPolicy::Indices(indices) => {
            let mut resolved = Vec::with_capacity(indices.len());
            for &i in indices {
                let idx = resolve_index(i, len)?;
                if !resolved.contains(&idx) {
                    resolved.push(idx);
                }
            }
            Ok(resolved)
        }
    }
}

/// Resolve a possibly-negative index against `len`, Python-style.
fn resolve_index(index: i64, len: usize) -> Result<usize, SelectorError> {
    let len_i = len as i64;
    if index >= -len_i && index < len_i {
        let resolved = if index < 0 { index + len_i } else { index };
        Ok(resolved as usize)
    } else {
        Err(SelectorError::OutOfRange { index, len })
    }
}

/// Wire shapes accepted for a policy: `"all" | "largest" | "best" | 3 | [0, 2]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PolicyWire {
    Index(i64),
    Indices(Vec<i64>),
    Name(String),
}

impl<'de> Deserialize<'de> for TargetPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match PolicyWire::deserialize(deserializer)? {
            PolicyWire::Index(i) => Ok(TargetPolicy::Index(i)),
            PolicyWire::Indices(is) => Ok(TargetPolicy::Indices(is)),
            PolicyWire::Name(name) => match name.as_str() {
                "all" => Ok(TargetPolicy::All),
                "largest" => Ok(TargetPolicy::Largest),
                "best" => Ok(TargetPolicy::Best),
                other => Err(de::Error::custom(format!(
                    "unknown target face policy '{other}' (expected all, largest, best, an index or an index list)"
                ))),
            },
        }
    }
}
