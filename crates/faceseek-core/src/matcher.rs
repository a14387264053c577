//! Greedy one-to-one assignment of target faces to scope faces.
//!
//! Every (target, scope) pair is scored by cosine similarity, sorted
//! descending, and assigned greedily so that each face on either side
//! participates in at most one pair. This is deliberately not max-weight
//! bipartite matching: consumers depend on the documented greedy output
//! being deterministic, not on global optimality.

use std::collections::HashSet;

use crate::types::{FaceRecord, MatchPair};

/// Result of matching selected target faces against one scope image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    /// Assigned pairs in descending similarity order.
    pub pairs: Vec<MatchPair>,
    /// Highest similarity among assigned pairs, 0.0 when nothing matched.
    pub image_similarity: f32,
    /// Number of distinct target faces that found a partner.
    pub target_faces_found: usize,
    /// Sorted indices of those target faces.
    pub target_face_indices: Vec<usize>,
}

/// Match `targets` against `scope` with the given similarity threshold.
///
/// Pair enumeration is exhaustive; ordering is descending similarity with
/// ties broken by ascending `(target_index, scope_index)`, so identical
/// inputs always produce identical output regardless of iteration order.
/// The greedy walk never stops early: a target skipped at a high-similarity
/// pair may still pair with a lower-ranked scope face.
///
/// Empty `targets` or `scope` yields an empty outcome, not an error.
/// `threshold` is assumed validated to [0, 1] by the caller.
pub fn match_faces(targets: &[FaceRecord], scope: &[FaceRecord], threshold: f32) -> MatchOutcome {
    let mut candidates: Vec<MatchPair> = Vec::with_capacity(targets.len() * scope.len());
    for t in targets {
        for s in scope {
            candidates.push(MatchPair {
                target_index: t.index,
                scope_index: s.index,
                similarity: t.embedding.similarity(&s.embedding),
            });
        }
    }

    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                (a.target_index, a.scope_index).cmp(&(b.target_index, b.scope_index))
            })
    });

    let mut used_targets: HashSet<usize> = HashSet::new();
    let mut used_scope: HashSet<usize> = HashSet::new();
    let mut pairs = Vec::new();

    for pair in candidates {
        if pair.similarity < threshold {
            // Sorted descending: no later pair can pass the threshold either.
            break;
        }
        if used_targets.contains(&pair.target_index) || used_scope.contains(&pair.scope_index) {
            continue;
        }
        used_targets.insert(pair.target_index);
        used_scope.insert(pair.scope_index);
        pairs.push(pair);
    }

    // Walk order is descending, so the first assigned pair carries the max.
    let image_similarity = pairs.first().map(|p| p.similarity).unwrap_or(0.0);
    let mut target_face_indices: Vec<usize> = used_targets.into_iter().collect();
    target_face_indices.sort_unstable();

    MatchOutcome {
        image_similarity,
        target_faces_found: target_face_indices.len(),
        target_face_indices,
        pairs,
    }
}
