//! Ranking of candidate images by their best face match.

use crate::matcher::{match_faces, MatchOutcome};
use crate::types::FaceRecord;

/// A candidate image's faces together with its caller-supplied identifier.
#[derive(Debug, Clone, Copy)]
pub struct ScopeImage<'a> {
    pub identifier: &'a str,
    pub faces: &'a [FaceRecord],
}

/// One candidate image's aggregated match result. Ephemeral — derived per
/// request, never persisted.
#[derive(Debug, Clone)]
pub struct ScopeMatch {
    pub identifier: String,
    pub scope_faces_count: usize,
    pub outcome: MatchOutcome,
}

/// Run the matching engine over every scope image and rank the results.
///
/// Images with zero assigned pairs are dropped. Remaining images sort
/// descending by `image_similarity`; the sort is stable, so equal scores
/// keep their original scope-list order. `max_results` of `None` means no
/// limit (callers map non-positive requested limits to `None`); `Some(n)`
/// truncates to the top `n`.
pub fn rank(
    targets: &[FaceRecord],
    scope: &[ScopeImage<'_>],
    threshold: f32,
    max_results: Option<usize>,
) -> Vec<ScopeMatch> {
    let mut matches: Vec<ScopeMatch> = scope
        .iter()
        .filter_map(|image| {
            let outcome = match_faces(targets, image.faces, threshold);
            if outcome.pairs.is_empty() {
                tracing::debug!(identifier = image.identifier, "no match in scope image");
                return None;
            }
            Some(ScopeMatch {
                identifier: image.identifier.to_string(),
                scope_faces_count: image.faces.len(),
                outcome,
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        b.outcome
            .image_similarity
            .partial_cmp(&a.outcome.image_similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if let Some(limit) = max_results {
        matches.truncate(limit);
    }

    matches
}
