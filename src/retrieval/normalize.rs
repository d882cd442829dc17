//! Per-request min-max score normalization

use crate::retrieval::{NormalizedHit, RetrievalHit};

/// Rescale one backend's hits into [0, 1] using the min and max of this batch.
///
/// The batch must hold every hit collected for that backend in the current
/// request, across all of its sub-queries, so normalized scores stay
/// comparable between sub-queries. A batch with a single distinct score maps
/// to 1.0. Hits with non-finite scores are dropped.
pub fn normalize_hits(hits: Vec<RetrievalHit>) -> Vec<NormalizedHit> {
    let (finite, non_finite): (Vec<_>, Vec<_>) =
        hits.into_iter().partition(|h| h.raw_score.is_finite());

    if !non_finite.is_empty() {
        tracing::warn!("Dropping {} hits with non-finite scores", non_finite.len());
    }

    let Some(min) = finite.iter().map(|h| h.raw_score).reduce(f32::min) else {
        return Vec::new();
    };
    let max = finite
        .iter()
        .map(|h| h.raw_score)
        .fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    finite
        .into_iter()
        .map(|hit| {
            let score = if range > 0.0 {
                ((hit.raw_score - min) / range).clamp(0.0, 1.0)
            } else {
                1.0
            };
            NormalizedHit {
                chunk_id: hit.chunk_id,
                score,
                text: hit.text,
                metadata: hit.metadata,
            }
        })
        .collect()
}
