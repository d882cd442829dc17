//! Min-score cutoff and final top-k truncation

use crate::retrieval::{rank_order, RankedResult};

/// Outcome of thresholding
#[derive(Debug)]
pub struct Filtered {
    pub results: Vec<RankedResult>,
    /// Candidates dropped for scoring below `min_score`
    pub below_threshold: usize,
}

/// Keep results with an authoritative score of at least `min_score`, ordered
/// by score descending with chunk_id tiebreak, and truncated to `final_top_k`
pub fn threshold_top_k(
    mut results: Vec<RankedResult>,
    min_score: f32,
    final_top_k: usize,
) -> Filtered {
    let before = results.len();
    results.retain(|r| r.score >= min_score);
    let below_threshold = before - results.len();

    results.sort_by(|a, b| rank_order(a.score, &a.chunk_id, b.score, &b.chunk_id));
    results.truncate(final_top_k);

    Filtered {
        results,
        below_threshold,
    }
}
