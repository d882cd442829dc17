//! Weighted-sum fusion of dense and sparse scores

use crate::retrieval::{rank_order, MergedCandidate, NormalizedHit};
use ahash::AHashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FusionError {
    #[error("Invalid weight configuration: weights must be finite and non-negative, got dense={dense} sparse={sparse}")]
    InvalidWeights { dense: f32, sparse: f32 },

    #[error("Invalid weight configuration: dense and sparse weights are both zero")]
    ZeroWeights,
}

/// Fusion weights
///
/// The weights are independent multipliers and are not rescaled to sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    /// Weight for semantic results
    pub dense: f32,

    /// Weight for keyword results
    pub sparse: f32,
}

impl FusionWeights {
    pub fn new(dense: f32, sparse: f32) -> Result<Self, FusionError> {
        let valid = |w: f32| w.is_finite() && w >= 0.0;
        if !valid(dense) || !valid(sparse) {
            return Err(FusionError::InvalidWeights { dense, sparse });
        }
        if dense == 0.0 && sparse == 0.0 {
            return Err(FusionError::ZeroWeights);
        }

        if (dense + sparse - 1.0).abs() > 0.01 {
            tracing::debug!(
                "Fusion weights do not sum to 1.0 (dense={}, sparse={}); fused scores may exceed 1.0",
                dense,
                sparse
            );
        }

        Ok(Self { dense, sparse })
    }
}

/// Fuse deduplicated dense and sparse hits into one candidate list
///
/// `fused = dense_weight * dense + sparse_weight * sparse`, where a side that
/// did not hit the chunk contributes 0. Text and metadata come from the dense
/// hit when both exist. Output is sorted by fused score descending, chunk_id
/// ascending on ties.
pub fn fuse(
    dense: Vec<NormalizedHit>,
    sparse: Vec<NormalizedHit>,
    weights: &FusionWeights,
) -> Vec<MergedCandidate> {
    let mut index: AHashMap<String, usize> = AHashMap::with_capacity(dense.len() + sparse.len());
    let mut candidates: Vec<MergedCandidate> = Vec::with_capacity(dense.len() + sparse.len());

    for hit in dense {
        index.insert(hit.chunk_id.clone(), candidates.len());
        candidates.push(MergedCandidate {
            chunk_id: hit.chunk_id,
            dense_score: Some(hit.score),
            sparse_score: None,
            fused_score: 0.0,
            text: hit.text,
            metadata: hit.metadata,
        });
    }

    for hit in sparse {
        match index.get(&hit.chunk_id) {
            Some(&pos) => candidates[pos].sparse_score = Some(hit.score),
            None => {
                index.insert(hit.chunk_id.clone(), candidates.len());
                candidates.push(MergedCandidate {
                    chunk_id: hit.chunk_id,
                    dense_score: None,
                    sparse_score: Some(hit.score),
                    fused_score: 0.0,
                    text: hit.text,
                    metadata: hit.metadata,
                });
            }
        }
    }

    for candidate in &mut candidates {
        candidate.fused_score = weights.dense * candidate.dense_score.unwrap_or(0.0)
            + weights.sparse * candidate.sparse_score.unwrap_or(0.0);
    }

    candidates.sort_by(|a, b| rank_order(a.fused_score, &a.chunk_id, b.fused_score, &b.chunk_id));
    candidates
}
