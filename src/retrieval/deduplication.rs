//! Per-backend result deduplication by chunk ID

use crate::retrieval::NormalizedHit;
use ahash::AHashMap;

/// Hits of one backend collapsed to one entry per chunk
#[derive(Debug, Default)]
pub struct CollapsedHits {
    /// One hit per chunk, in first-seen order
    pub hits: Vec<NormalizedHit>,
    /// Number of duplicate hits folded into an existing entry
    pub collapsed: usize,
}

/// Collapse hits sharing a chunk_id to the one with the maximum normalized score
///
/// Scores are never summed; text and metadata stay with the first hit.
pub fn collapse_max(hits: Vec<NormalizedHit>) -> CollapsedHits {
    let mut index: AHashMap<String, usize> = AHashMap::with_capacity(hits.len());
    let mut out = CollapsedHits::default();

    for hit in hits {
        match index.get(&hit.chunk_id) {
            Some(&pos) => {
                out.collapsed += 1;
                let existing = &mut out.hits[pos];
                if hit.score > existing.score {
                    existing.score = hit.score;
                }
            }
            None => {
                index.insert(hit.chunk_id.clone(), out.hits.len());
                out.hits.push(hit);
            }
        }
    }

    out
}
