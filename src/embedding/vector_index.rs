/// HNSW vector index for similarity search
use hnsw_rs::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Upper bound on HNSW layers
const MAX_LAYER: usize = 16;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Index is full: capacity {0}")]
    CapacityExceeded(usize),
}

/// One nearest neighbour
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Chunk `seq` the vector was inserted under
    pub seq: u64,
    /// Cosine similarity, higher is more similar
    pub score: f32,
}

/// HNSW vector index wrapper
///
/// Approximate nearest neighbour search under cosine distance. Vectors
/// from every domain share one graph; callers filter by domain after lookup.
pub struct VectorIndex {
    index: Hnsw<'static, f32, DistCosine>,
    dimension: usize,
    capacity: usize,
    count: AtomicU64,
}

impl VectorIndex {
    /// Create an empty index
    ///
    /// # Arguments
    /// * `dimension` - Vector dimension (must match embedding dimension)
    /// * `ef_construction` - HNSW construction parameter (higher = better recall, slower build)
    /// * `m` - Max connections per node per layer
    /// * `max_elements` - Capacity hint for the graph
    pub fn new(
        dimension: usize,
        ef_construction: usize,
        m: usize,
        max_elements: usize,
    ) -> Result<Self, VectorIndexError> {
        if dimension == 0 || m == 0 || max_elements == 0 {
            return Err(VectorIndexError::InitializationError(format!(
                "dimension, m and max_elements must be positive (got {}, {}, {})",
                dimension, m, max_elements
            )));
        }

        let index = Hnsw::<f32, DistCosine>::new(m, max_elements, MAX_LAYER, ef_construction, DistCosine);

        Ok(Self {
            index,
            dimension,
            capacity: max_elements,
            count: AtomicU64::new(0),
        })
    }

    /// Check that `vector` would be accepted by [`insert`](Self::insert)
    pub fn check_insertable(&self, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if self.len() as usize >= self.capacity {
            return Err(VectorIndexError::CapacityExceeded(self.capacity));
        }
        Ok(())
    }

    /// Insert a chunk embedding under its `seq`
    pub fn insert(&self, seq: u64, vector: &[f32]) -> Result<(), VectorIndexError> {
        self.check_insertable(vector)?;

        self.index.insert((vector, seq as usize));
        self.count.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    /// Search for the k nearest neighbours, most similar first
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<SearchResult>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let results = self
            .index
            .search(query, k, ef_search.max(k))
            .into_iter()
            .map(|neighbour| SearchResult {
                seq: neighbour.d_id as u64,
                score: 1.0 - neighbour.distance,
            })
            .collect();

        Ok(results)
    }

    /// Number of vectors in the index
    pub fn len(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
