//! Retriever adapters over the pre-populated indexes
//!
//! Each adapter answers one sub-query: `search(text, domain, k)` returns at
//! most `k` chunks of that domain, best first, carrying the backend's raw
//! score. Index, store and model calls are synchronous and run under
//! `spawn_blocking`. An aborted sub-query stops awaiting that work; the
//! blocking call itself runs to completion and its result is dropped.

use crate::config::RetrievalConfig;
use crate::embedding::{
    EmbeddingError, EmbeddingProvider, KeywordIndex, KeywordIndexError, VectorIndex,
    VectorIndexError,
};
use crate::error::RagError;
use crate::retrieval::{Backend, RetrievedChunk};
use crate::storage::Database;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error("Embedding generation failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector search failed: {0}")]
    VectorSearch(#[from] VectorIndexError),

    #[error("Keyword search failed: {0}")]
    KeywordSearch(#[from] KeywordIndexError),

    #[error("Chunk store error: {0}")]
    Store(#[from] RagError),

    #[error("Retriever task failed: {0}")]
    Task(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// One retrieval backend
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Which side of the fusion this backend feeds
    fn backend(&self) -> Backend;

    /// Top `k` chunks of `domain` for `text`, best first
    async fn search(
        &self,
        text: &str,
        domain: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrieverError>;
}

/// Map index hits back to chunk rows, keeping index order
///
/// Hits outside `domain` or missing from the store are skipped.
fn hydrate(
    database: &Database,
    domain: &str,
    scored: Vec<(u64, f32)>,
    k: usize,
) -> Result<Vec<RetrievedChunk>, RetrieverError> {
    let seqs: Vec<i64> = scored.iter().map(|(seq, _)| *seq as i64).collect();
    let mut rows = database.get_chunks(domain, &seqs)?;

    let chunks = scored
        .into_iter()
        .filter_map(|(seq, raw_score)| {
            rows.remove(&(seq as i64)).map(|row| RetrievedChunk {
                chunk_id: row.chunk_id,
                raw_score,
                text: row.content,
                metadata: row.metadata,
            })
        })
        .take(k)
        .collect();

    Ok(chunks)
}

/// Semantic search: embed the query, walk the HNSW graph, hydrate
pub struct DenseRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    database: Arc<Database>,
    search_multiplier: usize,
    ef_search: usize,
}

impl DenseRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        database: Arc<Database>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            database,
            search_multiplier: config.search_multiplier.max(1),
            ef_search: config.hnsw_ef_search,
        }
    }
}

#[async_trait]
impl Retriever for DenseRetriever {
    fn backend(&self) -> Backend {
        Backend::Dense
    }

    async fn search(
        &self,
        text: &str,
        domain: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrieverError> {
        let embedder = self.embedder.clone();
        let index = self.index.clone();
        let database = self.database.clone();
        let text = text.to_string();
        let domain = domain.to_string();
        // The graph spans every domain; fetch extra so filtering still leaves k
        let fetch = k.saturating_mul(self.search_multiplier);
        let ef_search = self.ef_search;

        tokio::task::spawn_blocking(move || {
            let query = embedder.embed(&text)?;
            let neighbours = index.search(&query, fetch, ef_search)?;
            tracing::debug!(
                "Dense search returned {} neighbours for {:?}",
                neighbours.len(),
                text
            );

            let scored = neighbours.into_iter().map(|n| (n.seq, n.score)).collect();
            hydrate(&database, &domain, scored, k)
        })
        .await
        .map_err(|e| RetrieverError::Task(e.to_string()))?
    }
}

/// Keyword search: domain-scoped BM25, hydrate
pub struct SparseRetriever {
    index: Arc<RwLock<KeywordIndex>>,
    database: Arc<Database>,
}

impl SparseRetriever {
    pub fn new(index: Arc<RwLock<KeywordIndex>>, database: Arc<Database>) -> Self {
        Self { index, database }
    }
}

#[async_trait]
impl Retriever for SparseRetriever {
    fn backend(&self) -> Backend {
        Backend::Sparse
    }

    async fn search(
        &self,
        text: &str,
        domain: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrieverError> {
        let index = self.index.clone();
        let database = self.database.clone();
        let text = text.to_string();
        let domain = domain.to_string();

        tokio::task::spawn_blocking(move || {
            let matches = index.blocking_read().search(&text, &domain, k)?;
            tracing::debug!("Keyword search returned {} matches for {:?}", matches.len(), text);

            let scored = matches.into_iter().map(|m| (m.seq, m.score)).collect();
            hydrate(&database, &domain, scored, k)
        })
        .await
        .map_err(|e| RetrieverError::Task(e.to_string()))?
    }
}
