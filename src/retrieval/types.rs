//! Request, hit, candidate and result structures

use crate::retrieval::SearchDiagnostics;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// Header used in formatted context when a chunk carries none
pub const DEFAULT_HEADER: &str = "Information";

/// Retrieval backend a query or hit belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Semantic search over embeddings
    Dense,
    /// Keyword search over the inverted index
    Sparse,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Dense => write!(f, "dense"),
            Backend::Sparse => write!(f, "sparse"),
        }
    }
}

/// One sub-query of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub kind: Backend,
}

impl Query {
    pub fn dense(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: Backend::Dense,
        }
    }

    pub fn sparse(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: Backend::Sparse,
        }
    }
}

/// Metadata stored alongside a chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Section header the chunk was cut from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,

    /// Source document reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Any other ingestion-time attributes
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl ChunkMetadata {
    pub fn with_header(header: impl Into<String>) -> Self {
        Self {
            header: Some(header.into()),
            ..Self::default()
        }
    }
}

/// A chunk as returned by a retriever adapter, before it is tagged with its backend
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub raw_score: f32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A retriever hit with its backend-native score
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalHit {
    pub chunk_id: String,
    pub raw_score: f32,
    pub backend: Backend,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl RetrievalHit {
    pub fn from_chunk(backend: Backend, chunk: RetrievedChunk) -> Self {
        Self {
            chunk_id: chunk.chunk_id,
            raw_score: chunk.raw_score,
            backend,
            text: chunk.text,
            metadata: chunk.metadata,
        }
    }
}

/// A hit whose score has been rescaled into [0, 1] within its backend batch
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedHit {
    pub chunk_id: String,
    pub score: f32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A chunk after per-backend dedup and cross-backend fusion
#[derive(Debug, Clone, PartialEq)]
pub struct MergedCandidate {
    pub chunk_id: String,
    pub dense_score: Option<f32>,
    pub sparse_score: Option<f32>,
    pub fused_score: f32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A final result with its authoritative score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub chunk_id: String,

    /// Rerank score when reranking ran, fused score otherwise
    pub score: f32,

    pub text: String,
    pub metadata: ChunkMetadata,

    pub fused_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl RankedResult {
    /// Promote a fused candidate with its fused score as authoritative
    pub fn from_fused(candidate: MergedCandidate) -> Self {
        Self {
            chunk_id: candidate.chunk_id,
            score: candidate.fused_score,
            text: candidate.text,
            metadata: candidate.metadata,
            fused_score: candidate.fused_score,
            dense_score: candidate.dense_score,
            sparse_score: candidate.sparse_score,
            rerank_score: None,
        }
    }

    /// Promote a fused candidate with a cross-encoder score as authoritative
    pub fn from_reranked(candidate: MergedCandidate, rerank_score: f32) -> Self {
        let mut result = Self::from_fused(candidate);
        result.score = rerank_score;
        result.rerank_score = Some(rerank_score);
        result
    }

    /// Header for formatted context
    pub fn header(&self) -> &str {
        self.metadata.header.as_deref().unwrap_or(DEFAULT_HEADER)
    }
}

/// Descending by score, then ascending by chunk_id
pub fn rank_order(a_score: f32, a_id: &str, b_score: f32, b_id: &str) -> Ordering {
    b_score.total_cmp(&a_score).then_with(|| a_id.cmp(b_id))
}

/// One retrieval request, produced by the query planner and resolved domain config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Domain slug; must be configured
    pub domain: String,

    /// Original user-facing question, scored against candidates by the reranker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Phrasings for semantic search
    pub vector_queries: Vec<String>,

    /// Keywords for full-text search
    pub fts_keywords: Vec<String>,

    pub top_k_per_query: usize,
    pub final_top_k: usize,
    pub min_score: f32,
    pub dense_weight: f32,
    pub sparse_weight: f32,
    pub use_reranker: bool,
}

impl SearchRequest {
    /// Attach the original question for reranking
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// The text the reranker scores candidates against
    pub fn rerank_query(&self) -> String {
        match &self.query {
            Some(query) if !query.trim().is_empty() => query.clone(),
            _ => self.vector_queries.join(" "),
        }
    }

    /// All sub-queries in fan-out order: dense first, then sparse
    pub fn sub_queries(&self) -> Vec<Query> {
        self.vector_queries
            .iter()
            .map(Query::dense)
            .chain(self.fts_keywords.iter().map(Query::sparse))
            .collect()
    }
}

/// Ordered results plus diagnostics for one request
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub domain: String,
    pub results: Vec<RankedResult>,
    pub diagnostics: SearchDiagnostics,
}

impl SearchResponse {
    pub fn total_found(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Render results as markdown sections for the generation prompt
    pub fn formatted_context(&self) -> String {
        self.results
            .iter()
            .map(|r| format!("## {}\n\n{}", r.header(), r.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
