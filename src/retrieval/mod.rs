//! Hybrid retrieval and reranking
//!
//! Dense and sparse retrievers are queried concurrently, their hits are
//! normalized per backend, deduplicated by chunk and fused with weighted
//! sums, then optionally reranked by a cross-encoder before thresholding.

mod adapters;
mod deduplication;
mod diagnostics;
mod fanout;
mod filter;
mod fusion;
mod hybrid;
mod normalize;
mod planner;
mod reranker;
mod types;

pub use adapters::{DenseRetriever, Retriever, RetrieverError, SparseRetriever};
pub use deduplication::{collapse_max, CollapsedHits};
pub use diagnostics::{
    HitsPerBackend, PipelineStage, RerankOutcome, SearchDiagnostics, SubQueryStats,
};
pub use fanout::{FanoutOutcome, QueryFanoutExecutor};
pub use filter::{threshold_top_k, Filtered};
pub use fusion::{fuse, FusionError, FusionWeights};
pub use hybrid::{HybridSearchPipeline, PipelineConfig, SearchError};
pub use normalize::normalize_hits;
pub use planner::{PlannerError, QueryPlan, QueryPlanner};
pub use reranker::{
    CrossEncoder, FastEmbedCrossEncoder, FastEmbedLoader, ModelLoader, RerankError,
    RerankerHandle,
};
pub use types::{
    rank_order, Backend, ChunkMetadata, MergedCandidate, NormalizedHit, Query, RankedResult,
    RetrievalHit, RetrievedChunk, SearchRequest, SearchResponse, DEFAULT_HEADER,
};
