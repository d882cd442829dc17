//! Per-request diagnostic counters
//!
//! The pipeline computes these and logs a summary; exporting them to a
//! metrics backend is the caller's concern.

use crate::retrieval::Backend;
use serde::Serialize;
use std::time::Duration;

/// Pipeline state machine stages, in the order a successful request visits them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    FanningOut,
    Merging,
    Reranking,
    SkipRerank,
    Filtering,
    Done,
    /// Fan-out produced no hits from either backend
    Failed,
    /// Request failed validation before fan-out
    Rejected,
}

/// Hits collected per backend before dedup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HitsPerBackend {
    pub dense: usize,
    pub sparse: usize,
}

impl HitsPerBackend {
    pub fn get(&self, backend: Backend) -> usize {
        match backend {
            Backend::Dense => self.dense,
            Backend::Sparse => self.sparse,
        }
    }

    pub fn total(&self) -> usize {
        self.dense + self.sparse
    }
}

/// Sub-query outcomes for one backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubQueryStats {
    pub issued: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl SubQueryStats {
    /// Every issued sub-query failed or timed out
    pub fn all_failed(&self) -> bool {
        self.issued > 0 && self.succeeded == 0
    }
}

/// What the rerank stage did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RerankOutcome {
    /// Request asked for fusion ordering only
    #[default]
    Disabled,
    /// Nothing survived fusion
    NoCandidates,
    /// Cross-encoder scores are authoritative
    Reranked { candidates: usize },
    /// Reranking was requested but failed; fusion ordering was kept
    Fallback { reason: String },
}

/// Diagnostic counters for one pipeline invocation
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchDiagnostics {
    pub hits_per_backend: HitsPerBackend,
    pub dense_queries: SubQueryStats,
    pub sparse_queries: SubQueryStats,
    /// Backends whose sub-queries all failed
    pub degraded_backends: Vec<Backend>,
    /// Sub-queries dropped for exceeding the configured maxima
    pub truncated_queries: usize,
    /// Hits discarded because the same chunk was already hit in that backend
    pub dedup_collapsed_count: usize,
    /// Distinct chunks after fusion
    pub fused_candidates: usize,
    /// Candidates removed by the min-score threshold
    pub below_threshold: usize,
    pub rerank: RerankOutcome,
    pub rerank_latency: Option<Duration>,
    pub fanout_latency: Duration,
    pub total_latency: Duration,
    pub stages: Vec<PipelineStage>,
}

impl SearchDiagnostics {
    pub fn sub_queries(&self, backend: Backend) -> &SubQueryStats {
        match backend {
            Backend::Dense => &self.dense_queries,
            Backend::Sparse => &self.sparse_queries,
        }
    }

    pub(crate) fn enter(&mut self, stage: PipelineStage) {
        tracing::debug!("Pipeline stage: {:?}", stage);
        self.stages.push(stage);
    }

    /// Log a one-line summary of the counters
    pub fn emit(&self, domain: &str, returned: usize) {
        tracing::info!(
            domain = domain,
            dense_hits = self.hits_per_backend.dense,
            sparse_hits = self.hits_per_backend.sparse,
            dedup_collapsed = self.dedup_collapsed_count,
            fused = self.fused_candidates,
            below_threshold = self.below_threshold,
            returned = returned,
            rerank_ms = ?self.rerank_latency.map(|d| d.as_millis() as u64),
            total_ms = self.total_latency.as_millis() as u64,
            "Hybrid search completed"
        );
    }
}
