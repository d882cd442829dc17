//! Hybrid search pipeline: fan-out, merge, rerank, filter

use crate::config::{validate_search_settings, Config, DomainConfig, SearchSettings};
use crate::error::ValidationError;
use crate::retrieval::{
    collapse_max, fuse, normalize_hits, rank_order, threshold_top_k, Backend, FusionWeights,
    MergedCandidate, PipelineStage, PlannerError, QueryFanoutExecutor, QueryPlanner,
    RankedResult, RerankOutcome, RerankerHandle, Retriever, SearchDiagnostics, SearchRequest,
    SearchResponse,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    /// Rejected before any backend was called
    #[error("Invalid search request: {0:?}")]
    InvalidRequest(Vec<ValidationError>),

    /// Neither backend produced a single hit
    #[error("Retrieval unavailable for domain {domain}: no backend returned hits")]
    RetrievalUnavailable {
        domain: String,
        diagnostics: Box<SearchDiagnostics>,
    },

    #[error(transparent)]
    Planner(#[from] PlannerError),
}

/// Runtime view of the configuration the pipeline needs
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub timeout: Duration,
    pub max_workers: usize,
    pub max_vector_queries: usize,
    pub max_fts_keywords: usize,
    pub rerank_candidates: usize,
    /// Domains a request may target
    pub domains: BTreeSet<String>,
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        let retrieval = &config.retrieval;
        Self {
            timeout: Duration::from_millis(retrieval.timeout_ms),
            max_workers: retrieval.max_workers,
            max_vector_queries: retrieval.max_vector_queries,
            max_fts_keywords: retrieval.max_fts_keywords,
            rerank_candidates: retrieval.rerank_candidates,
            domains: config.domains.keys().cloned().collect(),
        }
    }
}

/// Hybrid retrieval over a dense and a sparse backend
///
/// Holds only shared read-only resources, so one pipeline can serve any
/// number of concurrent requests.
pub struct HybridSearchPipeline {
    fanout: QueryFanoutExecutor,
    reranker: Option<Arc<RerankerHandle>>,
    config: PipelineConfig,
}

impl HybridSearchPipeline {
    pub fn new(
        dense: Arc<dyn Retriever>,
        sparse: Arc<dyn Retriever>,
        reranker: Option<Arc<RerankerHandle>>,
        config: PipelineConfig,
    ) -> Self {
        let fanout = QueryFanoutExecutor::new(dense, sparse, config.timeout, config.max_workers);
        Self {
            fanout,
            reranker,
            config,
        }
    }

    /// Run one search request end to end
    pub async fn execute(&self, request: SearchRequest) -> Result<SearchResponse, SearchError> {
        let started = Instant::now();
        let mut diagnostics = SearchDiagnostics::default();
        diagnostics.enter(PipelineStage::Idle);

        let (request, weights) = match self.validate(request, &mut diagnostics) {
            Ok(validated) => validated,
            Err(errors) => {
                diagnostics.enter(PipelineStage::Rejected);
                tracing::warn!("Rejected search request: {:?}", errors);
                return Err(SearchError::InvalidRequest(errors));
            }
        };

        tracing::info!(
            "Hybrid search in {}: {} vector queries, {} keywords",
            request.domain,
            request.vector_queries.len(),
            request.fts_keywords.len()
        );

        // Step 1: Fan out every sub-query under the request deadline
        diagnostics.enter(PipelineStage::FanningOut);
        let outcome = self
            .fanout
            .run(&request.domain, request.sub_queries(), request.top_k_per_query)
            .await;

        diagnostics.fanout_latency = outcome.latency;
        diagnostics.hits_per_backend.dense = outcome.dense.len();
        diagnostics.hits_per_backend.sparse = outcome.sparse.len();
        diagnostics.dense_queries = outcome.dense_stats;
        diagnostics.sparse_queries = outcome.sparse_stats;
        for backend in [Backend::Dense, Backend::Sparse] {
            if diagnostics.sub_queries(backend).all_failed() {
                tracing::warn!("All {} sub-queries failed, continuing without it", backend);
                diagnostics.degraded_backends.push(backend);
            }
        }

        // Step 2: Normalize per backend, collapse duplicates, fuse
        let dense = normalize_hits(outcome.dense);
        let sparse = normalize_hits(outcome.sparse);
        if dense.is_empty() && sparse.is_empty() {
            diagnostics.enter(PipelineStage::Failed);
            diagnostics.total_latency = started.elapsed();
            tracing::warn!("No usable hits from any backend in {}", request.domain);
            return Err(SearchError::RetrievalUnavailable {
                domain: request.domain,
                diagnostics: Box::new(diagnostics),
            });
        }

        diagnostics.enter(PipelineStage::Merging);
        let dense = collapse_max(dense);
        let sparse = collapse_max(sparse);
        diagnostics.dedup_collapsed_count = dense.collapsed + sparse.collapsed;

        let candidates = fuse(dense.hits, sparse.hits, &weights);
        diagnostics.fused_candidates = candidates.len();

        // Step 3: Rerank or keep fusion order
        let ranked = self.rank(&request, candidates, &mut diagnostics).await;

        // Step 4: Threshold and truncate
        diagnostics.enter(PipelineStage::Filtering);
        let filtered = threshold_top_k(ranked, request.min_score, request.final_top_k);
        diagnostics.below_threshold = filtered.below_threshold;

        diagnostics.enter(PipelineStage::Done);
        diagnostics.total_latency = started.elapsed();
        diagnostics.emit(&request.domain, filtered.results.len());

        Ok(SearchResponse {
            domain: request.domain,
            results: filtered.results,
            diagnostics,
        })
    }

    /// Plan phrasings for `question`, then search with the domain's settings
    pub async fn search_with_planner(
        &self,
        planner: &dyn QueryPlanner,
        question: &str,
        domain: &str,
        settings: &DomainConfig,
    ) -> Result<SearchResponse, SearchError> {
        let plan = planner.plan(question, domain).await?;
        tracing::debug!("Planned {:?} for {:?}", plan, question);

        let request = settings
            .request(domain, plan.vector_queries, plan.fts_keywords)
            .with_query(question);
        self.execute(request).await
    }

    fn validate(
        &self,
        mut request: SearchRequest,
        diagnostics: &mut SearchDiagnostics,
    ) -> Result<(SearchRequest, FusionWeights), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !self.config.domains.contains(&request.domain) {
            errors.push(ValidationError::new(
                "domain",
                format!("Unknown domain: {}", request.domain),
            ));
        }
        check_queries("vector_queries", &request.vector_queries, &mut errors);
        check_queries("fts_keywords", &request.fts_keywords, &mut errors);
        validate_search_settings(
            "",
            SearchSettings {
                min_score: request.min_score,
                dense_weight: request.dense_weight,
                sparse_weight: request.sparse_weight,
                top_k_per_query: request.top_k_per_query,
                final_top_k: request.final_top_k,
            },
            &mut errors,
        );

        if !errors.is_empty() {
            return Err(errors);
        }

        for text in request
            .vector_queries
            .iter_mut()
            .chain(request.fts_keywords.iter_mut())
        {
            *text = text.trim().to_string();
        }

        diagnostics.truncated_queries = truncate_queries(
            "vector_queries",
            &mut request.vector_queries,
            self.config.max_vector_queries,
        ) + truncate_queries(
            "fts_keywords",
            &mut request.fts_keywords,
            self.config.max_fts_keywords,
        );

        // Weight rules were checked with the other settings above
        let weights = FusionWeights {
            dense: request.dense_weight,
            sparse: request.sparse_weight,
        };

        Ok((request, weights))
    }

    async fn rank(
        &self,
        request: &SearchRequest,
        mut candidates: Vec<MergedCandidate>,
        diagnostics: &mut SearchDiagnostics,
    ) -> Vec<RankedResult> {
        if !request.use_reranker {
            diagnostics.enter(PipelineStage::SkipRerank);
            diagnostics.rerank = RerankOutcome::Disabled;
            return fusion_order(candidates);
        }

        let Some(reranker) = &self.reranker else {
            diagnostics.enter(PipelineStage::SkipRerank);
            diagnostics.rerank = RerankOutcome::Fallback {
                reason: "No reranker configured".to_string(),
            };
            return fusion_order(candidates);
        };

        if candidates.is_empty() {
            diagnostics.enter(PipelineStage::SkipRerank);
            diagnostics.rerank = RerankOutcome::NoCandidates;
            return Vec::new();
        }

        diagnostics.enter(PipelineStage::Reranking);
        let rest = candidates.split_off(candidates.len().min(self.config.rerank_candidates));
        let documents = candidates.iter().map(|c| c.text.clone()).collect();

        let started = Instant::now();
        let scores = reranker.rerank(&request.rerank_query(), documents).await;
        diagnostics.rerank_latency = Some(started.elapsed());

        let reason = match scores {
            Ok(scores) if scores.iter().all(|s| s.is_finite()) => {
                tracing::debug!(
                    "Reranked {} candidates, dropped {} beyond the rerank window",
                    candidates.len(),
                    rest.len()
                );
                diagnostics.rerank = RerankOutcome::Reranked {
                    candidates: candidates.len(),
                };
                return candidates
                    .into_iter()
                    .zip(scores)
                    .map(|(candidate, score)| RankedResult::from_reranked(candidate, score))
                    .collect();
            }
            Ok(_) => "Reranker returned non-finite scores".to_string(),
            Err(e) => e.to_string(),
        };

        tracing::warn!("Reranking failed, keeping fusion order: {}", reason);
        diagnostics.rerank = RerankOutcome::Fallback { reason };
        candidates.extend(rest);
        fusion_order(candidates)
    }
}

fn fusion_order(candidates: Vec<MergedCandidate>) -> Vec<RankedResult> {
    let mut results: Vec<RankedResult> = candidates.into_iter().map(RankedResult::from_fused).collect();
    results.sort_by(|a, b| rank_order(a.score, &a.chunk_id, b.score, &b.chunk_id));
    results
}

fn check_queries(field: &str, queries: &[String], errors: &mut Vec<ValidationError>) {
    if queries.is_empty() {
        errors.push(ValidationError::new(field, "At least one entry is required"));
    }

    for (i, text) in queries.iter().enumerate() {
        if text.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("{}[{}]", field, i),
                "Entry cannot be empty",
            ));
        }
    }
}

/// Keep the first `max` entries, returning how many were dropped
fn truncate_queries(field: &str, queries: &mut Vec<String>, max: usize) -> usize {
    if queries.len() <= max {
        return 0;
    }

    let dropped = queries.len() - max;
    tracing::warn!(
        "{} has {} entries, keeping the first {}",
        field,
        queries.len(),
        max
    );
    queries.truncate(max);
    dropped
}
