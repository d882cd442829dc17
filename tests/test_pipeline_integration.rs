//! Integration tests: hybrid search pipeline over mocked backends
//!
//! Backends serve a fixed product catalogue so fused and reranked scores
//! are known in advance.

use async_trait::async_trait;
use ragcore::config::{Config, DomainConfig};
use ragcore::retrieval::{
    Backend, ChunkMetadata, CrossEncoder, HybridSearchPipeline, ModelLoader, PipelineConfig,
    PipelineStage, PlannerError, QueryPlan, QueryPlanner, RerankError, RerankOutcome,
    RerankerHandle, RetrievedChunk, Retriever, RetrieverError, SearchError, SearchRequest,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CATALOGUE: &[(&str, &str)] = &[
    ("mel-gummies", "Melatonin gummies are a good sleep supplement"),
    ("mag-gly", "Magnesium glycinate supplement supports sleep"),
    ("ashwa", "Ashwagandha supplement for stress"),
    ("vit-d", "Vitamin D3 drops"),
    ("fish-oil", "Fish oil capsules"),
    ("mel-tabs", "Melatonin tablets help sleep onset"),
    ("sleep-tea", "Chamomile sleep tea"),
];

fn text_of(chunk_id: &str) -> String {
    CATALOGUE
        .iter()
        .find(|(id, _)| *id == chunk_id)
        .map(|(_, text)| text.to_string())
        .unwrap_or_default()
}

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Serve,
    Fail,
}

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockRetriever {
    backend: Backend,
    mode: Mode,
    hits: HashMap<String, Vec<(&'static str, f32)>>,
    hang_on: Vec<String>,
    calls: AtomicUsize,
    abandoned: Arc<AtomicUsize>,
}

impl MockRetriever {
    fn new(backend: Backend, hits: &[(&str, &[(&'static str, f32)])]) -> Self {
        Self {
            backend,
            mode: Mode::Serve,
            hits: hits
                .iter()
                .map(|(query, hits)| (query.to_string(), hits.to_vec()))
                .collect(),
            hang_on: Vec::new(),
            calls: AtomicUsize::new(0),
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing(mut self) -> Self {
        self.mode = Mode::Fail;
        self
    }

    fn hanging_on(mut self, query: &str) -> Self {
        self.hang_on.push(query.to_string());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for MockRetriever {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn search(
        &self,
        text: &str,
        domain: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrieverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(domain, "products");

        if self.hang_on.iter().any(|q| q == text) {
            let _guard = DropCounter(self.abandoned.clone());
            return std::future::pending().await;
        }
        if self.mode == Mode::Fail {
            return Err(RetrieverError::Unavailable(format!("{} backend down", self.backend)));
        }

        Ok(self
            .hits
            .get(text)
            .map(|hits| {
                hits.iter()
                    .take(k)
                    .map(|(chunk_id, raw_score)| RetrievedChunk {
                        chunk_id: chunk_id.to_string(),
                        raw_score: *raw_score,
                        text: text_of(chunk_id),
                        metadata: ChunkMetadata::with_header(chunk_id.to_uppercase()),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn dense_backend() -> MockRetriever {
    MockRetriever::new(
        Backend::Dense,
        &[(
            "good sleep supplement",
            &[
                ("mel-gummies", 0.82),
                ("mag-gly", 0.75),
                ("ashwa", 0.55),
                ("vit-d", 0.41),
                ("fish-oil", 0.30),
            ],
        )],
    )
}

fn sparse_backend() -> MockRetriever {
    MockRetriever::new(
        Backend::Sparse,
        &[
            ("melatonin", &[("mel-gummies", 7.1), ("mel-tabs", 5.3)]),
            (
                "sleep",
                &[("mag-gly", 4.0), ("mel-gummies", 3.2), ("sleep-tea", 2.5)],
            ),
        ],
    )
}

/// Scores the share of query words present in the document
struct OverlapModel {
    calls: Arc<AtomicUsize>,
}

impl CrossEncoder for OverlapModel {
    fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();

        Ok(documents
            .iter()
            .map(|doc| {
                let doc = doc.to_lowercase();
                let doc_words: Vec<&str> = doc.split_whitespace().collect();
                let hits = words.iter().filter(|w| doc_words.contains(&w.as_str())).count();
                hits as f32 / words.len() as f32
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "overlap"
    }
}

struct OverlapLoader {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl ModelLoader for OverlapLoader {
    fn load(&self) -> Result<Arc<dyn CrossEncoder>, RerankError> {
        // Slow enough that concurrent first requests overlap
        std::thread::sleep(Duration::from_millis(20));
        if self.fail {
            return Err(RerankError::InitializationError("weights missing".to_string()));
        }
        Ok(Arc::new(OverlapModel {
            calls: self.calls.clone(),
        }))
    }
}

struct Reranker {
    handle: Arc<RerankerHandle>,
    calls: Arc<AtomicUsize>,
}

fn reranker(fail: bool) -> Reranker {
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = OverlapLoader {
        calls: calls.clone(),
        fail,
    };
    Reranker {
        handle: Arc::new(RerankerHandle::new(Arc::new(loader))),
        calls,
    }
}

/// Ways a loaded model can misbehave while scoring
#[derive(Clone, Copy, Debug)]
enum Broken {
    Errors,
    NanScores,
    ShortBatch,
}

struct BrokenModel(Broken);

impl CrossEncoder for BrokenModel {
    fn score(&self, _query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
        match self.0 {
            Broken::Errors => Err(RerankError::RerankingError("onnx session crashed".to_string())),
            Broken::NanScores => Ok(vec![f32::NAN; documents.len()]),
            Broken::ShortBatch => Ok(vec![0.9; documents.len() - 1]),
        }
    }

    fn model_name(&self) -> &str {
        "broken"
    }
}

struct BrokenLoader(Broken);

impl ModelLoader for BrokenLoader {
    fn load(&self) -> Result<Arc<dyn CrossEncoder>, RerankError> {
        Ok(Arc::new(BrokenModel(self.0)))
    }
}

fn pipeline_config() -> PipelineConfig {
    PipelineConfig::from(&Config::default())
}

fn pipeline(
    dense: Arc<MockRetriever>,
    sparse: Arc<MockRetriever>,
    reranker: Option<Arc<RerankerHandle>>,
    config: PipelineConfig,
) -> HybridSearchPipeline {
    HybridSearchPipeline::new(dense, sparse, reranker, config)
}

fn scenario_request() -> SearchRequest {
    DomainConfig {
        final_top_k: 3,
        ..DomainConfig::default()
    }
    .request(
        "products",
        vec!["good sleep supplement".to_string()],
        vec!["melatonin".to_string(), "sleep".to_string()],
    )
}

fn ids(results: &[ragcore::retrieval::RankedResult]) -> Vec<&str> {
    results.iter().map(|r| r.chunk_id.as_str()).collect()
}

#[tokio::test]
async fn test_products_scenario_reranked() {
    let reranker = reranker(false);
    let search = pipeline(
        Arc::new(dense_backend()),
        Arc::new(sparse_backend()),
        Some(reranker.handle.clone()),
        pipeline_config(),
    );

    let response = search.execute(scenario_request()).await.unwrap();

    assert_eq!(response.total_found(), 3);
    assert!(response.results.iter().all(|r| r.score >= 0.3));
    assert!(response
        .results
        .windows(2)
        .all(|w| w[0].rerank_score >= w[1].rerank_score));
    assert_eq!(ids(&response.results), vec!["mel-gummies", "mag-gly", "ashwa"]);
    assert_eq!(response.results[0].rerank_score, Some(1.0));

    let diagnostics = &response.diagnostics;
    assert_eq!(diagnostics.hits_per_backend.dense, 5);
    assert_eq!(diagnostics.hits_per_backend.sparse, 5);
    assert_eq!(diagnostics.dedup_collapsed_count, 1);
    assert_eq!(diagnostics.fused_candidates, 7);
    assert_eq!(diagnostics.rerank, RerankOutcome::Reranked { candidates: 7 });
    assert!(diagnostics.rerank_latency.is_some());
    assert_eq!(
        diagnostics.stages,
        vec![
            PipelineStage::Idle,
            PipelineStage::FanningOut,
            PipelineStage::Merging,
            PipelineStage::Reranking,
            PipelineStage::Filtering,
            PipelineStage::Done,
        ]
    );
    assert_eq!(reranker.calls.load(Ordering::SeqCst), 1);

    let context = response.formatted_context();
    assert!(context.starts_with("## MEL-GUMMIES\n\nMelatonin gummies"));
}

#[tokio::test]
async fn test_deterministic_output() {
    let reranker = reranker(false);
    let search = pipeline(
        Arc::new(dense_backend()),
        Arc::new(sparse_backend()),
        Some(reranker.handle.clone()),
        pipeline_config(),
    );

    let mut request = scenario_request();
    request.final_top_k = 10;
    request.min_score = 0.0;

    let first = search.execute(request.clone()).await.unwrap();
    for _ in 0..5 {
        let again = search.execute(request.clone()).await.unwrap();
        assert_eq!(first.results, again.results);
    }
}

#[tokio::test]
async fn test_fusion_order_without_reranker() {
    let reranker = reranker(false);
    let search = pipeline(
        Arc::new(dense_backend()),
        Arc::new(sparse_backend()),
        Some(reranker.handle.clone()),
        pipeline_config(),
    );

    let mut request = scenario_request();
    request.use_reranker = false;
    request.final_top_k = 15;

    let response = search.execute(request).await.unwrap();

    assert_eq!(ids(&response.results), vec!["mel-gummies", "mag-gly", "ashwa"]);
    assert!((response.results[0].score - 1.0).abs() < 1e-5);
    assert!(response.results.iter().all(|r| r.rerank_score.is_none()));
    assert_eq!(response.diagnostics.below_threshold, 4);
    assert_eq!(response.diagnostics.rerank, RerankOutcome::Disabled);
    assert!(response.diagnostics.stages.contains(&PipelineStage::SkipRerank));

    assert_eq!(reranker.calls.load(Ordering::SeqCst), 0);
    assert_eq!(reranker.handle.load_attempts(), 0);
}

#[tokio::test]
async fn test_dense_outage_degrades_to_sparse() {
    let search = pipeline(
        Arc::new(dense_backend().failing()),
        Arc::new(sparse_backend()),
        None,
        pipeline_config(),
    );

    let mut request = scenario_request();
    request.use_reranker = false;
    request.min_score = 0.0;
    request.final_top_k = 10;

    let response = search.execute(request).await.unwrap();

    assert!(!response.is_empty());
    assert!(response.results.iter().all(|r| r.dense_score.is_none()));
    assert_eq!(response.diagnostics.degraded_backends, vec![Backend::Dense]);
    assert_eq!(response.diagnostics.dense_queries.failed, 1);
    // Sparse-only fusion is scaled by the sparse weight
    assert!((response.results[0].score - 0.3).abs() < 1e-5);
    assert_eq!(response.results[0].chunk_id, "mel-gummies");
}

#[tokio::test]
async fn test_total_outage_is_retrieval_unavailable() {
    let search = pipeline(
        Arc::new(dense_backend().failing()),
        Arc::new(sparse_backend().failing()),
        None,
        pipeline_config(),
    );

    match search.execute(scenario_request()).await {
        Err(SearchError::RetrievalUnavailable { domain, diagnostics }) => {
            assert_eq!(domain, "products");
            assert_eq!(diagnostics.degraded_backends, vec![Backend::Dense, Backend::Sparse]);
            assert_eq!(diagnostics.stages.last(), Some(&PipelineStage::Failed));
        }
        other => panic!("expected RetrievalUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_only_non_finite_scores_is_retrieval_unavailable() {
    let dense = MockRetriever::new(
        Backend::Dense,
        &[("good sleep supplement", &[("mel-gummies", f32::NAN), ("mag-gly", f32::INFINITY)])],
    );
    let sparse = MockRetriever::new(
        Backend::Sparse,
        &[
            ("melatonin", &[("mel-tabs", f32::NEG_INFINITY)]),
            ("sleep", &[("sleep-tea", f32::NAN)]),
        ],
    );
    let search = pipeline(Arc::new(dense), Arc::new(sparse), None, pipeline_config());

    match search.execute(scenario_request()).await {
        Err(SearchError::RetrievalUnavailable { diagnostics, .. }) => {
            assert_eq!(diagnostics.hits_per_backend.dense, 2);
            assert_eq!(diagnostics.hits_per_backend.sparse, 2);
            assert!(diagnostics.degraded_backends.is_empty());
            assert_eq!(diagnostics.stages.last(), Some(&PipelineStage::Failed));
        }
        other => panic!("expected RetrievalUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hanging_sub_query_times_out() {
    let dense = Arc::new(dense_backend().hanging_on("slow phrasing"));
    let mut config = pipeline_config();
    config.timeout = Duration::from_millis(100);
    let search = pipeline(dense.clone(), Arc::new(sparse_backend()), None, config);

    let mut request = scenario_request();
    request.vector_queries.push("slow phrasing".to_string());
    request.use_reranker = false;

    let started = std::time::Instant::now();
    let response = search.execute(request).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(response.diagnostics.dense_queries.timed_out, 1);
    assert_eq!(response.diagnostics.dense_queries.succeeded, 1);
    assert!(response.diagnostics.degraded_backends.is_empty());
    assert_eq!(dense.abandoned.load(Ordering::SeqCst), 1);
    assert_eq!(response.results[0].chunk_id, "mel-gummies");
}

#[tokio::test]
async fn test_caller_cancellation_aborts_sub_queries() {
    let dense = Arc::new(dense_backend().hanging_on("good sleep supplement"));
    let sparse = Arc::new(sparse_backend().hanging_on("melatonin").hanging_on("sleep"));
    let mut config = pipeline_config();
    config.timeout = Duration::from_secs(60);
    let search = pipeline(dense.clone(), sparse.clone(), None, config);

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        search.execute(scenario_request()),
    )
    .await;
    assert!(cancelled.is_err());

    let abandoned = || {
        dense.abandoned.load(Ordering::SeqCst) + sparse.abandoned.load(Ordering::SeqCst)
    };
    for _ in 0..100 {
        if abandoned() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(abandoned(), 3);
}

#[tokio::test]
async fn test_invalid_request_rejected_before_fanout() {
    let dense = Arc::new(dense_backend());
    let sparse = Arc::new(sparse_backend());
    let search = pipeline(dense.clone(), sparse.clone(), None, pipeline_config());

    let mut request = scenario_request();
    request.domain = "recipes".to_string();
    request.vector_queries.clear();
    request.fts_keywords = vec!["   ".to_string()];
    request.min_score = 1.5;
    request.dense_weight = 0.0;
    request.sparse_weight = 0.0;
    request.final_top_k = 0;

    match search.execute(request).await {
        Err(SearchError::InvalidRequest(errors)) => {
            let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
            for expected in [
                "domain",
                "vector_queries",
                "fts_keywords[0]",
                "min_score",
                "dense_weight",
                "final_top_k",
            ] {
                assert!(paths.contains(&expected), "missing {} in {:?}", expected, paths);
            }
        }
        other => panic!("expected InvalidRequest, got {:?}", other),
    }

    assert_eq!(dense.calls(), 0);
    assert_eq!(sparse.calls(), 0);
}

#[tokio::test]
async fn test_validated_weights_reach_fusion() {
    let search = pipeline(
        Arc::new(dense_backend()),
        Arc::new(sparse_backend()),
        None,
        pipeline_config(),
    );

    let mut request = scenario_request();
    request.use_reranker = false;
    request.dense_weight = 1.0;
    request.sparse_weight = 1.0;

    let response = search.execute(request.clone()).await.unwrap();
    assert_eq!(response.results[0].chunk_id, "mel-gummies");
    assert!((response.results[0].score - 2.0).abs() < 1e-5);

    request.dense_weight = 0.0;
    request.sparse_weight = 0.0;
    match search.execute(request).await {
        Err(SearchError::InvalidRequest(errors)) => {
            assert_eq!(errors.len(), 1, "{:?}", errors);
            assert_eq!(errors[0].path, "dense_weight");
        }
        other => panic!("expected InvalidRequest, got {:?}", other),
    }
}

#[tokio::test]
async fn test_excess_queries_truncated() {
    let dense = Arc::new(dense_backend());
    let sparse = Arc::new(sparse_backend());
    let search = pipeline(dense.clone(), sparse.clone(), None, pipeline_config());

    let mut request = scenario_request();
    request.use_reranker = false;
    request.vector_queries = (0..7).map(|i| format!("phrasing {}", i)).collect();
    request.vector_queries[0] = "good sleep supplement".to_string();

    let response = search.execute(request).await.unwrap();

    assert_eq!(response.diagnostics.truncated_queries, 2);
    assert_eq!(response.diagnostics.dense_queries.issued, 5);
    assert_eq!(dense.calls(), 5);
}

#[tokio::test]
async fn test_reranker_load_failure_falls_back() {
    let reranker = reranker(true);
    let search = pipeline(
        Arc::new(dense_backend()),
        Arc::new(sparse_backend()),
        Some(reranker.handle.clone()),
        pipeline_config(),
    );

    for _ in 0..2 {
        let response = search.execute(scenario_request()).await.unwrap();
        assert_eq!(ids(&response.results), vec!["mel-gummies", "mag-gly", "ashwa"]);
        assert!(response.results.iter().all(|r| r.rerank_score.is_none()));
        assert!(matches!(
            response.diagnostics.rerank,
            RerankOutcome::Fallback { .. }
        ));
    }

    assert_eq!(reranker.handle.load_attempts(), 1);
}

#[tokio::test]
async fn test_scoring_failure_keeps_fusion_order() {
    for broken in [Broken::Errors, Broken::NanScores, Broken::ShortBatch] {
        let handle = Arc::new(RerankerHandle::new(Arc::new(BrokenLoader(broken))));
        let mut config = pipeline_config();
        config.rerank_candidates = 2;
        let search = pipeline(
            Arc::new(dense_backend()),
            Arc::new(sparse_backend()),
            Some(handle.clone()),
            config,
        );

        let mut request = scenario_request();
        request.min_score = 0.0;
        request.final_top_k = 10;

        let response = search.execute(request).await.unwrap();

        let reason = match &response.diagnostics.rerank {
            RerankOutcome::Fallback { reason } => reason.clone(),
            other => panic!("{:?}: expected Fallback, got {:?}", broken, other),
        };
        let expected_reason = match broken {
            Broken::Errors => "onnx session crashed",
            Broken::NanScores => "non-finite",
            Broken::ShortBatch => "1 scores for 2 candidates",
        };
        assert!(reason.contains(expected_reason), "{:?}: {}", broken, reason);

        assert_eq!(
            ids(&response.results),
            vec!["mel-gummies", "mag-gly", "ashwa", "mel-tabs", "vit-d", "fish-oil", "sleep-tea"]
        );
        assert!(response.results.iter().all(|r| r.rerank_score.is_none()));
        assert!(response
            .results
            .windows(2)
            .all(|w| w[0].score >= w[1].score));
        assert_eq!(response.diagnostics.fused_candidates, 7);
        assert_eq!(handle.load_attempts(), 1);
    }
}

#[tokio::test]
async fn test_rerank_window_limits_candidates() {
    let reranker = reranker(false);
    let mut config = pipeline_config();
    config.rerank_candidates = 2;
    let search = pipeline(
        Arc::new(dense_backend()),
        Arc::new(sparse_backend()),
        Some(reranker.handle.clone()),
        config,
    );

    let mut request = scenario_request();
    request.min_score = 0.0;
    request.final_top_k = 10;

    let response = search.execute(request).await.unwrap();

    assert_eq!(response.diagnostics.rerank, RerankOutcome::Reranked { candidates: 2 });
    assert_eq!(ids(&response.results), vec!["mel-gummies", "mag-gly"]);
}

#[tokio::test]
async fn test_concurrent_first_use_loads_once() {
    let reranker = reranker(false);
    let search = Arc::new(pipeline(
        Arc::new(dense_backend()),
        Arc::new(sparse_backend()),
        Some(reranker.handle.clone()),
        pipeline_config(),
    ));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let search = search.clone();
        tasks.spawn(async move { search.execute(scenario_request()).await });
    }

    while let Some(joined) = tasks.join_next().await {
        let response = joined.unwrap().unwrap();
        assert_eq!(response.diagnostics.rerank, RerankOutcome::Reranked { candidates: 7 });
    }

    assert_eq!(reranker.handle.load_attempts(), 1);
    assert_eq!(reranker.calls.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn test_result_bounds() {
    let search = pipeline(
        Arc::new(dense_backend()),
        Arc::new(sparse_backend()),
        None,
        pipeline_config(),
    );

    for final_top_k in [1, 2, 5, 20] {
        for min_score in [0.0, 0.1, 0.35, 0.7, 1.0] {
            let mut request = scenario_request();
            request.use_reranker = false;
            request.final_top_k = final_top_k;
            request.min_score = min_score;

            let response = search.execute(request).await.unwrap();
            assert!(response.total_found() <= final_top_k);
            assert!(response.results.iter().all(|r| r.score >= min_score));
        }
    }
}

struct FixedPlanner {
    fail: bool,
}

#[async_trait]
impl QueryPlanner for FixedPlanner {
    async fn plan(&self, question: &str, _domain: &str) -> Result<QueryPlan, PlannerError> {
        if self.fail {
            return Err(PlannerError::Failed("model timed out".to_string()));
        }
        assert!(question.contains("sleep"));
        Ok(QueryPlan {
            vector_queries: vec!["good sleep supplement".to_string()],
            fts_keywords: vec!["melatonin".to_string(), "sleep".to_string()],
        })
    }
}

#[tokio::test]
async fn test_search_with_planner() {
    let reranker = reranker(false);
    let search = pipeline(
        Arc::new(dense_backend()),
        Arc::new(sparse_backend()),
        Some(reranker.handle.clone()),
        pipeline_config(),
    );
    let settings = DomainConfig {
        final_top_k: 3,
        ..DomainConfig::default()
    };

    let response = search
        .search_with_planner(
            &FixedPlanner { fail: false },
            "good supplement for sleep",
            "products",
            &settings,
        )
        .await
        .unwrap();
    assert_eq!(response.domain, "products");
    assert_eq!(response.results[0].chunk_id, "mel-gummies");

    let err = search
        .search_with_planner(&FixedPlanner { fail: true }, "sleep?", "products", &settings)
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::Planner(PlannerError::Failed(_))));
}
