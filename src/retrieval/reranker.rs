//! Cross-encoder reranking and the process-scoped model handle
//!
//! The model is owned by a [`RerankerHandle`] created once per process and
//! shared by every pipeline. Concurrency policy: a single execution lane.
//! Loading and every scoring call happen while holding the handle's lane
//! lock, so at most one model invocation runs at a time and concurrent
//! requests queue behind it. Models therefore never need to be reentrant.

use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    InitializationError(String),

    #[error("Reranking failed: {0}")]
    RerankingError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Reranker unavailable: {0}")]
    Unavailable(String),

    #[error("Reranker returned {actual} scores for {expected} candidates")]
    ScoreCountMismatch { expected: usize, actual: usize },
}

/// A relevance model scoring (query, document) pairs
pub trait CrossEncoder: Send + Sync {
    /// Score every document against the query in one batch.
    ///
    /// Returns one score in [0, 1] per document, in input order.
    fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError>;

    fn model_name(&self) -> &str;
}

/// Produces the cross-encoder on first use
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn CrossEncoder>, RerankError>;
}

/// Cross-encoder backed by FastEmbed's ONNX rerankers
pub struct FastEmbedCrossEncoder {
    model: TextRerank,
    model_name: String,
}

impl FastEmbedCrossEncoder {
    /// Load a reranker model, downloading it on first use
    ///
    /// Supported: BAAI/bge-reranker-base, rozgo/bge-reranker-v2-m3,
    /// jinaai/jina-reranker-v1-turbo-en
    pub fn new(model_name: &str) -> Result<Self, RerankError> {
        let model = match model_name {
            "BAAI/bge-reranker-base" | "bge-reranker-base" => RerankerModel::BGERerankerBase,
            "rozgo/bge-reranker-v2-m3" | "bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
            "jinaai/jina-reranker-v1-turbo-en" | "jina-reranker-v1-turbo-en" => {
                RerankerModel::JINARerankerV1TurboEn
            }
            _ => {
                return Err(RerankError::InitializationError(format!(
                    "Unsupported reranker model: {}",
                    model_name
                )));
            }
        };

        tracing::info!("Initializing reranker model: {}", model_name);

        let init_options = RerankInitOptions::new(model).with_show_download_progress(false);
        let model = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        Ok(Self {
            model,
            model_name: model_name.to_string(),
        })
    }
}

fn sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit).exp())
}

impl CrossEncoder for FastEmbedCrossEncoder {
    fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        if query.is_empty() {
            return Err(RerankError::InvalidInput(
                "Query cannot be empty".to_string(),
            ));
        }

        let docs: Vec<&str> = documents.iter().map(|s| s.as_str()).collect();
        let results = self
            .model
            .rerank(query, docs, false, None)
            .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        // FastEmbed returns results sorted by score; restore input order
        let mut scores = vec![f32::NAN; documents.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = sigmoid(result.score);
            }
        }

        if scores.iter().any(|s| s.is_nan()) {
            return Err(RerankError::RerankingError(
                "Missing scores for some candidates".to_string(),
            ));
        }

        Ok(scores)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Loads a [`FastEmbedCrossEncoder`] by model name
pub struct FastEmbedLoader {
    model_name: String,
}

impl FastEmbedLoader {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
        }
    }
}

impl ModelLoader for FastEmbedLoader {
    fn load(&self) -> Result<Arc<dyn CrossEncoder>, RerankError> {
        let model = FastEmbedCrossEncoder::new(&self.model_name)?;
        Ok(Arc::new(model))
    }
}

enum ModelState {
    Unloaded,
    Ready(Arc<dyn CrossEncoder>),
    /// Load was attempted and failed; not retried
    Failed(String),
    Closed,
}

/// Owned, lazily initialized handle to the cross-encoder model
pub struct RerankerHandle {
    loader: Arc<dyn ModelLoader>,
    lane: Arc<Mutex<ModelState>>,
    load_attempts: Arc<AtomicUsize>,
}

impl RerankerHandle {
    /// Create an unloaded handle; the model loads on warm-up or first use
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            lane: Arc::new(Mutex::new(ModelState::Unloaded)),
            load_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle for a FastEmbed reranker model
    pub fn fastembed(model_name: impl Into<String>) -> Self {
        Self::new(Arc::new(FastEmbedLoader::new(model_name)))
    }

    /// Load the model now instead of on the first request
    pub async fn warm_up(&self) -> Result<(), RerankError> {
        let mut state = self.lane.clone().lock_owned().await;
        let loader = self.loader.clone();
        let attempts = self.load_attempts.clone();

        // The guard moves into the task so the lane stays held even if this
        // future is dropped before loading finishes.
        tokio::task::spawn_blocking(move || {
            ensure_loaded(&mut state, loader.as_ref(), &attempts).map(|_| ())
        })
        .await
        .map_err(|e| RerankError::InitializationError(format!("Loader task failed: {}", e)))?
    }

    /// Whether the model is loaded and serving
    pub async fn is_loaded(&self) -> bool {
        matches!(*self.lane.lock().await, ModelState::Ready(_))
    }

    /// Number of times the loader has been invoked
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }

    /// Release the model; later calls report the reranker as unavailable
    pub async fn shutdown(&self) {
        let mut state = self.lane.lock().await;
        if let ModelState::Ready(model) = &*state {
            tracing::info!("Releasing reranker model: {}", model.model_name());
        }
        *state = ModelState::Closed;
    }

    /// Score all candidate texts against the query in one batched call
    pub async fn rerank(&self, query: &str, documents: Vec<String>) -> Result<Vec<f32>, RerankError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.lane.clone().lock_owned().await;
        let loader = self.loader.clone();
        let attempts = self.load_attempts.clone();
        let expected = documents.len();
        let query = query.to_string();

        // Load and score under one guard owned by the blocking task
        let scores = tokio::task::spawn_blocking(move || {
            let model = ensure_loaded(&mut state, loader.as_ref(), &attempts)?;
            model.score(&query, &documents)
        })
        .await
        .map_err(|e| RerankError::RerankingError(format!("Reranker task failed: {}", e)))??;

        if scores.len() != expected {
            return Err(RerankError::ScoreCountMismatch {
                expected,
                actual: scores.len(),
            });
        }

        Ok(scores)
    }
}

/// Return the ready model, loading it first if this is the first use.
///
/// Runs on the blocking pool with the lane held.
fn ensure_loaded(
    state: &mut ModelState,
    loader: &dyn ModelLoader,
    attempts: &AtomicUsize,
) -> Result<Arc<dyn CrossEncoder>, RerankError> {
    match state {
        ModelState::Ready(model) => return Ok(model.clone()),
        ModelState::Failed(reason) => return Err(RerankError::Unavailable(reason.clone())),
        ModelState::Closed => {
            return Err(RerankError::Unavailable("Reranker shut down".to_string()))
        }
        ModelState::Unloaded => {}
    }

    attempts.fetch_add(1, Ordering::SeqCst);
    match loader.load() {
        Ok(model) => {
            tracing::info!("Reranker model ready: {}", model.model_name());
            *state = ModelState::Ready(model.clone());
            Ok(model)
        }
        Err(e) => {
            tracing::warn!("Reranker model failed to load: {}", e);
            *state = ModelState::Failed(e.to_string());
            Err(RerankError::Unavailable(e.to_string()))
        }
    }
}
