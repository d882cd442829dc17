//! Process-scoped wiring: chunk store, indexes, retrievers, reranker, pipeline

use crate::config::Config;
use crate::embedding::{EmbeddingProvider, FastEmbedProvider, KeywordIndex, VectorIndex};
use crate::error::{RagError, Result};
use crate::retrieval::{
    DenseRetriever, HybridSearchPipeline, PipelineConfig, RerankerHandle, SparseRetriever,
};
use crate::storage::{Database, NewChunk};
use std::sync::Arc;
use tokio::sync::RwLock;

const DATABASE_FILE: &str = "chunks.db";
const KEYWORD_INDEX_DIR: &str = "keyword_index";

/// Everything one process needs to serve searches
///
/// Built once at startup and shared; the pipeline inside is safe to call
/// from any number of tasks.
pub struct SearchStack {
    database: Arc<Database>,
    vector_index: Arc<VectorIndex>,
    keyword_index: Arc<RwLock<KeywordIndex>>,
    reranker: Arc<RerankerHandle>,
    pipeline: HybridSearchPipeline,
}

impl SearchStack {
    /// Open storage under `storage.data_dir` with the given models
    pub async fn open(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Arc<RerankerHandle>,
    ) -> Result<Self> {
        if embedder.dimension() != config.embedding.dimension {
            return Err(RagError::InvalidConfigValue {
                path: "embedding.dimension".to_string(),
                message: format!(
                    "Model {} produces {}D vectors, configured {}D",
                    embedder.model_name(),
                    embedder.dimension(),
                    config.embedding.dimension
                ),
            });
        }

        let data_dir = &config.storage.data_dir;
        let database = Arc::new(Database::new(
            &data_dir.join(DATABASE_FILE),
            config.storage.pool_size,
        )?);

        let vector_index = Arc::new(
            VectorIndex::new(
                config.embedding.dimension,
                config.indexing.hnsw_ef_construction,
                config.indexing.hnsw_m,
                config.indexing.max_elements,
            )
            .map_err(anyhow::Error::from)?,
        );

        let keyword_index = Arc::new(RwLock::new(
            KeywordIndex::open(&data_dir.join(KEYWORD_INDEX_DIR)).map_err(anyhow::Error::from)?,
        ));

        if config.reranker.preload {
            if let Err(e) = reranker.warm_up().await {
                tracing::warn!("Reranker preload failed, searches will use fusion order: {}", e);
            }
        }

        let dense = Arc::new(DenseRetriever::new(
            embedder,
            vector_index.clone(),
            database.clone(),
            &config.retrieval,
        ));
        let sparse = Arc::new(SparseRetriever::new(keyword_index.clone(), database.clone()));
        let pipeline = HybridSearchPipeline::new(
            dense,
            sparse,
            Some(reranker.clone()),
            PipelineConfig::from(config),
        );

        tracing::info!("Search stack ready at {:?}", data_dir);

        Ok(Self {
            database,
            vector_index,
            keyword_index,
            reranker,
            pipeline,
        })
    }

    /// Open with the configured FastEmbed embedding and reranker models
    pub async fn open_with_fastembed(config: &Config) -> Result<Self> {
        let model = config.embedding.model.clone();
        let embedder = tokio::task::spawn_blocking(move || FastEmbedProvider::new(&model))
            .await
            .map_err(anyhow::Error::from)?
            .map_err(anyhow::Error::from)?;
        let reranker = Arc::new(RerankerHandle::fastembed(config.reranker.model.clone()));

        Self::open(config, Arc::new(embedder), reranker).await
    }

    pub fn pipeline(&self) -> &HybridSearchPipeline {
        &self.pipeline
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn reranker(&self) -> &Arc<RerankerHandle> {
        &self.reranker
    }

    /// Store a pre-embedded chunk and stage it in both indexes
    ///
    /// The embedding is checked against the vector index before the row is
    /// written, so a rejected embedding leaves the store untouched. Keyword
    /// matches become visible after [`commit`](Self::commit).
    pub async fn index_chunk(&self, chunk: &NewChunk, embedding: &[f32]) -> Result<i64> {
        self.vector_index
            .check_insertable(embedding)
            .map_err(anyhow::Error::from)?;
        let seq = self.database.insert_chunk(chunk)?;

        self.vector_index
            .insert(seq as u64, embedding)
            .map_err(anyhow::Error::from)?;
        self.keyword_index
            .write()
            .await
            .insert(seq as u64, &chunk.domain, &chunk.content)
            .map_err(anyhow::Error::from)?;

        Ok(seq)
    }

    pub async fn commit(&self) -> Result<()> {
        self.keyword_index
            .write()
            .await
            .commit()
            .map_err(anyhow::Error::from)?;
        Ok(())
    }

    /// Release the reranker model
    pub async fn shutdown(&self) {
        self.reranker.shutdown().await;
    }
}
