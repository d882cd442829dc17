//! Configuration management for the retrieval core
//!
//! The pipeline never reads configuration on its own. Hosts load a [`Config`],
//! hand the runtime view to the pipeline at construction, and resolve a
//! [`DomainConfig`] into an immutable [`SearchRequest`] for every request.

use crate::error::{RagError, Result};
use crate::retrieval::SearchRequest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;
pub(crate) use validator::{validate_search_settings, SearchSettings};

/// Environment variable prefix for overrides (`RAGCORE_SECTION__KEY=value`)
const ENV_PREFIX: &str = "RAGCORE_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub domains: BTreeMap<String, DomainConfig>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
}

/// Chunk store location and pooling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub pool_size: u32,
}

/// Query embedding model for the dense backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
}

/// HNSW construction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
    pub max_elements: usize,
}

/// Fan-out, validation bounds and candidate sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Global fan-out deadline per request, in milliseconds
    pub timeout_ms: u64,
    /// Upper bound on concurrently running sub-queries per request
    pub max_workers: usize,
    /// Vector queries beyond this count are truncated
    pub max_vector_queries: usize,
    /// Keyword queries beyond this count are truncated
    pub max_fts_keywords: usize,
    /// Number of fused candidates handed to the reranker
    pub rerank_candidates: usize,
    /// Dense over-fetch factor applied before domain filtering
    pub search_multiplier: usize,
    /// HNSW search breadth
    pub hnsw_ef_search: usize,
}

/// Cross-encoder model handle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub model: String,
    /// Load the model at startup instead of on first use
    pub preload: bool,
}

/// Per-domain search defaults read by the caller at request-construction time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub min_score: f32,
    pub dense_weight: f32,
    pub sparse_weight: f32,
    pub top_k_per_query: usize,
    pub final_top_k: usize,
    pub use_reranker: bool,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            min_score: 0.3,
            dense_weight: 0.7,
            sparse_weight: 0.3,
            top_k_per_query: 5,
            final_top_k: 15,
            use_reranker: true,
        }
    }
}

impl DomainConfig {
    /// Resolve this domain's settings and a planned query set into a request
    pub fn request(
        &self,
        domain: impl Into<String>,
        vector_queries: Vec<String>,
        fts_keywords: Vec<String>,
    ) -> SearchRequest {
        SearchRequest {
            domain: domain.into(),
            query: None,
            vector_queries,
            fts_keywords,
            top_k_per_query: self.top_k_per_query,
            final_top_k: self.final_top_k,
            min_score: self.min_score,
            dense_weight: self.dense_weight,
            sparse_weight: self.sparse_weight,
            use_reranker: self.use_reranker,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RagError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Look up a configured domain
    pub fn domain(&self, slug: &str) -> Result<&DomainConfig> {
        self.domains.get(slug).ok_or_else(|| RagError::InvalidConfigValue {
            path: format!("domains.{}", slug),
            message: "Domain is not configured".to_string(),
        })
    }

    /// Apply environment variable overrides
    /// Environment variables in format: RAGCORE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    fn apply_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "RETRIEVAL__TIMEOUT_MS" => {
                self.retrieval.timeout_ms = parse_value(path, value)?;
            }
            "RETRIEVAL__MAX_WORKERS" => {
                self.retrieval.max_workers = parse_value(path, value)?;
            }
            "RETRIEVAL__RERANK_CANDIDATES" => {
                self.retrieval.rerank_candidates = parse_value(path, value)?;
            }
            "RERANKER__MODEL" => {
                self.reranker.model = value.to_string();
            }
            "RERANKER__PRELOAD" => {
                self.reranker.preload = parse_value(path, value)?;
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RagError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("ragcore").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| RagError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".ragcore"))
    }
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| RagError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        let mut domains = BTreeMap::new();
        domains.insert("products".to_string(), DomainConfig::default());
        domains.insert("compatibility".to_string(), DomainConfig::default());

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
            },
            storage: StorageConfig {
                data_dir: Self::default_data_dir().unwrap_or_else(|_| PathBuf::from(".ragcore")),
                pool_size: 16,
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
            },
            indexing: IndexingConfig {
                hnsw_ef_construction: 200,
                hnsw_m: 16,
                max_elements: 100_000,
            },
            retrieval: RetrievalConfig {
                timeout_ms: 5_000,
                max_workers: 8,
                max_vector_queries: 5,
                max_fts_keywords: 10,
                rerank_candidates: 30,
                search_multiplier: 3,
                hnsw_ef_search: 64,
            },
            reranker: RerankerConfig {
                model: "BAAI/bge-reranker-base".to_string(),
                preload: true,
            },
            domains,
        }
    }
}
