use crate::config::{Config, DomainConfig};
use crate::error::{RagError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_reranker(config, &mut errors);
        Self::validate_domains(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RagError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.storage.pool_size == 0 {
            errors.push(ValidationError::new(
                "storage.pool_size",
                "Pool size must be greater than 0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if config.indexing.max_elements == 0 {
            errors.push(ValidationError::new(
                "indexing.max_elements",
                "HNSW max_elements must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;
        let positive = [
            ("retrieval.timeout_ms", retrieval.timeout_ms as usize),
            ("retrieval.max_workers", retrieval.max_workers),
            ("retrieval.max_vector_queries", retrieval.max_vector_queries),
            ("retrieval.max_fts_keywords", retrieval.max_fts_keywords),
            ("retrieval.rerank_candidates", retrieval.rerank_candidates),
            ("retrieval.search_multiplier", retrieval.search_multiplier),
            ("retrieval.hnsw_ef_search", retrieval.hnsw_ef_search),
        ];

        for (path, value) in positive {
            if value == 0 {
                errors.push(ValidationError::new(path, "Value must be greater than 0"));
            }
        }
    }

    fn validate_reranker(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.reranker.model.is_empty() {
            errors.push(ValidationError::new(
                "reranker.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_domains(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.domains.is_empty() {
            errors.push(ValidationError::new(
                "domains",
                "At least one domain must be configured",
            ));
        }

        for (slug, domain) in &config.domains {
            if slug.trim().is_empty() {
                errors.push(ValidationError::new("domains", "Domain slug cannot be empty"));
            }
            Self::validate_domain(&format!("domains.{}", slug), domain, errors);
        }
    }

    /// Shared between config loading and request validation
    pub(crate) fn validate_domain(
        prefix: &str,
        domain: &DomainConfig,
        errors: &mut Vec<ValidationError>,
    ) {
        validate_search_settings(
            prefix,
            SearchSettings {
                min_score: domain.min_score,
                dense_weight: domain.dense_weight,
                sparse_weight: domain.sparse_weight,
                top_k_per_query: domain.top_k_per_query,
                final_top_k: domain.final_top_k,
            },
            errors,
        );
    }
}

/// The numeric knobs common to a domain config and a search request
pub(crate) struct SearchSettings {
    pub min_score: f32,
    pub dense_weight: f32,
    pub sparse_weight: f32,
    pub top_k_per_query: usize,
    pub final_top_k: usize,
}

pub(crate) fn validate_search_settings(
    prefix: &str,
    settings: SearchSettings,
    errors: &mut Vec<ValidationError>,
) {
    let field = |name: &str| {
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", prefix, name)
        }
    };

    if !settings.min_score.is_finite() || !(0.0..=1.0).contains(&settings.min_score) {
        errors.push(ValidationError::new(
            field("min_score"),
            format!(
                "Min score must be between 0.0 and 1.0, got {}",
                settings.min_score
            ),
        ));
    }

    for (name, weight) in [
        ("dense_weight", settings.dense_weight),
        ("sparse_weight", settings.sparse_weight),
    ] {
        if !weight.is_finite() || weight < 0.0 {
            errors.push(ValidationError::new(
                field(name),
                format!("Weight must be a non-negative number, got {}", weight),
            ));
        }
    }

    if settings.dense_weight == 0.0 && settings.sparse_weight == 0.0 {
        errors.push(ValidationError::new(
            field("dense_weight"),
            "Dense and sparse weights cannot both be zero",
        ));
    }

    if settings.top_k_per_query == 0 {
        errors.push(ValidationError::new(
            field("top_k_per_query"),
            "top_k_per_query must be greater than 0",
        ));
    }

    if settings.final_top_k == 0 {
        errors.push(ValidationError::new(
            field("final_top_k"),
            "final_top_k must be greater than 0",
        ));
    }
}
