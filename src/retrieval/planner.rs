//! Seam for the upstream query planner

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    #[error("Query planning failed: {0}")]
    Failed(String),

    #[error("Planner returned an unusable plan: {0}")]
    InvalidPlan(String),
}

/// Search phrasings derived from one user question
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Rephrasings for semantic search
    pub vector_queries: Vec<String>,
    /// Keywords for full-text search
    pub fts_keywords: Vec<String>,
}

/// Turns a question into search phrasings, typically by asking an LLM
#[async_trait]
pub trait QueryPlanner: Send + Sync {
    async fn plan(&self, question: &str, domain: &str) -> Result<QueryPlan, PlannerError>;
}
