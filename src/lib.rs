//! ragcore - hybrid retrieval core for retrieval-augmented generation
//!
//! Runs semantic and keyword sub-queries concurrently against pre-populated
//! indexes, merges and deduplicates the hits, reranks them with a
//! cross-encoder and returns a thresholded top-k for the generation prompt.

pub mod config;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod retrieval;
pub mod stack;
pub mod storage;

pub use config::{Config, DomainConfig};
pub use error::{RagError, Result, ValidationError};
pub use retrieval::{HybridSearchPipeline, SearchError, SearchRequest, SearchResponse};
pub use stack::SearchStack;
