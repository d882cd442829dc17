//! Query embedding and the two pre-populated indexes
//!
//! - EmbeddingProvider trait, with FastEmbed for local query embedding
//! - HNSW vector index (cosine) for the dense backend
//! - Tantivy BM25 keyword index for the sparse backend
//!
//! Both indexes key postings by the chunk store's `seq`.

mod keyword_index;
mod provider;
mod vector_index;

pub use keyword_index::{KeywordIndex, KeywordIndexError, KeywordSearchResult};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use vector_index::{SearchResult, VectorIndex, VectorIndexError};
