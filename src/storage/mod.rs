//! Storage layer: the pooled chunk store backing both retrievers

pub mod database;

pub use database::{ChunkRecord, Database, DbPool, NewChunk};
