//! SQLite chunk store with migrations
//!
//! Holds the text and metadata of every indexed chunk. Both index postings
//! carry the chunk's integer `seq`; retrievers hydrate hits through here.

use crate::error::{RagError, Result};
use crate::retrieval::ChunkMetadata;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// A chunk row
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// Integer key shared with the vector and keyword indexes
    pub seq: i64,
    /// Stable chunk identifier, unique across domains
    pub chunk_id: String,
    pub domain: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// A chunk to be written
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_id: String,
    pub domain: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Pooled chunk store
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (or create) the chunk store at `db_path`
    pub fn new(db_path: &Path, pool_size: u32) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        // Per-connection pragmas; WAL lets readers run alongside a writer
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder().max_size(pool_size).build(manager)?;

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Insert a chunk, returning its `seq`
    pub fn insert_chunk(&self, chunk: &NewChunk) -> Result<i64> {
        let conn = self.get_conn()?;
        let metadata = serde_json::to_string(&chunk.metadata).map_err(|e| RagError::Json {
            source: e,
            context: format!("Failed to encode metadata for chunk {}", chunk.chunk_id),
        })?;

        conn.execute(
            "INSERT INTO chunks (chunk_id, domain, content, header, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                chunk.chunk_id,
                chunk.domain,
                chunk.content,
                chunk.metadata.header,
                metadata
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Fetch chunks by `seq`, restricted to one domain
    ///
    /// Unknown or out-of-domain seqs are absent from the returned map.
    pub fn get_chunks(&self, domain: &str, seqs: &[i64]) -> Result<HashMap<i64, ChunkRecord>> {
        if seqs.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.get_conn()?;
        let placeholders = vec!["?"; seqs.len()].join(", ");
        let sql = format!(
            "SELECT seq, chunk_id, domain, content, header, metadata
             FROM chunks WHERE domain = ? AND seq IN ({})",
            placeholders
        );

        let mut stmt = conn.prepare(&sql)?;
        let bind = std::iter::once(rusqlite::types::Value::from(domain.to_string()))
            .chain(seqs.iter().map(|s| rusqlite::types::Value::from(*s)));

        let rows = stmt.query_map(params_from_iter(bind), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut chunks = HashMap::with_capacity(seqs.len());
        for row in rows {
            let (seq, chunk_id, domain, content, header, metadata_json) = row?;
            let mut metadata = parse_metadata(&chunk_id, metadata_json.as_deref());
            if metadata.header.is_none() {
                metadata.header = header;
            }

            chunks.insert(
                seq,
                ChunkRecord {
                    seq,
                    chunk_id,
                    domain,
                    content,
                    metadata,
                },
            );
        }

        Ok(chunks)
    }

    /// Look up a chunk's `seq` by its chunk_id
    pub fn seq_of(&self, chunk_id: &str) -> Result<Option<i64>> {
        let conn = self.get_conn()?;
        let seq = conn
            .query_row(
                "SELECT seq FROM chunks WHERE chunk_id = ?1",
                params![chunk_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq)
    }

    /// Number of chunks in a domain
    pub fn count(&self, domain: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE domain = ?1",
            params![domain],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn parse_metadata(chunk_id: &str, json: Option<&str>) -> ChunkMetadata {
    match json {
        Some(json) => serde_json::from_str(json).unwrap_or_else(|e| {
            tracing::warn!("Invalid metadata for chunk {}: {}", chunk_id, e);
            ChunkMetadata::default()
        }),
        None => ChunkMetadata::default(),
    }
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Chunk table
    r#"
    CREATE TABLE chunks (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        chunk_id TEXT NOT NULL UNIQUE,
        domain TEXT NOT NULL,
        content TEXT NOT NULL,
        header TEXT,
        metadata TEXT  -- JSON metadata
    );

    CREATE INDEX idx_chunks_domain ON chunks(domain);
    "#,
];
