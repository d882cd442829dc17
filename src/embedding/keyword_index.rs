/// Tantivy keyword index for domain-scoped BM25 search
use regex::Regex;
use std::path::{Path, PathBuf};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError};
use thiserror::Error;

const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),

    #[error("Query parsing error: {0}")]
    QueryParseError(String),
}

/// One keyword match
#[derive(Debug, Clone)]
pub struct KeywordSearchResult {
    /// Chunk `seq` the document was indexed under
    pub seq: u64,
    /// BM25 relevance score
    pub score: f32,
}

struct Fields {
    seq: Field,
    domain: Field,
    text: Field,
}

/// Tantivy keyword index wrapper
///
/// Documents carry their chunk `seq`, the owning domain (untokenized), and
/// the searchable text. Queries are always restricted to a single domain.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: IndexWriter,
    fields: Fields,
    query_syntax: Regex,
    index_path: Option<PathBuf>,
}

fn schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_u64_field("seq", INDEXED | STORED);
    schema_builder.add_text_field("domain", STRING | STORED);
    schema_builder.add_text_field("text", TEXT);
    schema_builder.build()
}

impl KeywordIndex {
    /// Open the index in `index_path`, creating it if absent
    pub fn open(index_path: &Path) -> Result<Self, KeywordIndexError> {
        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(index_path)
                .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?
        } else {
            std::fs::create_dir_all(index_path)?;
            Index::create_in_dir(index_path, schema())
                .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?
        };

        Self::from_index(index, Some(index_path.to_path_buf()))
    }

    /// Create a throwaway index held in RAM
    pub fn in_memory() -> Result<Self, KeywordIndexError> {
        Self::from_index(Index::create_in_ram(schema()), None)
    }

    fn from_index(index: Index, index_path: Option<PathBuf>) -> Result<Self, KeywordIndexError> {
        let schema = index.schema();
        let field = |name: &str| {
            schema.get_field(name).map_err(|_| {
                KeywordIndexError::InitializationError(format!("Missing '{}' field in schema", name))
            })
        };
        let fields = Fields {
            seq: field("seq")?,
            domain: field("domain")?,
            text: field("text")?,
        };

        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        // Everything except letters, digits and whitespace is query syntax to tantivy
        let query_syntax = Regex::new(r"[^\p{L}\p{N}\s]+")
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer,
            fields,
            query_syntax,
            index_path,
        })
    }

    /// Stage a chunk's text for indexing; visible after [`commit`](Self::commit)
    pub fn insert(&mut self, seq: u64, domain: &str, text: &str) -> Result<(), KeywordIndexError> {
        let doc = doc!(
            self.fields.seq => seq,
            self.fields.domain => domain,
            self.fields.text => text,
        );

        self.writer
            .add_document(doc)
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        Ok(())
    }

    /// Commit all pending changes
    pub fn commit(&mut self) -> Result<(), KeywordIndexError> {
        self.writer
            .commit()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        self.reader
            .reload()
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        Ok(())
    }

    /// Reduce free-form keywords to plain terms
    ///
    /// Operators, quotes and field prefixes are dropped so user keywords
    /// never fail to parse. Lowercasing keeps AND/OR/NOT from acting as operators.
    pub fn sanitize_keywords(&self, keywords: &str) -> String {
        self.query_syntax
            .replace_all(keywords, " ")
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// BM25 search for `keywords` within one domain, best first
    ///
    /// Keywords with no searchable terms yield no results.
    pub fn search(
        &self,
        keywords: &str,
        domain: &str,
        limit: usize,
    ) -> Result<Vec<KeywordSearchResult>, KeywordIndexError> {
        let terms = self.sanitize_keywords(keywords);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let query_parser = QueryParser::for_index(&self.index, vec![self.fields.text]);
        let text_query = query_parser
            .parse_query(&terms)
            .map_err(|e| KeywordIndexError::QueryParseError(e.to_string()))?;
        let domain_query: Box<dyn Query> = Box::new(TermQuery::new(
            Term::from_field_text(self.fields.domain, domain),
            IndexRecordOption::Basic,
        ));
        let query = BooleanQuery::new(vec![(Occur::Must, text_query), (Occur::Must, domain_query)]);

        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved_doc: tantivy::TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let seq = retrieved_doc
                .get_first(self.fields.seq)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    KeywordIndexError::SearchError("Missing or invalid seq field".to_string())
                })?;

            results.push(KeywordSearchResult { seq, score });
        }

        Ok(results)
    }

    /// Number of committed documents
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Directory backing the index, `None` when held in RAM
    pub fn path(&self) -> Option<&Path> {
        self.index_path.as_deref()
    }
}
