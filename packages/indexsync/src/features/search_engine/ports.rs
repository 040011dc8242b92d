//! Search Engine Port (Trait Interface)
//!
//! Request/response operations the runtime needs from a document search
//! engine. Indexes are addressed by name; documents by `(doc_type, id)`.
//!
//! Adapters:
//! - `MemorySearchEngine`: records every call, used by tests and dry runs
//! - `TantivySearchEngine`: embedded full-text engine (RAM or directory)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("index is closed: {0}")]
    IndexClosed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("tantivy: {0}")]
    Tantivy(#[from] tantivy::TantivyError),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// One item of a bulk request
#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    Index {
        doc_type: String,
        id: String,
        body: Value,
    },
    Delete {
        doc_type: String,
        id: String,
    },
}

impl BulkAction {
    pub fn id(&self) -> &str {
        match self {
            BulkAction::Index { id, .. } | BulkAction::Delete { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemError {
    pub id: String,
    pub reason: String,
}

/// Per-item outcome of a bulk request; the request itself never fails on item errors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    /// Number of items the engine accepted
    pub items: usize,
    pub errors: Vec<BulkItemError>,
}

/// Structured predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All,
    /// Exact value of a field (dotted paths reach into composites)
    Term { field: String, value: Value },
    /// Analyzed full-text match; every token must match
    Match { field: String, text: String },
    Ids(Vec<String>),
    And(Vec<Predicate>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub doc_type: Option<String>,
    pub predicate: Predicate,
    pub from: usize,
    pub size: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            doc_type: None,
            predicate: Predicate::All,
            from: 0,
            size: 10,
        }
    }
}

impl SearchQuery {
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            ..Self::default()
        }
    }

    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    /// 1-based page of `per_page` hits
    pub fn page(mut self, page: usize, per_page: usize) -> Self {
        self.from = page.saturating_sub(1) * per_page;
        self.size = per_page;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub doc_type: String,
    pub score: f32,
    pub source: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    /// Matches before `from`/`size` are applied
    pub total: usize,
    pub hits: Vec<SearchHit>,
}

/// Search Engine Port
pub trait SearchEngine: Send + Sync {
    /// Returns whether the index existed
    fn delete_index(&self, index: &str) -> EngineResult<bool>;

    fn create_index(&self, index: &str) -> EngineResult<()>;

    fn index_exists(&self, index: &str) -> bool;

    /// Define or replace the mapping of one document type
    fn put_mapping(&self, index: &str, doc_type: &str, mapping: &Value) -> EngineResult<()>;

    /// Index-level settings; only accepted while the index is closed
    fn put_settings(&self, index: &str, settings: &Value) -> EngineResult<()>;

    fn close_index(&self, index: &str) -> EngineResult<()>;

    fn open_index(&self, index: &str) -> EngineResult<()>;

    /// Upsert one document
    fn index_document(&self, index: &str, doc_type: &str, id: &str, body: &Value)
        -> EngineResult<()>;

    /// Returns whether the document existed
    fn delete_document(&self, index: &str, doc_type: &str, id: &str) -> EngineResult<bool>;

    fn bulk(&self, index: &str, actions: Vec<BulkAction>) -> EngineResult<BulkResponse>;

    fn search(&self, index: &str, query: &SearchQuery) -> EngineResult<SearchResponse>;

    /// Make previous writes visible to search
    fn refresh(&self, index: &str) -> EngineResult<()>;
}

/// Value at a dotted path; arrays along the way fan out
pub fn values_at<'a>(source: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![source];
    for segment in path.split('.') {
        current = current
            .into_iter()
            .flat_map(|value| match value {
                Value::Array(items) => items.iter().filter_map(|i| i.get(segment)).collect(),
                other => other.get(segment).into_iter().collect::<Vec<_>>(),
            })
            .collect();
    }
    current
        .into_iter()
        .flat_map(|value| match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        })
        .collect()
}
