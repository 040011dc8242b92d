//! Search engine port and adapters

pub mod memory;
pub mod ports;
pub mod tantivy_engine;

pub use self::memory::{EngineCall, MemorySearchEngine, Upsert};
pub use self::ports::{
    values_at, BulkAction, BulkItemError, BulkResponse, EngineError, EngineResult, Predicate,
    SearchEngine, SearchHit, SearchQuery, SearchResponse,
};
pub use self::tantivy_engine::TantivySearchEngine;
