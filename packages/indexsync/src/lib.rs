/*
 * indexsync - Search Index Synchronization
 *
 * Keeps search engine indexes in step with a relational record store:
 * - features/fields       : field declarations, attribute paths, templates
 * - features/index        : declaration compiler, registry, runtime
 * - features/propagation  : mutation observer, dependency fan-out, suspension
 * - features/search_engine: engine port + memory and tantivy adapters
 * - cli/                  : create-index / update-index
 */

#![allow(clippy::new_without_default)] // Builders read better with an explicit new()
#![allow(clippy::module_inception)] // Module naming intentional

//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use indexsync::{
//!     ChangePropagator, FieldDeclaration, IndexDeclaration, IndexRegistry, IndexRuntime,
//!     MemorySearchEngine,
//! };
//! use indexsync_storage::{AttributeMeta, MemoryRecordStore, Record, RecordTypeMeta};
//!
//! let store = Arc::new(MemoryRecordStore::new());
//! store.register_type(
//!     RecordTypeMeta::new("blog.post")
//!         .attribute(AttributeMeta::text("title"))
//!         .attribute(AttributeMeta::datetime("modified_on").auto_now()),
//! );
//!
//! let mut registry = IndexRegistry::new();
//! registry.register(
//!     store.as_ref(),
//!     &IndexDeclaration::new("blog.post", "search")
//!         .attribute_fields(["title"])
//!         .field("headline", FieldDeclaration::string().path("title")),
//! )?;
//!
//! let engine = Arc::new(MemorySearchEngine::new());
//! let runtime = Arc::new(
//!     IndexRuntime::builder(registry.freeze(), store.clone())
//!         .connection("default", engine.clone(), "{doc_type}")
//!         .build()?,
//! );
//! for index in runtime.bound_indexes()? {
//!     index.push_schema()?;
//! }
//! store.subscribe(Arc::new(ChangePropagator::new(runtime)));
//!
//! let post = store.save(Record::new("blog.post").with("title", "Hello"))?;
//! let doc = engine
//!     .document("blog_post_search", "blog_post_search", &post.id.to_string())
//!     .unwrap();
//! assert_eq!(doc["headline"], "Hello");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cli;
pub mod config;
pub mod errors;
pub mod features;

pub use config::{ConfigError, ConfigResult, ConnectionConfig, EngineKind, SyncConfig};
pub use errors::{Result, SyncError};

pub use features::analysis::{merge_settings, Analyzer, NgramSpec};
pub use features::fields::{
    FieldDeclaration, FieldKind, FieldSource, FnRenderer, Multiplicity, NoTemplates,
    RenderContext, RenderError, ResolveContext, ScalarKind, TemplateRenderer,
};
pub use features::index::{
    BoundIndex, BulkOutcome, CompiledIndex, IndexDeclaration, IndexKey, IndexRegistry,
    IndexRuntime,
};
pub use features::propagation::{ChangePropagator, ReplayReport, SuspensionScope};
pub use features::search_engine::{
    EngineError, MemorySearchEngine, Predicate, SearchEngine, SearchHit, SearchQuery,
    SearchResponse, TantivySearchEngine,
};
