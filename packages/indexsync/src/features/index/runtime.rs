//! Index Runtime
//!
//! Binds compiled indexes to search engine connections and performs the
//! engine-facing operations: schema push, single and bulk upserts,
//! time-windowed backfill, search and hit loading.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use indexsync_storage::{Record, RecordId, RecordQuery, RecordStore};

use super::compiler::CompiledIndex;
use super::registry::IndexRegistry;
use crate::config::{ConfigError, EngineKind, SyncConfig};
use crate::errors::Result;
use crate::features::fields::{NoTemplates, ResolveContext, TemplateRenderer};
use crate::features::search_engine::{
    BulkAction, BulkItemError, EngineError, MemorySearchEngine, SearchEngine, SearchQuery,
    SearchResponse, TantivySearchEngine,
};

/// Placeholder replaced by the doc type in connection index name patterns
pub const DOC_TYPE_PLACEHOLDER: &str = "{doc_type}";

/// A search engine endpoint plus its index naming pattern
#[derive(Clone)]
pub struct EngineBinding {
    pub engine: Arc<dyn SearchEngine>,
    pub index_name: String,
}

impl EngineBinding {
    pub fn new(engine: Arc<dyn SearchEngine>, index_name: impl Into<String>) -> Self {
        Self {
            engine,
            index_name: index_name.into(),
        }
    }

    pub fn index_name_for(&self, doc_type: &str) -> String {
        self.index_name.replace(DOC_TYPE_PLACEHOLDER, doc_type)
    }
}

/// Result of a bulk upsert
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOutcome {
    pub total: usize,
    pub success_count: usize,
    pub errors: Vec<BulkItemError>,
    pub duration: Duration,
}

impl BulkOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.success_count == self.total
    }

    fn absorb(&mut self, other: BulkOutcome) {
        self.total += other.total;
        self.success_count += other.success_count;
        self.errors.extend(other.errors);
        self.duration += other.duration;
    }
}

pub struct IndexRuntime {
    registry: Arc<IndexRegistry>,
    store: Arc<dyn RecordStore>,
    connections: BTreeMap<String, EngineBinding>,
    renderer: Arc<dyn TemplateRenderer>,
}

impl std::fmt::Debug for IndexRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRuntime")
            .field("connections", &self.connections.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

pub struct IndexRuntimeBuilder {
    registry: Arc<IndexRegistry>,
    store: Arc<dyn RecordStore>,
    connections: BTreeMap<String, EngineBinding>,
    renderer: Arc<dyn TemplateRenderer>,
}

impl IndexRuntimeBuilder {
    pub fn connection(
        mut self,
        name: impl Into<String>,
        engine: Arc<dyn SearchEngine>,
        index_name: impl Into<String>,
    ) -> Self {
        self.connections
            .insert(name.into(), EngineBinding::new(engine, index_name));
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Every registered index must name a configured connection
    pub fn build(self) -> Result<IndexRuntime> {
        for index in self.registry.iter() {
            if !self.connections.contains_key(index.connection()) {
                return Err(ConfigError::UnknownConnection {
                    name: index.connection().to_string(),
                    configured: self.connections.keys().cloned().collect(),
                }
                .into());
            }
        }
        Ok(IndexRuntime {
            registry: self.registry,
            store: self.store,
            connections: self.connections,
            renderer: self.renderer,
        })
    }
}

impl IndexRuntime {
    pub fn builder(registry: Arc<IndexRegistry>, store: Arc<dyn RecordStore>) -> IndexRuntimeBuilder {
        IndexRuntimeBuilder {
            registry,
            store,
            connections: BTreeMap::new(),
            renderer: Arc::new(NoTemplates),
        }
    }

    /// Runtime whose connections are built from configuration
    pub fn from_config(
        config: &SyncConfig,
        registry: Arc<IndexRegistry>,
        store: Arc<dyn RecordStore>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Result<Self> {
        let mut builder = Self::builder(registry, store).renderer(renderer);
        for (name, connection) in &config.connections {
            let engine: Arc<dyn SearchEngine> = match (connection.engine, &connection.path) {
                (EngineKind::Memory, _) => Arc::new(MemorySearchEngine::new()),
                (EngineKind::Tantivy, Some(path)) => Arc::new(TantivySearchEngine::in_dir(path.clone())),
                (EngineKind::Tantivy, None) => Arc::new(TantivySearchEngine::in_ram()),
            };
            builder = builder.connection(name.clone(), engine, connection.index_name.clone());
        }
        builder.build()
    }

    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn connection(&self, name: &str) -> Option<&EngineBinding> {
        self.connections.get(name)
    }

    pub fn bind(&self, index: &Arc<CompiledIndex>) -> Result<BoundIndex> {
        let binding = self.connections.get(index.connection()).ok_or_else(|| {
            ConfigError::UnknownConnection {
                name: index.connection().to_string(),
                configured: self.connections.keys().cloned().collect(),
            }
        })?;
        Ok(BoundIndex {
            index: Arc::clone(index),
            index_name: binding.index_name_for(index.doc_type()),
            engine: Arc::clone(&binding.engine),
            store: Arc::clone(&self.store),
            renderer: Arc::clone(&self.renderer),
        })
    }

    /// Every registered index, bound, in registry order
    pub fn bound_indexes(&self) -> Result<Vec<BoundIndex>> {
        self.registry.iter().map(|index| self.bind(index)).collect()
    }
}

/// A compiled index bound to its engine connection
#[derive(Clone)]
pub struct BoundIndex {
    index: Arc<CompiledIndex>,
    index_name: String,
    engine: Arc<dyn SearchEngine>,
    store: Arc<dyn RecordStore>,
    renderer: Arc<dyn TemplateRenderer>,
}

impl BoundIndex {
    pub fn index(&self) -> &Arc<CompiledIndex> {
        &self.index
    }

    /// Engine-side index name
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn engine(&self) -> &Arc<dyn SearchEngine> {
        &self.engine
    }

    fn context(&self) -> ResolveContext<'_> {
        ResolveContext::new(self.store.as_ref(), self.renderer.as_ref())
    }

    /// Recreate the engine index from the compiled schema.
    ///
    /// Settings are applied with the index closed; it is reopened even when
    /// the settings request fails, and that failure is returned afterwards.
    pub fn push_schema(&self) -> Result<()> {
        let name = &self.index_name;
        let doc_type = self.index.doc_type();
        let schema = self.index.compile_schema();
        let mapping = &schema[doc_type];

        if self.engine.delete_index(name)? {
            debug!(index = %name, "Deleted index");
        }
        self.engine.create_index(name)?;
        debug!(index = %name, "Created index");

        match self.engine.put_mapping(name, doc_type, mapping) {
            Err(EngineError::IndexNotFound(_)) => {
                self.engine.create_index(name)?;
                self.engine.put_mapping(name, doc_type, mapping)?;
            }
            other => other?,
        }

        let Some(settings) = self.index.settings() else {
            return Ok(());
        };
        self.engine.close_index(name)?;
        let applied = self.engine.put_settings(name, settings);
        let reopened = self.engine.open_index(name);
        match &applied {
            Ok(()) => debug!(index = %name, "Applied index settings"),
            Err(e) => warn!(index = %name, error = %e, "Failed to apply index settings"),
        }
        applied?;
        reopened?;
        Ok(())
    }

    pub fn prepare(&self, record: &Record) -> Result<Value> {
        self.index.prepare(record, &self.context())
    }

    pub fn upsert_one(&self, record: &Record) -> Result<()> {
        let body = self.prepare(record)?;
        self.engine.index_document(
            &self.index_name,
            self.index.doc_type(),
            &record.id.to_string(),
            &body,
        )?;
        Ok(())
    }

    /// Returns whether a document was removed
    pub fn remove_one(&self, id: RecordId) -> Result<bool> {
        let removed =
            self.engine
                .delete_document(&self.index_name, self.index.doc_type(), &id.to_string())?;
        if removed {
            debug!(index = %self.index_name, id = %id, "Removed document");
        }
        Ok(removed)
    }

    /// Bulk upsert in chunks of `index_by`. A document that fails to prepare
    /// aborts the whole call; engine rejections are collected per item.
    pub fn upsert_many(&self, records: &[Record]) -> Result<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        for chunk in records.chunks(self.index.index_by()) {
            outcome.absorb(self.upsert_chunk(chunk)?);
        }
        Ok(outcome)
    }

    fn upsert_chunk(&self, chunk: &[Record]) -> Result<BulkOutcome> {
        let start = Instant::now();
        let doc_type = self.index.doc_type();

        let actions = chunk
            .par_iter()
            .map(|record| {
                Ok(BulkAction::Index {
                    doc_type: doc_type.to_string(),
                    id: record.id.to_string(),
                    body: self.prepare(record)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let response = self.engine.bulk(&self.index_name, actions)?;
        for error in &response.errors {
            warn!(
                index = %self.index_name,
                id = %error.id,
                reason = %error.reason,
                "Bulk item failed"
            );
        }

        Ok(BulkOutcome {
            total: chunk.len(),
            success_count: response.items,
            errors: response.errors,
            duration: start.elapsed(),
        })
    }

    /// Records of the index type inside the modification window
    pub fn backfill_queryset(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        let date_field = self.index.date_field();
        let mut query = RecordQuery::all();
        if let Some(since) = since {
            query = query.modified_since(date_field, since);
        }
        if let Some(until) = until {
            query = query.modified_until(date_field, until);
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        Ok(self.store.query(self.index.record_type(), &query)?)
    }

    pub fn backfill(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<BulkOutcome> {
        let records = self.backfill_queryset(since, until, limit)?;
        let outcome = self.upsert_many(&records)?;
        info!(
            index = %self.index.key(),
            total = outcome.total,
            succeeded = outcome.success_count,
            "Backfilled index"
        );
        Ok(outcome)
    }

    /// Search this index; the doc type defaults to the index's own
    pub fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
        let scoped;
        let query = match &query.doc_type {
            Some(_) => query,
            None => {
                scoped = query.clone().doc_type(self.index.doc_type());
                &scoped
            }
        };
        Ok(self.engine.search(&self.index_name, query)?)
    }

    /// Records behind `response`'s hits in hit order; vanished records are skipped
    pub fn load_records(&self, response: &SearchResponse) -> Result<Vec<Record>> {
        let ids: Vec<RecordId> = response
            .hits
            .iter()
            .filter_map(|hit| hit.id.parse::<i64>().ok().map(RecordId))
            .collect();
        let mut by_id: BTreeMap<RecordId, Record> = self
            .store
            .get_many(self.index.record_type(), &ids)?
            .into_iter()
            .map(|record| (record.id, record))
            .collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    pub fn refresh(&self) -> Result<()> {
        self.engine.refresh(&self.index_name)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SyncError;
    use crate::features::analysis::Analyzer;
    use crate::features::fields::{FieldDeclaration, FnRenderer, RenderContext};
    use crate::features::index::IndexDeclaration;
    use crate::features::search_engine::{EngineCall, Predicate};
    use indexsync_storage::{AttributeMeta, MemoryRecordStore, RecordTypeMeta};
    use serde_json::json;

    fn fixture() -> (Arc<MemoryRecordStore>, Arc<MemorySearchEngine>) {
        let store = Arc::new(MemoryRecordStore::new());
        store.register_type(
            RecordTypeMeta::new("blog.post")
                .attribute(AttributeMeta::text("title"))
                .attribute(AttributeMeta::integer("views"))
                .attribute(AttributeMeta::datetime("modified_on").auto_now()),
        );
        (store, Arc::new(MemorySearchEngine::new()))
    }

    fn bound(
        store: &Arc<MemoryRecordStore>,
        engine: &Arc<MemorySearchEngine>,
        decl: IndexDeclaration,
    ) -> BoundIndex {
        let mut registry = IndexRegistry::new();
        let index = registry.register(store.as_ref(), &decl).unwrap();
        let runtime = IndexRuntime::builder(registry.freeze(), store.clone())
            .connection("default", engine.clone(), "test_{doc_type}")
            .renderer(Arc::new(FnRenderer::new(|template: &str, _: &RenderContext<'_>| {
                Ok(format!("rendered {}", template))
            })))
            .build()
            .unwrap();
        runtime.bind(&index).unwrap()
    }

    #[test]
    fn test_unknown_connection_rejected() {
        let (store, engine) = fixture();
        let mut registry = IndexRegistry::new();
        registry
            .register(
                store.as_ref(),
                &IndexDeclaration::new("blog.post", "search").connection("archive"),
            )
            .unwrap();
        let result = IndexRuntime::builder(registry.freeze(), store)
            .connection("default", engine, "{doc_type}")
            .build();
        assert!(matches!(
            result,
            Err(SyncError::Config(ConfigError::UnknownConnection { .. }))
        ));
    }

    #[test]
    fn test_push_schema_without_settings() {
        let (store, engine) = fixture();
        let index = bound(
            &store,
            &engine,
            IndexDeclaration::new("blog.post", "search").attribute_fields(["title"]),
        );
        index.push_schema().unwrap();

        assert_eq!(index.index_name(), "test_blog_post_search");
        let calls = engine.calls();
        assert_eq!(calls[0], EngineCall::DeleteIndex("test_blog_post_search".into()));
        assert_eq!(calls[1], EngineCall::CreateIndex("test_blog_post_search".into()));
        assert!(matches!(&calls[2], EngineCall::PutMapping { doc_type, .. } if doc_type == "blog_post_search"));
        assert_eq!(calls.len(), 3);
        assert_eq!(
            engine.mapping("test_blog_post_search", "blog_post_search"),
            Some(json!({"properties": {"pk": {"type": "integer"}, "title": {"type": "string"}}}))
        );
    }

    #[test]
    fn test_push_schema_reopens_after_failed_settings() {
        let (store, engine) = fixture();
        let index = bound(
            &store,
            &engine,
            IndexDeclaration::new("blog.post", "search")
                .field("title", FieldDeclaration::string().analyzer(Analyzer::ngram(2, 3))),
        );
        engine.fail_settings(true);

        assert!(index.push_schema().is_err());
        let calls = engine.calls();
        let tail: Vec<_> = calls.iter().rev().take(3).rev().cloned().collect();
        assert!(matches!(tail[0], EngineCall::CloseIndex(_)));
        assert!(matches!(tail[1], EngineCall::PutSettings { .. }));
        assert!(matches!(tail[2], EngineCall::OpenIndex(_)));
        assert_eq!(engine.is_open("test_blog_post_search"), Some(true));
    }

    #[test]
    fn test_upsert_many_chunks_and_collects_errors() {
        let (store, engine) = fixture();
        let index = bound(
            &store,
            &engine,
            IndexDeclaration::new("blog.post", "search")
                .attribute_fields(["title"])
                .index_by(2),
        );
        index.push_schema().unwrap();

        let records: Vec<Record> = (0..5)
            .map(|i| {
                store
                    .save(Record::new("blog.post").with("title", format!("Post {}", i)))
                    .unwrap()
            })
            .collect();
        engine.reject_id(records[3].id.to_string());
        engine.clear_calls();

        let outcome = index.upsert_many(&records).unwrap();
        assert_eq!(outcome.total, 5);
        assert_eq!(outcome.success_count, 4);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].id, records[3].id.to_string());
        assert!(!outcome.is_complete());

        let bulks = engine
            .calls()
            .into_iter()
            .filter(|c| matches!(c, EngineCall::Bulk { .. }))
            .count();
        assert_eq!(bulks, 3);
    }

    #[test]
    fn test_render_failure_aborts_bulk() {
        let (store, engine) = fixture();
        let mut registry = IndexRegistry::new();
        let compiled = registry
            .register(
                store.as_ref(),
                &IndexDeclaration::new("blog.post", "search").template_fields(["body"]),
            )
            .unwrap();
        let runtime = IndexRuntime::builder(registry.freeze(), store.clone())
            .connection("default", engine.clone(), "{doc_type}")
            .build()
            .unwrap();
        let index = runtime.bind(&compiled).unwrap();
        index.push_schema().unwrap();

        let record = store.save(Record::new("blog.post").with("title", "x")).unwrap();
        let err = index.upsert_many(&[record]).unwrap_err();
        assert!(matches!(err, SyncError::Render { .. }));
        assert!(engine.upserts().is_empty());
    }

    #[test]
    fn test_backfill_window_and_limit() {
        let (store, engine) = fixture();
        let index = bound(&store, &engine, IndexDeclaration::new("blog.post", "search"));
        index.push_schema().unwrap();

        let before = Utc::now() - chrono::Duration::seconds(1);
        for i in 0..3 {
            store
                .save(Record::new("blog.post").with("title", format!("Post {}", i)))
                .unwrap();
        }
        let after = Utc::now() + chrono::Duration::seconds(1);

        assert_eq!(index.backfill_queryset(Some(before), None, None).unwrap().len(), 3);
        assert!(index.backfill_queryset(Some(after), None, None).unwrap().is_empty());
        assert!(index.backfill_queryset(None, Some(before), None).unwrap().is_empty());
        assert_eq!(index.backfill_queryset(None, None, Some(2)).unwrap().len(), 2);

        let outcome = index.backfill(None, None, None).unwrap();
        assert_eq!(outcome.success_count, 3);
        assert_eq!(engine.document_count("test_blog_post_search"), 3);
    }

    #[test]
    fn test_search_and_load_records_in_hit_order() {
        let (store, engine) = fixture();
        let index = bound(
            &store,
            &engine,
            IndexDeclaration::new("blog.post", "search").attribute_fields(["title"]),
        );
        index.push_schema().unwrap();

        let first = store.save(Record::new("blog.post").with("title", "rust tips")).unwrap();
        let second = store.save(Record::new("blog.post").with("title", "more rust")).unwrap();
        index.upsert_many(&[first.clone(), second.clone()]).unwrap();
        index.refresh().unwrap();

        let response = index
            .search(&SearchQuery::new(Predicate::Match {
                field: "title".into(),
                text: "rust".into(),
            }))
            .unwrap();
        assert_eq!(response.total, 2);

        store.delete(&first.reference()).unwrap();
        let loaded = index.load_records(&response).unwrap();
        assert_eq!(loaded, vec![second]);
    }

    #[test]
    fn test_remove_one() {
        let (store, engine) = fixture();
        let index = bound(&store, &engine, IndexDeclaration::new("blog.post", "search"));
        index.push_schema().unwrap();
        let record = store.save(Record::new("blog.post").with("title", "x")).unwrap();

        index.upsert_one(&record).unwrap();
        assert!(index.remove_one(record.id).unwrap());
        assert!(!index.remove_one(record.id).unwrap());
    }
}
