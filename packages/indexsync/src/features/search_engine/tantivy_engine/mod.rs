//! Tantivy Search Engine
//!
//! # Architecture
//!
//! ```text
//! put_mapping / put_settings → SchemaFields (+ tokenizers) → rebuild index
//!                                                             ↓
//! index_document / bulk → document_json → TantivyDocument → IndexWriter → commit
//! ```
//!
//! Tantivy schemas are fixed at creation, so every mapping or settings change
//! builds a new index generation and re-adds the stored `_source` of every
//! document. Writes commit immediately and reload the reader, so a write is
//! visible to the next search.
//!
//! On-disk indexes live under `<root>/<index>/g<generation>`; the engine keeps
//! mappings in memory and does not reopen directories left by an earlier process.

pub mod schema;
pub mod tokenizer;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value as _};
use tantivy::tokenizer::TokenStream;
use tantivy::{DateTime, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, warn};

use self::schema::{mapped_fields, uid, validate_mapping, MappedType, SchemaFields};
use self::tokenizer::register_analyzers;
use super::ports::{
    BulkAction, BulkItemError, BulkResponse, EngineError, EngineResult, Predicate, SearchEngine,
    SearchHit, SearchQuery, SearchResponse,
};
use crate::features::analysis::{merge_settings, ngram_analyzers};

const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Debug, Clone)]
enum Storage {
    Ram,
    Dir(PathBuf),
}

/// One built index generation
struct Live {
    index: Index,
    writer: IndexWriter,
    reader: IndexReader,
    fields: SchemaFields,
}

impl Live {
    fn build(
        storage: &Storage,
        name: &str,
        generation: u64,
        mappings: &BTreeMap<String, Value>,
        settings: &Value,
    ) -> EngineResult<Self> {
        let registered: BTreeSet<String> = ngram_analyzers(settings)
            .into_iter()
            .map(|(analyzer, _)| analyzer)
            .collect();
        let fields = SchemaFields::new(mapped_fields(mappings, &registered))?;

        let index = match storage {
            Storage::Ram => Index::create_in_ram(fields.schema.clone()),
            Storage::Dir(root) => {
                let dir = root.join(name).join(format!("g{}", generation));
                if dir.exists() {
                    std::fs::remove_dir_all(&dir).map_err(|e| {
                        EngineError::Internal(format!("Failed to clear {}: {}", dir.display(), e))
                    })?;
                }
                std::fs::create_dir_all(&dir).map_err(|e| {
                    EngineError::Internal(format!("Failed to create index dir: {}", e))
                })?;
                Index::create_in_dir(&dir, fields.schema.clone())?
            }
        };
        register_analyzers(&index, settings);

        let writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            index,
            writer,
            reader,
            fields,
        })
    }

    fn add(&mut self, doc_type: &str, id: &str, body: &Value) -> EngineResult<()> {
        let json = self.fields.document_json(doc_type, id, body);
        let document = TantivyDocument::parse_json(&self.fields.schema, &json.to_string())
            .map_err(|e| EngineError::InvalidInput(format!("document {}: {}", id, e)))?;
        self.writer
            .delete_term(Term::from_field_text(self.fields.uid, &uid(doc_type, id)));
        self.writer.add_document(document)?;
        Ok(())
    }

    fn remove(&mut self, doc_type: &str, id: &str) {
        self.writer
            .delete_term(Term::from_field_text(self.fields.uid, &uid(doc_type, id)));
    }

    fn contains(&self, doc_type: &str, id: &str) -> EngineResult<bool> {
        let query = TermQuery::new(
            Term::from_field_text(self.fields.uid, &uid(doc_type, id)),
            IndexRecordOption::Basic,
        );
        Ok(self.reader.searcher().search(&query, &Count)? > 0)
    }

    fn commit(&mut self) -> EngineResult<()> {
        self.writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    /// `(doc_type, id, source)` of every live document
    fn documents(&self) -> EngineResult<Vec<(String, String, Value)>> {
        let searcher = self.reader.searcher();
        let total = searcher.num_docs() as usize;
        if total == 0 {
            return Ok(Vec::new());
        }

        let top_docs = searcher.search(&AllQuery, &TopDocs::with_limit(total))?;
        let mut documents = Vec::with_capacity(top_docs.len());
        for (_, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            documents.push(self.decode(&doc)?);
        }
        Ok(documents)
    }

    fn decode(&self, doc: &TantivyDocument) -> EngineResult<(String, String, Value)> {
        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        let source = serde_json::from_str(&text(self.fields.source))
            .map_err(|e| EngineError::Internal(format!("Corrupt _source: {}", e)))?;
        Ok((text(self.fields.doc_type), text(self.fields.id), source))
    }
}

struct IndexState {
    name: String,
    open: bool,
    generation: u64,
    mappings: BTreeMap<String, Value>,
    settings: Value,
    live: Live,
}

impl IndexState {
    fn ensure_open(&self) -> EngineResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(EngineError::IndexClosed(self.name.clone()))
        }
    }

    /// Build the next generation from current mappings/settings and migrate documents
    fn rebuild(&mut self, storage: &Storage) -> EngineResult<()> {
        let documents = self.live.documents()?;
        let generation = self.generation + 1;
        let mut live = Live::build(storage, &self.name, generation, &self.mappings, &self.settings)?;
        for (doc_type, id, source) in &documents {
            if let Err(e) = live.add(doc_type, id, source) {
                warn!(index = %self.name, id = %id, error = %e, "Document dropped during rebuild");
            }
        }
        live.commit()?;

        self.live = live;
        let previous = self.generation;
        self.generation = generation;
        if let Storage::Dir(root) = storage {
            let stale = root.join(&self.name).join(format!("g{}", previous));
            if let Err(e) = std::fs::remove_dir_all(&stale) {
                warn!(path = %stale.display(), error = %e, "Failed to remove previous generation");
            }
        }
        debug!(index = %self.name, generation, documents = documents.len(), "Rebuilt index");
        Ok(())
    }
}

/// Tantivy-backed `SearchEngine`
pub struct TantivySearchEngine {
    storage: Storage,
    indexes: RwLock<BTreeMap<String, Arc<Mutex<IndexState>>>>,
}

impl TantivySearchEngine {
    pub fn in_ram() -> Self {
        Self {
            storage: Storage::Ram,
            indexes: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn in_dir(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: Storage::Dir(root.into()),
            indexes: RwLock::new(BTreeMap::new()),
        }
    }

    fn slot(&self, index: &str) -> EngineResult<Arc<Mutex<IndexState>>> {
        self.indexes
            .read()
            .get(index)
            .cloned()
            .ok_or_else(|| EngineError::IndexNotFound(index.to_string()))
    }
}

impl SearchEngine for TantivySearchEngine {
    fn delete_index(&self, index: &str) -> EngineResult<bool> {
        let existed = self.indexes.write().remove(index).is_some();
        if let Storage::Dir(root) = &self.storage {
            let dir = root.join(index);
            if dir.exists() {
                std::fs::remove_dir_all(&dir).map_err(|e| {
                    EngineError::Internal(format!("Failed to remove {}: {}", dir.display(), e))
                })?;
            }
        }
        debug!(index, existed, "Deleted index");
        Ok(existed)
    }

    fn create_index(&self, index: &str) -> EngineResult<()> {
        let mut indexes = self.indexes.write();
        if indexes.contains_key(index) {
            return Err(EngineError::IndexAlreadyExists(index.to_string()));
        }

        let mappings = BTreeMap::new();
        let settings = json!({});
        let live = Live::build(&self.storage, index, 0, &mappings, &settings)?;
        indexes.insert(
            index.to_string(),
            Arc::new(Mutex::new(IndexState {
                name: index.to_string(),
                open: true,
                generation: 0,
                mappings,
                settings,
                live,
            })),
        );
        debug!(index, "Created index");
        Ok(())
    }

    fn index_exists(&self, index: &str) -> bool {
        self.indexes.read().contains_key(index)
    }

    fn put_mapping(&self, index: &str, doc_type: &str, mapping: &Value) -> EngineResult<()> {
        validate_mapping(mapping)?;
        let slot = self.slot(index)?;
        let mut state = slot.lock();
        state.mappings.insert(doc_type.to_string(), mapping.clone());
        state.rebuild(&self.storage)
    }

    fn put_settings(&self, index: &str, settings: &Value) -> EngineResult<()> {
        let slot = self.slot(index)?;
        let mut state = slot.lock();
        if state.open {
            return Err(EngineError::InvalidInput(format!(
                "analysis settings of '{}' can only change while it is closed",
                index
            )));
        }
        let mut merged = state.settings.clone();
        merge_settings(&mut merged, settings).map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        state.settings = merged;
        state.rebuild(&self.storage)
    }

    fn close_index(&self, index: &str) -> EngineResult<()> {
        self.slot(index)?.lock().open = false;
        Ok(())
    }

    fn open_index(&self, index: &str) -> EngineResult<()> {
        self.slot(index)?.lock().open = true;
        Ok(())
    }

    fn index_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        body: &Value,
    ) -> EngineResult<()> {
        let slot = self.slot(index)?;
        let mut state = slot.lock();
        state.ensure_open()?;
        state.live.add(doc_type, id, body)?;
        state.live.commit()
    }

    fn delete_document(&self, index: &str, doc_type: &str, id: &str) -> EngineResult<bool> {
        let slot = self.slot(index)?;
        let mut state = slot.lock();
        state.ensure_open()?;
        let existed = state.live.contains(doc_type, id)?;
        if existed {
            state.live.remove(doc_type, id);
            state.live.commit()?;
        }
        Ok(existed)
    }

    fn bulk(&self, index: &str, actions: Vec<BulkAction>) -> EngineResult<BulkResponse> {
        let slot = self.slot(index)?;
        let mut state = slot.lock();
        state.ensure_open()?;

        let mut response = BulkResponse::default();
        for action in actions {
            let outcome = match &action {
                BulkAction::Index { doc_type, id, body } => state.live.add(doc_type, id, body),
                BulkAction::Delete { doc_type, id } => {
                    state.live.remove(doc_type, id);
                    Ok(())
                }
            };
            match outcome {
                Ok(()) => response.items += 1,
                Err(e) => response.errors.push(BulkItemError {
                    id: action.id().to_string(),
                    reason: e.to_string(),
                }),
            }
        }
        state.live.commit()?;
        Ok(response)
    }

    fn search(&self, index: &str, query: &SearchQuery) -> EngineResult<SearchResponse> {
        let slot = self.slot(index)?;
        let state = slot.lock();
        state.ensure_open()?;
        let live = &state.live;

        let Some(mut compiled) = compile(live, &query.predicate)? else {
            return Ok(SearchResponse::default());
        };
        if let Some(doc_type) = &query.doc_type {
            let by_type: Box<dyn Query> = Box::new(TermQuery::new(
                Term::from_field_text(live.fields.doc_type, doc_type),
                IndexRecordOption::Basic,
            ));
            let combined: Box<dyn Query> = Box::new(BooleanQuery::new(vec![
                (Occur::Must, compiled),
                (Occur::Must, by_type),
            ]));
            compiled = combined;
        }

        let searcher = live.reader.searcher();
        let collector = (
            TopDocs::with_limit(query.size.max(1)).and_offset(query.from),
            Count,
        );
        let (top_docs, total) = searcher.search(&*compiled, &collector)?;

        let mut hits = Vec::with_capacity(query.size);
        for (score, address) in top_docs.into_iter().take(query.size) {
            let doc: TantivyDocument = searcher.doc(address)?;
            let (doc_type, id, source) = live.decode(&doc)?;
            hits.push(SearchHit {
                id,
                doc_type,
                score,
                source,
            });
        }
        Ok(SearchResponse { total, hits })
    }

    fn refresh(&self, index: &str) -> EngineResult<()> {
        let slot = self.slot(index)?;
        let state = slot.lock();
        state.live.reader.reload()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Query compilation
// ═══════════════════════════════════════════════════════════════════════════

/// `None` means the predicate cannot match anything
fn compile(live: &Live, predicate: &Predicate) -> EngineResult<Option<Box<dyn Query>>> {
    match predicate {
        Predicate::All => Ok(Some(Box::new(AllQuery))),
        Predicate::Ids(ids) => {
            if ids.is_empty() {
                return Ok(None);
            }
            let clauses = ids
                .iter()
                .map(|id| {
                    (
                        Occur::Should,
                        term_query(Term::from_field_text(live.fields.id, id)),
                    )
                })
                .collect();
            Ok(Some(Box::new(BooleanQuery::new(clauses))))
        }
        Predicate::Term { field, value } => compile_term(live, field, value),
        Predicate::Match { field, text } => compile_match(live, field, text),
        Predicate::And(predicates) => {
            let mut clauses = Vec::with_capacity(predicates.len());
            for predicate in predicates {
                match compile(live, predicate)? {
                    Some(query) => clauses.push((Occur::Must, query)),
                    None => return Ok(None),
                }
            }
            if clauses.is_empty() {
                return Ok(Some(Box::new(AllQuery)));
            }
            Ok(Some(Box::new(BooleanQuery::new(clauses))))
        }
    }
}

fn term_query(term: Term) -> Box<dyn Query> {
    Box::new(TermQuery::new(term, IndexRecordOption::Basic))
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compile_term(live: &Live, field: &str, value: &Value) -> EngineResult<Option<Box<dyn Query>>> {
    let Some((handle, kind)) = live.fields.mapped.get(field) else {
        return compile_path(live, field, &[literal(value)]);
    };
    let handle = *handle;

    let term = match kind {
        MappedType::Integer => value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .map(|v| Term::from_field_i64(handle, v)),
        MappedType::Boolean => value.as_bool().map(|v| Term::from_field_bool(handle, v)),
        MappedType::Date => value
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| Term::from_field_date(handle, DateTime::from_timestamp_secs(dt.timestamp()))),
        MappedType::Text { .. } | MappedType::Json => {
            return compile_match(live, field, &literal(value));
        }
    };
    Ok(term.map(term_query))
}

fn compile_match(live: &Live, field: &str, text: &str) -> EngineResult<Option<Box<dyn Query>>> {
    let words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
    match live.fields.mapped.get(field) {
        Some((handle, MappedType::Text { .. })) => {
            let mut analyzer = live.index.tokenizer_for_field(*handle)?;
            let mut stream = analyzer.token_stream(text);
            let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
            while stream.advance() {
                let term = Term::from_field_text(*handle, &stream.token().text);
                clauses.push((Occur::Must, term_query(term)));
            }
            if clauses.is_empty() {
                return Ok(None);
            }
            Ok(Some(Box::new(BooleanQuery::new(clauses))))
        }
        Some((_, MappedType::Json)) | None => compile_path(live, field, &words),
        Some(_) => compile_term(live, field, &Value::String(text.to_string())),
    }
}

/// Dotted path into a JSON field, through the query parser
fn compile_path(live: &Live, path: &str, words: &[String]) -> EngineResult<Option<Box<dyn Query>>> {
    let root = path.split('.').next().unwrap_or(path);
    let is_json = matches!(live.fields.mapped.get(root), Some((_, MappedType::Json)));
    if !is_json || !path.contains('.') || words.is_empty() {
        return Ok(None);
    }

    let clauses: Vec<String> = words
        .iter()
        .map(|word| {
            let escaped = word.replace('\\', "\\\\").replace('"', "\\\"");
            format!("{}:\"{}\"", path, escaped)
        })
        .collect();
    let parser = QueryParser::for_index(&live.index, Vec::new());
    let query = parser
        .parse_query(&clauses.join(" AND "))
        .map_err(|e| EngineError::InvalidInput(format!("Invalid query: {}", e)))?;
    Ok(Some(query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine() -> TantivySearchEngine {
        let engine = TantivySearchEngine::in_ram();
        engine.create_index("blog").unwrap();
        engine
            .put_mapping(
                "blog",
                "post",
                &json!({"properties": {
                    "pk": {"type": "integer"},
                    "title": {"type": "string"},
                    "published": {"type": "boolean"},
                }}),
            )
            .unwrap();
        engine
    }

    fn match_title(text: &str) -> SearchQuery {
        SearchQuery::new(Predicate::Match {
            field: "title".into(),
            text: text.into(),
        })
    }

    #[test]
    fn test_upsert_replaces_document() {
        let engine = engine();
        engine
            .index_document("blog", "post", "1", &json!({"pk": 1, "title": "First draft"}))
            .unwrap();
        engine
            .index_document("blog", "post", "1", &json!({"pk": 1, "title": "Final text"}))
            .unwrap();

        let all = engine.search("blog", &SearchQuery::default()).unwrap();
        assert_eq!(all.total, 1);
        assert_eq!(all.hits[0].source, json!({"pk": 1, "title": "Final text"}));
        assert_eq!(engine.search("blog", &match_title("draft")).unwrap().total, 0);
    }

    #[test]
    fn test_term_and_match() {
        let engine = engine();
        let actions = vec![
            BulkAction::Index {
                doc_type: "post".into(),
                id: "1".into(),
                body: json!({"pk": 1, "title": "Rust ownership", "published": true}),
            },
            BulkAction::Index {
                doc_type: "post".into(),
                id: "2".into(),
                body: json!({"pk": 2, "title": "Rust lifetimes", "published": false}),
            },
        ];
        let response = engine.bulk("blog", actions).unwrap();
        assert_eq!(response.items, 2);

        assert_eq!(engine.search("blog", &match_title("rust")).unwrap().total, 2);
        let published = engine
            .search(
                "blog",
                &SearchQuery::new(Predicate::And(vec![
                    Predicate::Match {
                        field: "title".into(),
                        text: "rust".into(),
                    },
                    Predicate::Term {
                        field: "published".into(),
                        value: json!(true),
                    },
                ])),
            )
            .unwrap();
        assert_eq!(published.total, 1);
        assert_eq!(published.hits[0].id, "1");

        let by_ids = engine
            .search("blog", &SearchQuery::new(Predicate::Ids(vec!["2".into()])))
            .unwrap();
        assert_eq!(by_ids.hits[0].id, "2");
    }

    #[test]
    fn test_mapping_change_keeps_documents() {
        let engine = engine();
        engine
            .index_document("blog", "post", "7", &json!({"pk": 7, "title": "Kept", "extra": "later"}))
            .unwrap();
        engine
            .put_mapping(
                "blog",
                "post",
                &json!({"properties": {"pk": {"type": "integer"}, "extra": {"type": "string"}}}),
            )
            .unwrap();

        let found = engine
            .search(
                "blog",
                &SearchQuery::new(Predicate::Match {
                    field: "extra".into(),
                    text: "later".into(),
                }),
            )
            .unwrap();
        assert_eq!(found.total, 1);
    }

    #[test]
    fn test_delete_document_reports_existence() {
        let engine = engine();
        engine
            .index_document("blog", "post", "3", &json!({"pk": 3}))
            .unwrap();
        assert!(engine.delete_document("blog", "post", "3").unwrap());
        assert!(!engine.delete_document("blog", "post", "3").unwrap());
    }

    #[test]
    fn test_closed_index_and_missing_index() {
        let engine = engine();
        engine.close_index("blog").unwrap();
        assert!(matches!(
            engine.search("blog", &SearchQuery::default()),
            Err(EngineError::IndexClosed(_))
        ));
        assert!(matches!(
            engine.put_mapping("nothing", "post", &json!({"properties": {}})),
            Err(EngineError::IndexNotFound(_))
        ));
        assert!(!engine.delete_index("nothing").unwrap());
    }
}
