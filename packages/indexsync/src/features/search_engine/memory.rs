//! In-Memory Search Engine
//!
//! Keeps indexes, mappings, settings and documents in process and records
//! every call it receives, so tests can assert on exactly what was sent.
//! Matching is deliberately simple: `Match` is a case-insensitive substring
//! test per query word, `Term` is JSON equality.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::ports::{
    values_at, BulkAction, BulkItemError, BulkResponse, EngineError, EngineResult, Predicate,
    SearchEngine, SearchHit, SearchQuery, SearchResponse,
};
use crate::features::analysis::merge_settings;

/// One recorded request
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    DeleteIndex(String),
    CreateIndex(String),
    PutMapping {
        index: String,
        doc_type: String,
        mapping: Value,
    },
    PutSettings {
        index: String,
        settings: Value,
    },
    CloseIndex(String),
    OpenIndex(String),
    IndexDocument {
        index: String,
        doc_type: String,
        id: String,
        body: Value,
    },
    DeleteDocument {
        index: String,
        doc_type: String,
        id: String,
    },
    Bulk {
        index: String,
        actions: Vec<BulkAction>,
    },
    Search {
        index: String,
        query: SearchQuery,
    },
    Refresh(String),
}

/// A document write seen by the engine, single or bulk
#[derive(Debug, Clone, PartialEq)]
pub struct Upsert {
    pub index: String,
    pub doc_type: String,
    pub id: String,
    pub body: Value,
}

#[derive(Debug)]
struct MemoryIndex {
    open: bool,
    mappings: BTreeMap<String, Value>,
    settings: Value,
    documents: BTreeMap<(String, String), Value>,
}

impl MemoryIndex {
    fn new() -> Self {
        Self {
            open: true,
            mappings: BTreeMap::new(),
            settings: json!({}),
            documents: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    indexes: BTreeMap<String, MemoryIndex>,
    calls: Vec<EngineCall>,
    rejected: BTreeSet<String>,
    fail_settings: bool,
}

impl State {
    fn index_mut(&mut self, name: &str) -> EngineResult<&mut MemoryIndex> {
        self.indexes
            .get_mut(name)
            .ok_or_else(|| EngineError::IndexNotFound(name.to_string()))
    }

    fn open_index_mut(&mut self, name: &str) -> EngineResult<&mut MemoryIndex> {
        let index = self.index_mut(name)?;
        if !index.open {
            return Err(EngineError::IndexClosed(name.to_string()));
        }
        Ok(index)
    }
}

#[derive(Debug, Default)]
pub struct MemorySearchEngine {
    state: Mutex<State>,
}

impl MemorySearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write of document `id` fail (bulk items are reported, single writes error)
    pub fn reject_id(&self, id: impl Into<String>) {
        self.state.lock().rejected.insert(id.into());
    }

    /// Make `put_settings` fail
    pub fn fail_settings(&self, fail: bool) {
        self.state.lock().fail_settings = fail;
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Every document write received, in order
    pub fn upserts(&self) -> Vec<Upsert> {
        let state = self.state.lock();
        let mut upserts = Vec::new();
        for call in &state.calls {
            match call {
                EngineCall::IndexDocument {
                    index,
                    doc_type,
                    id,
                    body,
                } => upserts.push(Upsert {
                    index: index.clone(),
                    doc_type: doc_type.clone(),
                    id: id.clone(),
                    body: body.clone(),
                }),
                EngineCall::Bulk { index, actions } => {
                    for action in actions {
                        if let BulkAction::Index { doc_type, id, body } = action {
                            upserts.push(Upsert {
                                index: index.clone(),
                                doc_type: doc_type.clone(),
                                id: id.clone(),
                                body: body.clone(),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
        upserts
    }

    pub fn document(&self, index: &str, doc_type: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .indexes
            .get(index)?
            .documents
            .get(&(doc_type.to_string(), id.to_string()))
            .cloned()
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.state
            .lock()
            .indexes
            .get(index)
            .map(|i| i.documents.len())
            .unwrap_or(0)
    }

    pub fn mapping(&self, index: &str, doc_type: &str) -> Option<Value> {
        self.state.lock().indexes.get(index)?.mappings.get(doc_type).cloned()
    }

    pub fn settings(&self, index: &str) -> Option<Value> {
        self.state.lock().indexes.get(index).map(|i| i.settings.clone())
    }

    pub fn is_open(&self, index: &str) -> Option<bool> {
        self.state.lock().indexes.get(index).map(|i| i.open)
    }

    fn record(&self, call: EngineCall) -> parking_lot::MutexGuard<'_, State> {
        let mut state = self.state.lock();
        state.calls.push(call);
        state
    }
}

impl SearchEngine for MemorySearchEngine {
    fn delete_index(&self, index: &str) -> EngineResult<bool> {
        let mut state = self.record(EngineCall::DeleteIndex(index.to_string()));
        let existed = state.indexes.remove(index).is_some();
        debug!(index, existed, "Deleted index");
        Ok(existed)
    }

    fn create_index(&self, index: &str) -> EngineResult<()> {
        let mut state = self.record(EngineCall::CreateIndex(index.to_string()));
        if state.indexes.contains_key(index) {
            return Err(EngineError::IndexAlreadyExists(index.to_string()));
        }
        state.indexes.insert(index.to_string(), MemoryIndex::new());
        Ok(())
    }

    fn index_exists(&self, index: &str) -> bool {
        self.state.lock().indexes.contains_key(index)
    }

    fn put_mapping(&self, index: &str, doc_type: &str, mapping: &Value) -> EngineResult<()> {
        let mut state = self.record(EngineCall::PutMapping {
            index: index.to_string(),
            doc_type: doc_type.to_string(),
            mapping: mapping.clone(),
        });
        state
            .index_mut(index)?
            .mappings
            .insert(doc_type.to_string(), mapping.clone());
        Ok(())
    }

    fn put_settings(&self, index: &str, settings: &Value) -> EngineResult<()> {
        let mut state = self.record(EngineCall::PutSettings {
            index: index.to_string(),
            settings: settings.clone(),
        });
        if state.fail_settings {
            return Err(EngineError::Internal("settings rejected".to_string()));
        }
        let target = state.index_mut(index)?;
        if target.open {
            return Err(EngineError::InvalidInput(format!(
                "analysis settings of '{}' can only change while it is closed",
                index
            )));
        }
        merge_settings(&mut target.settings, settings)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))
    }

    fn close_index(&self, index: &str) -> EngineResult<()> {
        let mut state = self.record(EngineCall::CloseIndex(index.to_string()));
        state.index_mut(index)?.open = false;
        Ok(())
    }

    fn open_index(&self, index: &str) -> EngineResult<()> {
        let mut state = self.record(EngineCall::OpenIndex(index.to_string()));
        state.index_mut(index)?.open = true;
        Ok(())
    }

    fn index_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        body: &Value,
    ) -> EngineResult<()> {
        let mut state = self.record(EngineCall::IndexDocument {
            index: index.to_string(),
            doc_type: doc_type.to_string(),
            id: id.to_string(),
            body: body.clone(),
        });
        if state.rejected.contains(id) {
            return Err(EngineError::InvalidInput(format!("document {} rejected", id)));
        }
        state
            .open_index_mut(index)?
            .documents
            .insert((doc_type.to_string(), id.to_string()), body.clone());
        Ok(())
    }

    fn delete_document(&self, index: &str, doc_type: &str, id: &str) -> EngineResult<bool> {
        let mut state = self.record(EngineCall::DeleteDocument {
            index: index.to_string(),
            doc_type: doc_type.to_string(),
            id: id.to_string(),
        });
        Ok(state
            .open_index_mut(index)?
            .documents
            .remove(&(doc_type.to_string(), id.to_string()))
            .is_some())
    }

    fn bulk(&self, index: &str, actions: Vec<BulkAction>) -> EngineResult<BulkResponse> {
        let mut state = self.record(EngineCall::Bulk {
            index: index.to_string(),
            actions: actions.clone(),
        });
        let rejected = state.rejected.clone();
        let target = state.open_index_mut(index)?;

        let mut response = BulkResponse::default();
        for action in actions {
            if rejected.contains(action.id()) {
                response.errors.push(BulkItemError {
                    id: action.id().to_string(),
                    reason: "rejected".to_string(),
                });
                continue;
            }
            match action {
                BulkAction::Index { doc_type, id, body } => {
                    target.documents.insert((doc_type, id), body);
                }
                BulkAction::Delete { doc_type, id } => {
                    target.documents.remove(&(doc_type, id));
                }
            }
            response.items += 1;
        }
        Ok(response)
    }

    fn search(&self, index: &str, query: &SearchQuery) -> EngineResult<SearchResponse> {
        let mut state = self.record(EngineCall::Search {
            index: index.to_string(),
            query: query.clone(),
        });
        let target = state.open_index_mut(index)?;

        let mut matched: Vec<SearchHit> = target
            .documents
            .iter()
            .filter(|((doc_type, _), _)| {
                query.doc_type.as_deref().map_or(true, |wanted| wanted == doc_type.as_str())
            })
            .filter(|((_, id), source)| matches(&query.predicate, id, source))
            .map(|((doc_type, id), source)| SearchHit {
                id: id.clone(),
                doc_type: doc_type.clone(),
                score: 1.0,
                source: source.clone(),
            })
            .collect();
        matched.sort_by(|a, b| {
            (&a.doc_type, a.id.len(), &a.id).cmp(&(&b.doc_type, b.id.len(), &b.id))
        });

        let total = matched.len();
        let hits = matched.into_iter().skip(query.from).take(query.size).collect();
        Ok(SearchResponse { total, hits })
    }

    fn refresh(&self, index: &str) -> EngineResult<()> {
        let mut state = self.record(EngineCall::Refresh(index.to_string()));
        state.index_mut(index)?;
        Ok(())
    }
}

fn matches(predicate: &Predicate, id: &str, source: &Value) -> bool {
    match predicate {
        Predicate::All => true,
        Predicate::Ids(ids) => ids.iter().any(|wanted| wanted == id),
        Predicate::Term { field, value } => values_at(source, field).contains(&value),
        Predicate::Match { field, text } => {
            let haystack: Vec<String> = values_at(source, field)
                .into_iter()
                .map(|value| match value {
                    Value::String(s) => s.to_lowercase(),
                    other => other.to_string().to_lowercase(),
                })
                .collect();
            let mut words = text.split_whitespace().peekable();
            words.peek().is_some()
                && words.all(|word| {
                    let word = word.to_lowercase();
                    haystack.iter().any(|h| h.contains(&word))
                })
        }
        Predicate::And(all) => all.iter().all(|p| matches(p, id, source)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine_with_index() -> MemorySearchEngine {
        let engine = MemorySearchEngine::new();
        engine.create_index("posts").unwrap();
        engine
    }

    #[test]
    fn test_delete_missing_index_is_false() {
        let engine = MemorySearchEngine::new();
        assert!(!engine.delete_index("nothing").unwrap());
        engine.create_index("posts").unwrap();
        assert!(engine.delete_index("posts").unwrap());
    }

    #[test]
    fn test_create_twice_fails() {
        let engine = engine_with_index();
        assert!(matches!(
            engine.create_index("posts"),
            Err(EngineError::IndexAlreadyExists(_))
        ));
    }

    #[test]
    fn test_mapping_requires_index() {
        let engine = MemorySearchEngine::new();
        let err = engine.put_mapping("posts", "post", &json!({})).unwrap_err();
        assert!(matches!(err, EngineError::IndexNotFound(_)));
    }

    #[test]
    fn test_settings_require_closed_index() {
        let engine = engine_with_index();
        let settings = json!({"analysis": {"analyzer": {}}});
        assert!(engine.put_settings("posts", &settings).is_err());

        engine.close_index("posts").unwrap();
        engine.put_settings("posts", &settings).unwrap();
        engine.open_index("posts").unwrap();
        assert_eq!(engine.settings("posts").unwrap(), settings);
    }

    #[test]
    fn test_closed_index_rejects_writes() {
        let engine = engine_with_index();
        engine.close_index("posts").unwrap();
        let err = engine
            .index_document("posts", "post", "1", &json!({}))
            .unwrap_err();
        assert!(matches!(err, EngineError::IndexClosed(_)));
    }

    #[test]
    fn test_bulk_collects_item_errors() {
        let engine = engine_with_index();
        engine.reject_id("2");

        let actions = (1..=3)
            .map(|i| BulkAction::Index {
                doc_type: "post".into(),
                id: i.to_string(),
                body: json!({"pk": i}),
            })
            .collect();
        let response = engine.bulk("posts", actions).unwrap();

        assert_eq!(response.items, 2);
        assert_eq!(
            response.errors,
            vec![BulkItemError {
                id: "2".into(),
                reason: "rejected".into()
            }]
        );
        assert_eq!(engine.document_count("posts"), 2);
        assert_eq!(engine.upserts().len(), 3);
    }

    #[test]
    fn test_search_predicates_and_paging() {
        let engine = engine_with_index();
        for (id, title) in [("1", "Rust ownership"), ("2", "Borrowing in Rust"), ("10", "Go channels")] {
            engine
                .index_document("posts", "post", id, &json!({"title": title, "pk": id.parse::<i64>().unwrap()}))
                .unwrap();
        }

        let rust = engine
            .search("posts", &SearchQuery::new(Predicate::Match {
                field: "title".into(),
                text: "rust".into(),
            }))
            .unwrap();
        assert_eq!(rust.total, 2);
        assert_eq!(rust.hits[0].id, "1");

        let by_pk = engine
            .search("posts", &SearchQuery::new(Predicate::Term {
                field: "pk".into(),
                value: json!(10),
            }))
            .unwrap();
        assert_eq!(by_pk.hits.len(), 1);
        assert_eq!(by_pk.hits[0].id, "10");

        let second_page = engine
            .search("posts", &SearchQuery::new(Predicate::All).page(2, 2))
            .unwrap();
        assert_eq!(second_page.total, 3);
        assert_eq!(second_page.hits.len(), 1);
        assert_eq!(second_page.hits[0].id, "10");
    }
}
