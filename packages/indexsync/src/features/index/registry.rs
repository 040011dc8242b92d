//! Index registry
//!
//! Declarations are registered during startup, then the registry is frozen
//! into an `Arc` and shared read-only with the runtime and the propagator.

use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use indexsync_storage::RecordStore;

use super::compiler::{CompiledIndex, IndexKey};
use super::declaration::IndexDeclaration;
use crate::config::{ConfigError, ConfigResult, DEFAULT_INDEX_BY};

static GLOBAL: OnceCell<Arc<IndexRegistry>> = OnceCell::new();

#[derive(Debug)]
pub struct IndexRegistry {
    indexes: BTreeMap<IndexKey, Arc<CompiledIndex>>,
    default_index_by: usize,
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::with_default_index_by(DEFAULT_INDEX_BY)
    }

    pub fn with_default_index_by(default_index_by: usize) -> Self {
        Self {
            indexes: BTreeMap::new(),
            default_index_by,
        }
    }

    /// Compile and add a declaration. Registering the same `(type, facet)` twice fails.
    pub fn register(
        &mut self,
        store: &dyn RecordStore,
        declaration: &IndexDeclaration,
    ) -> ConfigResult<Arc<CompiledIndex>> {
        let key = IndexKey::new(declaration.record_type(), declaration.facet());
        if self.indexes.contains_key(&key) {
            return Err(ConfigError::invalid_declaration(
                key.to_string(),
                "already registered",
            ));
        }

        let compiled = Arc::new(CompiledIndex::compile(
            declaration,
            store,
            self.default_index_by,
        )?);
        debug!(
            index = %key,
            doc_type = compiled.doc_type(),
            fields = compiled.fields().len(),
            "Registered index"
        );
        self.indexes.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    pub fn freeze(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn get(&self, record_type: &str, facet: &str) -> Option<&Arc<CompiledIndex>> {
        self.indexes.get(&IndexKey::new(record_type, facet))
    }

    /// Lookup by `"app.model.facet"`
    pub fn get_by_name(&self, name: &str) -> Option<&Arc<CompiledIndex>> {
        IndexKey::parse(name).and_then(|key| self.indexes.get(&key))
    }

    /// Registered indexes in key order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CompiledIndex>> {
        self.indexes.values()
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Distinct record types with at least one index
    pub fn record_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.indexes.keys().map(|k| k.record_type.as_str()).collect();
        types.dedup();
        types
    }

    /// Indexes covering records of `record_type` (declared on it or on an ancestor)
    pub fn for_record_type(
        &self,
        record_type: &str,
        store: &dyn RecordStore,
    ) -> Vec<Arc<CompiledIndex>> {
        self.indexes
            .values()
            .filter(|index| store.is_subtype(record_type, index.record_type()))
            .cloned()
            .collect()
    }

    /// Indexes that declare a dependency matching `record_type`, with the
    /// path from the indexed type to the changed record
    pub fn dependents_of(
        &self,
        record_type: &str,
        store: &dyn RecordStore,
    ) -> Vec<(Arc<CompiledIndex>, String)> {
        self.indexes
            .values()
            .flat_map(|index| {
                index
                    .dependencies()
                    .iter()
                    .filter(|(dependency, _)| store.is_subtype(record_type, dependency))
                    .map(|(_, path)| (Arc::clone(index), path.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Install the process-wide registry. Returns the registry back if one is already installed.
pub fn install_global(registry: Arc<IndexRegistry>) -> Result<(), Arc<IndexRegistry>> {
    GLOBAL.set(registry)
}

pub fn global() -> Option<Arc<IndexRegistry>> {
    GLOBAL.get().cloned()
}
