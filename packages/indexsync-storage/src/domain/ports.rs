//! Record Store Port (Trait Interface)
//!
//! Port/Adapter pattern for backend flexibility:
//! - Testing / embedding: `MemoryRecordStore`
//! - Production: an ORM or database adapter implementing `RecordStore`
//!
//! The port covers four concerns:
//! 1. Introspection (`record_type`, `lookup_attribute`, `is_subtype`)
//! 2. Traversal (`read`, `fetch_all`)
//! 3. Retrieval (`get`, `get_many`, `query`)
//! 4. Mutation hooks (`MutationObserver`, fired by the adapter)

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use super::meta::{AttributeMeta, Method, RecordTypeMeta};
use super::models::{Record, RecordId, RecordRef, Value};
use crate::Result;

// ═══════════════════════════════════════════════════════════════════════════
// Traversal results
// ═══════════════════════════════════════════════════════════════════════════

/// Result of reading one attribute off a record
#[derive(Debug, Clone)]
pub enum Attr {
    /// Scalar column (foreign keys that point nowhere read as `Value::Null`)
    Value(Value),
    /// Followed to-one relation
    Record(Record),
    /// To-many relation handle; expand with `RecordStore::fetch_all`
    Related(RelatedSet),
    /// Zero-argument computed attribute; evaluate with `Method::call`
    Method(Method),
}

/// Unexpanded to-many relation of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedSet {
    pub owner: RecordRef,
    pub attribute: String,
    pub target: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// Queries
// ═══════════════════════════════════════════════════════════════════════════

/// Records reachable from the queried type through `path` must include `target`
///
/// Path segments are separated by `.` or `__` (`"post.author"` == `"post__author"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationFilter {
    pub path: String,
    pub target: RecordRef,
}

impl RelationFilter {
    pub fn segments(&self) -> Vec<String> {
        self.path
            .replace("__", ".")
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Unordered retrieval filter
///
/// # Examples
///
/// ```rust
/// use chrono::Utc;
/// use indexsync_storage::domain::{RecordQuery, RecordRef};
///
/// let query = RecordQuery::all()
///     .modified_since("modified_on", Utc::now())
///     .related_to("author", RecordRef::new("blog.author", 3))
///     .limit(100);
/// assert_eq!(query.limit, Some(100));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    /// Attribute the `since`/`until` bounds apply to
    pub date_field: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub related: Option<RelationFilter>,
    pub ids: Option<Vec<RecordId>>,
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn modified_since(mut self, date_field: impl Into<String>, since: DateTime<Utc>) -> Self {
        self.date_field = Some(date_field.into());
        self.since = Some(since);
        self
    }

    pub fn modified_until(mut self, date_field: impl Into<String>, until: DateTime<Utc>) -> Self {
        self.date_field = Some(date_field.into());
        self.until = Some(until);
        self
    }

    pub fn related_to(mut self, path: impl Into<String>, target: RecordRef) -> Self {
        self.related = Some(RelationFilter {
            path: path.into(),
            target,
        });
        self
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = RecordId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Store port
// ═══════════════════════════════════════════════════════════════════════════

/// Record Store Port (Primary Interface)
pub trait RecordStore: Send + Sync {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Introspection
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Metadata of a registered record type
    fn record_type(&self, name: &str) -> Option<RecordTypeMeta>;

    /// Names of every registered record type
    fn record_types(&self) -> Vec<String>;

    /// Attribute declared on `record_type` or inherited from one of its parents
    fn lookup_attribute(&self, record_type: &str, name: &str) -> Option<AttributeMeta> {
        let meta = self.record_type(record_type)?;
        if let Some(attribute) = meta.get_attribute(name) {
            return Some(attribute.clone());
        }
        meta.parents
            .iter()
            .find_map(|parent| self.lookup_attribute(parent, name))
    }

    /// Method declared on `record_type` or inherited from one of its parents
    fn lookup_method(&self, record_type: &str, name: &str) -> Option<Method> {
        let meta = self.record_type(record_type)?;
        if let Some(method) = meta.get_method(name) {
            return Some(method.clone());
        }
        meta.parents
            .iter()
            .find_map(|parent| self.lookup_method(parent, name))
    }

    /// Every attribute of `record_type`, ancestors' first; a redeclared name keeps
    /// the descendant's declaration
    fn attributes(&self, record_type: &str) -> Vec<AttributeMeta> {
        let Some(meta) = self.record_type(record_type) else {
            return Vec::new();
        };
        let mut collected: Vec<AttributeMeta> = Vec::new();
        for parent in &meta.parents {
            for attribute in self.attributes(parent) {
                if !collected.iter().any(|a| a.name == attribute.name) {
                    collected.push(attribute);
                }
            }
        }
        for attribute in meta.attributes {
            match collected.iter_mut().find(|a| a.name == attribute.name) {
                Some(existing) => *existing = attribute,
                None => collected.push(attribute),
            }
        }
        collected
    }

    /// `child == parent` or `parent` is an ancestor of `child`
    fn is_subtype(&self, child: &str, parent: &str) -> bool {
        if child == parent {
            return true;
        }
        match self.record_type(child) {
            Some(meta) => meta.parents.iter().any(|p| self.is_subtype(p, parent)),
            None => false,
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Retrieval
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Record by id (subtypes of `record_type` included)
    fn get(&self, record_type: &str, id: RecordId) -> Result<Option<Record>>;

    /// Records by id in one round trip; missing ids are skipped
    fn get_many(&self, record_type: &str, ids: &[RecordId]) -> Result<Vec<Record>>;

    /// Unordered filtered retrieval
    fn query(&self, record_type: &str, query: &RecordQuery) -> Result<Vec<Record>>;

    fn count(&self, record_type: &str, query: &RecordQuery) -> Result<usize> {
        Ok(self.query(record_type, query)?.len())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Traversal
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Read one attribute. `Ok(None)` means the attribute does not exist.
    fn read(&self, record: &Record, attribute: &str) -> Result<Option<Attr>>;

    /// Expand a to-many relation in the relation's own iteration order
    fn fetch_all(&self, related: &RelatedSet) -> Result<Vec<Record>>;

    /// Evaluate a computed attribute of `record`
    fn invoke(&self, record: &Record, method: &Method) -> Result<Attr>;

    /// Text rendering of a record (its display attribute, else `type#id`)
    fn display(&self, record: &Record) -> String {
        self.record_type(&record.record_type)
            .and_then(|meta| meta.display)
            .and_then(|attribute| record.get(&attribute).and_then(Value::to_text))
            .unwrap_or_else(|| record.reference().to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Mutation hooks
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    RelationAdd { attribute: String, ids: Vec<RecordId> },
    RelationRemove { attribute: String, ids: Vec<RecordId> },
    RelationClear { attribute: String },
}

/// One record mutation. `record` is the instance being written (for relation
/// changes: the record whose relation changes, never the link row).
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub kind: MutationKind,
    pub record: Record,
}

impl MutationEvent {
    pub fn new(kind: MutationKind, record: Record) -> Self {
        Self { kind, record }
    }

    pub fn record_type(&self) -> &str {
        &self.record.record_type
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.kind, MutationKind::Delete)
    }
}

/// Ids captured by an observer before a mutation, grouped by consumer key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependentSnapshot(BTreeMap<String, BTreeSet<RecordId>>);

impl DependentSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, ids: impl IntoIterator<Item = RecordId>) {
        self.0.entry(key.into()).or_default().extend(ids);
    }

    pub fn get(&self, key: &str) -> Option<&BTreeSet<RecordId>> {
        self.0.get(key)
    }

    /// Per-key union
    pub fn union(mut self, other: DependentSnapshot) -> Self {
        for (key, ids) in other.0 {
            self.0.entry(key).or_default().extend(ids);
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<RecordId>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }
}

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Hooks fired by a store immediately before and after every mutation
///
/// A `before_change` failure aborts the mutation; an `after_change` failure is
/// returned to the mutating caller after the write is already applied.
pub trait MutationObserver: Send + Sync {
    fn before_change(
        &self,
        store: &dyn RecordStore,
        event: &MutationEvent,
    ) -> std::result::Result<DependentSnapshot, ObserverError>;

    fn after_change(
        &self,
        store: &dyn RecordStore,
        event: &MutationEvent,
        snapshot: DependentSnapshot,
    ) -> std::result::Result<(), ObserverError>;
}
