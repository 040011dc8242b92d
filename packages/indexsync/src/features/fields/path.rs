//! Attribute path interpreter
//!
//! A dotted path such as `"author.profile.display_name"` compiles into a
//! sequence of tokens evaluated against the record graph:
//!
//! ```text
//! "author.name"  (single) → Read(author) Invoke Read(name) Invoke
//! "tags"         (list)   → Read(tags) Invoke FetchAll
//! ```
//!
//! Any step that cannot be taken (unknown attribute, null foreign key,
//! reading through a collection) aborts evaluation with "missing".

use indexsync_storage::{Attr, Method, Record, RecordStore, RelatedSet, Value};

use crate::errors::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathToken {
    /// Read a named attribute off the current record
    Read(String),
    /// Call the current value if it is a computed attribute; no-op otherwise
    Invoke,
    /// Expand a to-many relation into its records; no-op otherwise
    FetchAll,
}

/// Intermediate and terminal values of path evaluation
#[derive(Debug, Clone)]
pub enum Resolved {
    Value(Value),
    Record(Record),
    Related(RelatedSet),
    Records(Vec<Record>),
    Method { method: Method, owner: Record },
}

impl Resolved {
    fn from_attr(attr: Attr, owner: &Record) -> Self {
        match attr {
            Attr::Value(value) => Resolved::Value(value),
            Attr::Record(record) => Resolved::Record(record),
            Attr::Related(set) => Resolved::Related(set),
            Attr::Method(method) => Resolved::Method {
                method,
                owner: owner.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePath {
    source: String,
    tokens: Vec<PathToken>,
}

impl AttributePath {
    /// Compile a path; `.` and `__` both separate segments
    pub fn compile(path: &str, expand: bool) -> Self {
        let mut tokens: Vec<PathToken> = split_path(path)
            .into_iter()
            .flat_map(|segment| [PathToken::Read(segment), PathToken::Invoke])
            .collect();
        if expand {
            tokens.push(PathToken::FetchAll);
        }
        Self {
            source: path.to_string(),
            tokens,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn tokens(&self) -> &[PathToken] {
        &self.tokens
    }

    /// Evaluate against `record`; `Ok(None)` means a step was missing
    pub fn evaluate(&self, record: &Record, store: &dyn RecordStore) -> Result<Option<Resolved>> {
        let mut current = Resolved::Record(record.clone());

        for token in &self.tokens {
            current = match (token, current) {
                (PathToken::Read(name), Resolved::Record(owner)) => {
                    match store.read(&owner, name)? {
                        Some(attr) => Resolved::from_attr(attr, &owner),
                        None => return Ok(None),
                    }
                }
                (PathToken::Read(_), _) => return Ok(None),
                (PathToken::Invoke, Resolved::Method { method, owner }) => {
                    Resolved::from_attr(store.invoke(&owner, &method)?, &owner)
                }
                (PathToken::FetchAll, Resolved::Related(set)) => {
                    Resolved::Records(store.fetch_all(&set)?)
                }
                (_, other) => other,
            };
        }

        Ok(Some(current))
    }
}

/// `"post__author.name"` → `["post", "author", "name"]`
pub fn split_path(path: &str) -> Vec<String> {
    path.replace("__", ".")
        .split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
