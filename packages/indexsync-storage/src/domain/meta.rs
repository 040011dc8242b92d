//! Record type metadata (introspection)
//!
//! The store describes every record type it holds: its attributes and their
//! storage kinds, its zero-argument computed attributes ("methods"), its parent
//! types, and which attribute renders the record as text.

use std::fmt;
use std::sync::Arc;

use super::models::Record;
use super::ports::{Attr, RecordStore};
use crate::Result;

/// Storage kind of an attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    Boolean,
    Integer,
    Float,
    Text,
    Date,
    DateTime,
    /// To-one relation stored as an id column on this record
    ForeignKey { target: String },
    /// To-many relation owned by this type, membership kept in `table`
    ManyToMany { target: String, table: String },
    /// To-many relation: records of `source` whose `field` points here
    ReverseForeignKey { source: String, field: String },
    /// Reverse side of a `ManyToMany` declared on `source`
    ReverseManyToMany { source: String, table: String },
}

impl AttributeKind {
    pub fn is_to_many(&self) -> bool {
        matches!(
            self,
            AttributeKind::ManyToMany { .. }
                | AttributeKind::ReverseForeignKey { .. }
                | AttributeKind::ReverseManyToMany { .. }
        )
    }

    pub fn is_relation(&self) -> bool {
        self.is_to_many() || matches!(self, AttributeKind::ForeignKey { .. })
    }

    /// Record type on the far side of a relation
    pub fn related_type(&self) -> Option<&str> {
        match self {
            AttributeKind::ForeignKey { target } | AttributeKind::ManyToMany { target, .. } => {
                Some(target)
            }
            AttributeKind::ReverseForeignKey { source, .. }
            | AttributeKind::ReverseManyToMany { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Attribute declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMeta {
    pub name: String,
    pub kind: AttributeKind,
    /// Stamped with the current time on every save
    pub auto_now: bool,
}

impl AttributeMeta {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            auto_now: false,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Boolean)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::DateTime)
    }

    pub fn foreign_key(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            AttributeKind::ForeignKey {
                target: target.into(),
            },
        )
    }

    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            AttributeKind::ManyToMany {
                target: target.into(),
                table: table.into(),
            },
        )
    }

    pub fn reverse_foreign_key(
        name: impl Into<String>,
        source: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            AttributeKind::ReverseForeignKey {
                source: source.into(),
                field: field.into(),
            },
        )
    }

    pub fn reverse_many_to_many(
        name: impl Into<String>,
        source: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            AttributeKind::ReverseManyToMany {
                source: source.into(),
                table: table.into(),
            },
        )
    }

    pub fn auto_now(mut self) -> Self {
        self.auto_now = true;
        self
    }
}

/// Zero-argument computed attribute
pub type MethodFn = dyn Fn(&Record, &dyn RecordStore) -> Result<Attr> + Send + Sync;

#[derive(Clone)]
pub struct Method {
    pub name: String,
    func: Arc<MethodFn>,
}

impl Method {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Record, &dyn RecordStore) -> Result<Attr> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn call(&self, record: &Record, store: &dyn RecordStore) -> Result<Attr> {
        (self.func)(record, store)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method").field("name", &self.name).finish()
    }
}

/// Record type description
///
/// # Examples
///
/// ```rust
/// use indexsync_storage::domain::{AttributeMeta, RecordTypeMeta};
///
/// let post = RecordTypeMeta::new("blog.post")
///     .attribute(AttributeMeta::text("title"))
///     .attribute(AttributeMeta::datetime("modified_on").auto_now())
///     .display("title");
///
/// assert_eq!(post.app_label(), "blog");
/// assert_eq!(post.model_name(), "post");
/// ```
#[derive(Debug, Clone)]
pub struct RecordTypeMeta {
    pub name: String,
    pub parents: Vec<String>,
    pub attributes: Vec<AttributeMeta>,
    pub methods: Vec<Method>,
    pub display: Option<String>,
}

impl RecordTypeMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parents: Vec::new(),
            attributes: Vec::new(),
            methods: Vec::new(),
            display: None,
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }

    pub fn attribute(mut self, attribute: AttributeMeta) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn method<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Record, &dyn RecordStore) -> Result<Attr> + Send + Sync + 'static,
    {
        self.methods.push(Method::new(name, func));
        self
    }

    pub fn display(mut self, attribute: impl Into<String>) -> Self {
        self.display = Some(attribute.into());
        self
    }

    /// Own attribute (parents are not consulted, see `RecordStore::lookup_attribute`)
    pub fn get_attribute(&self, name: &str) -> Option<&AttributeMeta> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn get_method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// `"blog.post"` → `"blog"`
    pub fn app_label(&self) -> &str {
        self.name.split_once('.').map(|(app, _)| app).unwrap_or(&self.name)
    }

    /// `"blog.post"` → `"post"`
    pub fn model_name(&self) -> &str {
        self.name
            .split_once('.')
            .map(|(_, model)| model)
            .unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_kinds() {
        let fk = AttributeKind::ForeignKey {
            target: "blog.author".into(),
        };
        assert!(fk.is_relation());
        assert!(!fk.is_to_many());
        assert_eq!(fk.related_type(), Some("blog.author"));

        let reverse = AttributeKind::ReverseForeignKey {
            source: "blog.tag".into(),
            field: "post".into(),
        };
        assert!(reverse.is_to_many());
        assert_eq!(reverse.related_type(), Some("blog.tag"));

        assert!(!AttributeKind::Integer.is_relation());
        assert_eq!(AttributeKind::Text.related_type(), None);
    }

    #[test]
    fn test_names_without_app_label() {
        let meta = RecordTypeMeta::new("standalone");
        assert_eq!(meta.app_label(), "standalone");
        assert_eq!(meta.model_name(), "standalone");
    }

    #[test]
    fn test_attribute_lookup() {
        let meta = RecordTypeMeta::new("blog.post")
            .attribute(AttributeMeta::text("title"))
            .attribute(AttributeMeta::datetime("modified_on").auto_now());

        assert!(meta.get_attribute("modified_on").unwrap().auto_now);
        assert!(!meta.get_attribute("title").unwrap().auto_now);
        assert!(meta.get_attribute("body").is_none());
    }
}
