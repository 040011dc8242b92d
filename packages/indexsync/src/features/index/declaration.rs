//! Index declarations (builder side)
//!
//! An `IndexDeclaration` is written once at startup and compiled by the
//! registry. Declarations may extend a base declaration:
//!
//! - attribute and template field lists are concatenated, base first
//! - declared fields merge base first, so a child field replaces a base field
//!   of the same name
//! - suppressed names accumulate over the whole chain
//! - scalar options (`doc_type`, `connection`, `date_field`, `index_by`) are
//!   taken from the nearest declaration that sets them
//! - dependencies merge, the child's path winning for the same record type

use std::collections::{BTreeMap, BTreeSet};

use crate::features::fields::FieldDeclaration;

/// One searchable facet of one record type
///
/// # Examples
///
/// ```rust
/// use indexsync::{FieldDeclaration, IndexDeclaration};
///
/// let base = IndexDeclaration::new("blog.post", "search")
///     .attribute_fields(["title", "author.name"])
///     .field("shadowable_name", FieldDeclaration::string());
///
/// let child = IndexDeclaration::new("blog.post", "public")
///     .extending(&base)
///     .field("derived_name", FieldDeclaration::string().path("title"))
///     .suppress("shadowable_name");
///
/// assert_eq!(child.lineage().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct IndexDeclaration {
    record_type: String,
    facet: String,
    base: Option<Box<IndexDeclaration>>,
    attribute_fields: Vec<String>,
    template_fields: Vec<String>,
    fields: Vec<(String, FieldDeclaration)>,
    suppressed: BTreeSet<String>,
    doc_type: Option<String>,
    connection: Option<String>,
    dependencies: BTreeMap<String, String>,
    date_field: Option<String>,
    index_by: Option<usize>,
}

impl IndexDeclaration {
    pub fn new(record_type: impl Into<String>, facet: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            facet: facet.into(),
            base: None,
            attribute_fields: Vec::new(),
            template_fields: Vec::new(),
            fields: Vec::new(),
            suppressed: BTreeSet::new(),
            doc_type: None,
            connection: None,
            dependencies: BTreeMap::new(),
            date_field: None,
            index_by: None,
        }
    }

    pub fn extending(mut self, base: &IndexDeclaration) -> Self {
        self.base = Some(Box::new(base.clone()));
        self
    }

    /// Fields introspected from the record type; the field name is the last path segment
    pub fn attribute_fields<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attribute_fields.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Text fields rendered from `search/indexes/<app>/<model>_<facet>_<field>.html`
    pub fn template_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.template_fields.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: FieldDeclaration) -> Self {
        let name = name.into();
        self.fields.retain(|(existing, _)| *existing != name);
        self.fields.push((name, field));
        self
    }

    /// Remove an inherited (or derived) field from the compiled set
    pub fn suppress(mut self, name: impl Into<String>) -> Self {
        self.suppressed.insert(name.into());
        self
    }

    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    /// Changes to `record_type` reindex the records of this index reachable through `path`
    pub fn depends_on(mut self, record_type: impl Into<String>, path: impl Into<String>) -> Self {
        self.dependencies.insert(record_type.into(), path.into());
        self
    }

    pub fn date_field(mut self, date_field: impl Into<String>) -> Self {
        self.date_field = Some(date_field.into());
        self
    }

    pub fn index_by(mut self, index_by: usize) -> Self {
        self.index_by = Some(index_by);
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    pub fn facet(&self) -> &str {
        &self.facet
    }

    /// Base declarations first, `self` last
    pub fn lineage(&self) -> Vec<&IndexDeclaration> {
        let mut chain = match &self.base {
            Some(base) => base.lineage(),
            None => Vec::new(),
        };
        chain.push(self);
        chain
    }

    pub fn own_attribute_fields(&self) -> &[String] {
        &self.attribute_fields
    }

    pub fn own_template_fields(&self) -> &[String] {
        &self.template_fields
    }

    pub fn own_fields(&self) -> &[(String, FieldDeclaration)] {
        &self.fields
    }

    pub fn own_suppressed(&self) -> &BTreeSet<String> {
        &self.suppressed
    }

    pub fn own_dependencies(&self) -> &BTreeMap<String, String> {
        &self.dependencies
    }

    pub fn resolved_doc_type(&self) -> Option<&str> {
        self.nearest(|d| d.doc_type.as_deref())
    }

    pub fn resolved_connection(&self) -> Option<&str> {
        self.nearest(|d| d.connection.as_deref())
    }

    pub fn resolved_date_field(&self) -> Option<&str> {
        self.nearest(|d| d.date_field.as_deref())
    }

    pub fn resolved_index_by(&self) -> Option<usize> {
        self.nearest(|d| d.index_by)
    }

    fn nearest<'a, T>(&'a self, pick: impl Fn(&'a IndexDeclaration) -> Option<T>) -> Option<T> {
        self.lineage().into_iter().rev().find_map(pick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_nearest_wins() {
        let base = IndexDeclaration::new("blog.post", "search")
            .connection("archive")
            .index_by(50)
            .date_field("updated_at");
        let child = IndexDeclaration::new("blog.post", "public")
            .extending(&base)
            .index_by(10);

        assert_eq!(child.resolved_connection(), Some("archive"));
        assert_eq!(child.resolved_index_by(), Some(10));
        assert_eq!(child.resolved_date_field(), Some("updated_at"));
        assert_eq!(child.resolved_doc_type(), None);
    }

    #[test]
    fn test_redeclared_field_replaces() {
        let decl = IndexDeclaration::new("blog.post", "search")
            .field("title", FieldDeclaration::string())
            .field("title", FieldDeclaration::integer());
        assert_eq!(decl.own_fields().len(), 1);
        assert_eq!(decl.own_fields()[0].1, FieldDeclaration::integer());
    }

    #[test]
    fn test_lineage_order() {
        let root = IndexDeclaration::new("blog.post", "a");
        let middle = IndexDeclaration::new("blog.post", "b").extending(&root);
        let leaf = IndexDeclaration::new("blog.post", "c").extending(&middle);

        let facets: Vec<&str> = leaf.lineage().iter().map(|d| d.facet()).collect();
        assert_eq!(facets, vec!["a", "b", "c"]);
    }
}
