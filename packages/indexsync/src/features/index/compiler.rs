//! Index declaration compiler
//!
//! Field assembly, later steps replacing earlier ones on name collision:
//!
//! 1. attribute fields (introspected through the record store)
//! 2. template fields
//! 3. declared fields (base first)
//! 4. synthetic `pk` unless one is declared
//!
//! Suppressed names are removed last, whichever step produced them.

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use indexsync_storage::{AttributeKind, Record, RecordStore};

use super::declaration::IndexDeclaration;
use crate::config::{ConfigError, ConfigResult, DEFAULT_CONNECTION};
use crate::errors::Result;
use crate::features::analysis::merge_settings;
use crate::features::fields::{resolve_all, split_path, FieldDeclaration, ResolveContext};

pub const PK_FIELD: &str = "pk";
pub const DEFAULT_DATE_FIELD: &str = "modified_on";

/// Registry key: `(record_type, facet)`, displayed as `app.model.facet`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey {
    pub record_type: String,
    pub facet: String,
}

impl IndexKey {
    pub fn new(record_type: impl Into<String>, facet: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            facet: facet.into(),
        }
    }

    /// `"blog.post.search"` → `("blog.post", "search")`
    pub fn parse(name: &str) -> Option<Self> {
        let (record_type, facet) = name.rsplit_once('.')?;
        if record_type.is_empty() || facet.is_empty() {
            return None;
        }
        Some(Self::new(record_type, facet))
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.record_type, self.facet)
    }
}

/// Immutable, compiled form of an `IndexDeclaration`
#[derive(Debug, Clone)]
pub struct CompiledIndex {
    key: IndexKey,
    doc_type: String,
    connection: String,
    dependencies: BTreeMap<String, String>,
    date_field: String,
    index_by: usize,
    fields: BTreeMap<String, FieldDeclaration>,
    settings: Option<Value>,
}

impl CompiledIndex {
    pub fn compile(
        declaration: &IndexDeclaration,
        store: &dyn RecordStore,
        default_index_by: usize,
    ) -> ConfigResult<Self> {
        let key = IndexKey::new(declaration.record_type(), declaration.facet());
        let invalid = |reason: String| ConfigError::invalid_declaration(key.to_string(), reason);

        if store.record_type(&key.record_type).is_none() {
            return Err(invalid(format!("unknown record type '{}'", key.record_type)));
        }

        let lineage = declaration.lineage();
        let suppressed: BTreeSet<String> = lineage
            .iter()
            .flat_map(|d| d.own_suppressed().iter().cloned())
            .collect();
        if suppressed.contains(PK_FIELD) {
            return Err(invalid("the primary key field cannot be suppressed".to_string()));
        }

        let mut fields: BTreeMap<String, FieldDeclaration> = BTreeMap::new();

        for path in dedup(lineage.iter().flat_map(|d| d.own_attribute_fields())) {
            let segments = split_path(&path);
            let Some(name) = segments.last().cloned() else {
                continue;
            };
            let mut field = introspect(store, &key.record_type, &segments);
            if segments.len() > 1 {
                field = field.path(path.clone());
            }
            fields.insert(name, field);
        }

        let (app_label, model_name) = split_record_type(&key.record_type);
        for name in dedup(lineage.iter().flat_map(|d| d.own_template_fields())) {
            let template = format!(
                "search/indexes/{}/{}_{}_{}.html",
                app_label, model_name, key.facet, name
            );
            fields.insert(name, FieldDeclaration::template(template));
        }

        for base in &lineage {
            for (name, field) in base.own_fields() {
                fields.insert(name.clone(), field.clone());
            }
        }

        fields
            .entry(PK_FIELD.to_string())
            .or_insert_with(FieldDeclaration::integer);

        fields.retain(|name, _| !suppressed.contains(name));

        let fields: BTreeMap<String, FieldDeclaration> = fields
            .into_iter()
            .map(|(name, field)| (name, complete(store, field)))
            .collect();

        let settings = merged_settings(&fields)?;

        let mut dependencies = BTreeMap::new();
        for base in &lineage {
            for (record_type, path) in base.own_dependencies() {
                if store.record_type(record_type).is_none() {
                    return Err(invalid(format!(
                        "dependency on unknown record type '{}'",
                        record_type
                    )));
                }
                dependencies.insert(record_type.clone(), path.clone());
            }
        }

        let index_by = declaration.resolved_index_by().unwrap_or(default_index_by);
        if index_by == 0 {
            return Err(invalid("index_by must be at least 1".to_string()));
        }

        let doc_type = declaration
            .resolved_doc_type()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_{}_{}", app_label, model_name, key.facet));

        Ok(Self {
            doc_type,
            connection: declaration
                .resolved_connection()
                .unwrap_or(DEFAULT_CONNECTION)
                .to_string(),
            date_field: declaration
                .resolved_date_field()
                .unwrap_or(DEFAULT_DATE_FIELD)
                .to_string(),
            key,
            dependencies,
            index_by,
            fields,
            settings,
        })
    }

    pub fn key(&self) -> &IndexKey {
        &self.key
    }

    pub fn record_type(&self) -> &str {
        &self.key.record_type
    }

    pub fn facet(&self) -> &str {
        &self.key.facet
    }

    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn dependencies(&self) -> &BTreeMap<String, String> {
        &self.dependencies
    }

    pub fn date_field(&self) -> &str {
        &self.date_field
    }

    pub fn index_by(&self) -> usize {
        self.index_by
    }

    /// Compiled fields, sorted by name
    pub fn fields(&self) -> &BTreeMap<String, FieldDeclaration> {
        &self.fields
    }

    /// Merged analysis settings contributed by field analyzers
    pub fn settings(&self) -> Option<&Value> {
        self.settings.as_ref()
    }

    /// `{doc_type: {"properties": {...}}}`
    pub fn compile_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, field)| (name.clone(), field.schema()))
            .collect();
        json!({ (self.doc_type.clone()): { "properties": properties } })
    }

    /// Document for `record`; fields whose path is missing are omitted
    pub fn prepare(&self, record: &Record, ctx: &ResolveContext<'_>) -> Result<Value> {
        resolve_all(&self.fields, record, ctx).map(Value::Object)
    }
}

/// `"blog.post"` → `("blog", "post")`
pub fn split_record_type(record_type: &str) -> (&str, &str) {
    record_type.split_once('.').unwrap_or((record_type, record_type))
}

fn dedup<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .filter(|item| seen.insert((*item).clone()))
        .cloned()
        .collect()
}

/// Field declaration for an attribute path, classified by the final attribute's kind
fn introspect(store: &dyn RecordStore, record_type: &str, segments: &[String]) -> FieldDeclaration {
    let mut current = record_type.to_string();
    let Some((last, steps)) = segments.split_last() else {
        return FieldDeclaration::string();
    };

    for step in steps {
        match store
            .lookup_attribute(&current, step)
            .and_then(|a| a.kind.related_type().map(str::to_string))
        {
            Some(related) => current = related,
            None => return FieldDeclaration::string(),
        }
    }

    match store.lookup_attribute(&current, last).map(|a| a.kind) {
        Some(AttributeKind::Boolean) => FieldDeclaration::boolean(),
        Some(AttributeKind::Integer) => FieldDeclaration::integer(),
        Some(AttributeKind::Date) | Some(AttributeKind::DateTime) => FieldDeclaration::date(),
        Some(kind) if kind.is_to_many() => {
            FieldDeclaration::nested(kind.related_type().unwrap_or_default())
        }
        _ => FieldDeclaration::string(),
    }
}

/// Scalar attributes of `record_type` as child fields
fn derive_children(store: &dyn RecordStore, record_type: &str) -> BTreeMap<String, FieldDeclaration> {
    store
        .attributes(record_type)
        .into_iter()
        .filter(|attribute| !attribute.kind.is_relation())
        .map(|attribute| {
            let field = match attribute.kind {
                AttributeKind::Boolean => FieldDeclaration::boolean(),
                AttributeKind::Integer => FieldDeclaration::integer(),
                AttributeKind::Date | AttributeKind::DateTime => FieldDeclaration::date(),
                _ => FieldDeclaration::string(),
            };
            (attribute.name, field)
        })
        .collect()
}

/// Fill composite fields declared without children
fn complete(store: &dyn RecordStore, field: FieldDeclaration) -> FieldDeclaration {
    let Some(properties) = field.properties() else {
        return field;
    };

    let children = if properties.is_empty() {
        match field.related_type() {
            Some(related) => derive_children(store, related),
            None => BTreeMap::new(),
        }
    } else {
        properties
            .iter()
            .map(|(name, child)| (name.clone(), complete(store, child.clone())))
            .collect()
    };
    field.with_properties(children)
}

fn merged_settings(fields: &BTreeMap<String, FieldDeclaration>) -> ConfigResult<Option<Value>> {
    let mut merged = json!({});
    let mut seen = BTreeSet::new();
    for field in fields.values().flat_map(|f| f.walk()) {
        let Some(analyzer) = field.get_analyzer() else {
            continue;
        };
        let Some(settings) = analyzer.settings() else {
            continue;
        };
        if seen.insert(analyzer.name().to_string()) {
            merge_settings(&mut merged, settings)?;
        }
    }
    Ok(if seen.is_empty() { None } else { Some(merged) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_INDEX_BY;
    use crate::features::analysis::Analyzer;
    use indexsync_storage::{AttributeMeta, MemoryRecordStore, RecordTypeMeta};
    use pretty_assertions::assert_eq;

    fn store() -> MemoryRecordStore {
        let store = MemoryRecordStore::new();
        store.register_type(
            RecordTypeMeta::new("blog.author")
                .attribute(AttributeMeta::text("name"))
                .attribute(AttributeMeta::boolean("active")),
        );
        store.register_type(
            RecordTypeMeta::new("blog.post")
                .attribute(AttributeMeta::text("title"))
                .attribute(AttributeMeta::integer("views"))
                .attribute(AttributeMeta::float("rating"))
                .attribute(AttributeMeta::datetime("modified_on").auto_now())
                .attribute(AttributeMeta::foreign_key("author", "blog.author"))
                .attribute(AttributeMeta::reverse_foreign_key("tags", "blog.tag", "post")),
        );
        store.register_type(
            RecordTypeMeta::new("blog.tag")
                .attribute(AttributeMeta::text("tag"))
                .attribute(AttributeMeta::integer("count"))
                .attribute(AttributeMeta::foreign_key("post", "blog.post")),
        );
        store
    }

    fn names(index: &CompiledIndex) -> Vec<&str> {
        index.fields().keys().map(String::as_str).collect()
    }

    #[test]
    fn test_attribute_introspection() {
        let store = store();
        let decl = IndexDeclaration::new("blog.post", "search").attribute_fields([
            "title",
            "views",
            "rating",
            "modified_on",
            "author.active",
            "tags",
            "missing",
        ]);
        let index = CompiledIndex::compile(&decl, &store, DEFAULT_INDEX_BY).unwrap();
        let schema = index.compile_schema();
        let properties = &schema["blog_post_search"]["properties"];

        assert_eq!(properties["title"], json!({"type": "string"}));
        assert_eq!(properties["views"], json!({"type": "integer"}));
        assert_eq!(properties["rating"], json!({"type": "string"}));
        assert_eq!(properties["modified_on"], json!({"type": "date"}));
        assert_eq!(properties["active"], json!({"type": "boolean"}));
        assert_eq!(properties["missing"], json!({"type": "string"}));
        assert_eq!(
            properties["tags"],
            json!({"type": "nested", "properties": {
                "count": {"type": "integer"},
                "tag": {"type": "string"},
            }})
        );
        assert_eq!(properties["pk"], json!({"type": "integer"}));
    }

    #[test]
    fn test_precedence_and_suppression() {
        let store = store();
        let parent = IndexDeclaration::new("blog.post", "search")
            .attribute_fields(["name"])
            .field("shadowable_name", FieldDeclaration::string());
        let child = IndexDeclaration::new("blog.post", "public")
            .extending(&parent)
            .field("derived_name", FieldDeclaration::string())
            .suppress("shadowable_name");

        let compiled = CompiledIndex::compile(&child, &store, DEFAULT_INDEX_BY).unwrap();
        assert_eq!(names(&compiled), vec!["derived_name", "name", "pk"]);

        let compiled_parent = CompiledIndex::compile(&parent, &store, DEFAULT_INDEX_BY).unwrap();
        assert_eq!(names(&compiled_parent), vec!["name", "pk", "shadowable_name"]);
    }

    #[test]
    fn test_declared_beats_template_beats_attribute() {
        let store = store();
        let decl = IndexDeclaration::new("blog.post", "search")
            .attribute_fields(["title", "views"])
            .template_fields(["title", "body"])
            .field("views", FieldDeclaration::string().path("title"));
        let index = CompiledIndex::compile(&decl, &store, DEFAULT_INDEX_BY).unwrap();

        assert_eq!(
            index.fields()["title"],
            FieldDeclaration::template("search/indexes/blog/post_search_title.html")
        );
        assert_eq!(
            index.fields()["body"],
            FieldDeclaration::template("search/indexes/blog/post_search_body.html")
        );
        assert_eq!(index.fields()["views"], FieldDeclaration::string().path("title"));
    }

    #[test]
    fn test_defaults_and_overrides() {
        let store = store();
        let plain = CompiledIndex::compile(
            &IndexDeclaration::new("blog.post", "search"),
            &store,
            250,
        )
        .unwrap();
        assert_eq!(plain.doc_type(), "blog_post_search");
        assert_eq!(plain.connection(), "default");
        assert_eq!(plain.date_field(), "modified_on");
        assert_eq!(plain.index_by(), 250);
        assert_eq!(plain.key().to_string(), "blog.post.search");

        let custom = CompiledIndex::compile(
            &IndexDeclaration::new("blog.post", "search")
                .doc_type("posts")
                .connection("archive")
                .index_by(5),
            &store,
            250,
        )
        .unwrap();
        assert_eq!(custom.doc_type(), "posts");
        assert_eq!(custom.connection(), "archive");
        assert_eq!(custom.index_by(), 5);
    }

    #[test]
    fn test_pk_override_and_suppression_error() {
        let store = store();
        let overridden = CompiledIndex::compile(
            &IndexDeclaration::new("blog.post", "search")
                .field("pk", FieldDeclaration::string()),
            &store,
            DEFAULT_INDEX_BY,
        )
        .unwrap();
        assert_eq!(overridden.fields()["pk"], FieldDeclaration::string());

        let err = CompiledIndex::compile(
            &IndexDeclaration::new("blog.post", "search").suppress("pk"),
            &store,
            DEFAULT_INDEX_BY,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDeclaration { .. }));
    }

    #[test]
    fn test_unknown_types_rejected() {
        let store = store();
        assert!(CompiledIndex::compile(
            &IndexDeclaration::new("shop.order", "search"),
            &store,
            DEFAULT_INDEX_BY
        )
        .is_err());
        assert!(CompiledIndex::compile(
            &IndexDeclaration::new("blog.post", "search").depends_on("shop.order", "orders"),
            &store,
            DEFAULT_INDEX_BY
        )
        .is_err());
    }

    #[test]
    fn test_settings_merged_once_per_analyzer() {
        let store = store();
        let decl = IndexDeclaration::new("blog.post", "search")
            .field("title", FieldDeclaration::string().analyzer(Analyzer::ngram(2, 3)))
            .field("summary", FieldDeclaration::string().analyzer(Analyzer::ngram(2, 3)))
            .field("body", FieldDeclaration::string().analyzer(Analyzer::builtin("english")));
        let index = CompiledIndex::compile(&decl, &store, DEFAULT_INDEX_BY).unwrap();

        assert_eq!(index.settings(), Analyzer::ngram(2, 3).settings());
        assert!(CompiledIndex::compile(
            &IndexDeclaration::new("blog.post", "search"),
            &store,
            DEFAULT_INDEX_BY
        )
        .unwrap()
        .settings()
        .is_none());
    }

    #[test]
    fn test_conflicting_analyzer_settings() {
        let store = store();
        let a = Analyzer::custom("mine", json!({"analysis": {"analyzer": {"mine": {"type": "a"}}}}));
        let b = Analyzer::custom("other", json!({"analysis": {"analyzer": {"mine": {"type": "b"}}}}));
        let decl = IndexDeclaration::new("blog.post", "search")
            .field("x", FieldDeclaration::string().analyzer(a))
            .field("y", FieldDeclaration::string().analyzer(b));

        let err = CompiledIndex::compile(&decl, &store, DEFAULT_INDEX_BY).unwrap_err();
        assert!(matches!(err, ConfigError::SettingsConflict { .. }));
    }

    #[test]
    fn test_index_key_parse() {
        assert_eq!(
            IndexKey::parse("blog.post.search"),
            Some(IndexKey::new("blog.post", "search"))
        );
        assert_eq!(IndexKey::parse("search"), None);
    }
}
