//! Field declarations
//!
//! A `FieldDeclaration` says where one document field comes from (attribute
//! path, template or constant), what shape it has (scalar or composite, single
//! or list) and how it is mapped in the index schema.

use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;

use indexsync_storage::{Record, RecordStore, Value};

use super::path::{AttributePath, Resolved};
use super::render::{RenderContext, TemplateRenderer};
use crate::errors::{Result, SyncError};
use crate::features::analysis::Analyzer;

/// Separator used by joined fields unless one is given
pub const DEFAULT_JOIN_SEPARATOR: &str = "\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Integer,
    Boolean,
    Date,
}

impl ScalarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Integer => "integer",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Date => "date",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar(ScalarKind),
    /// Composite: children resolved against the related record
    Object {
        record_type: Option<String>,
        properties: BTreeMap<String, FieldDeclaration>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldSource {
    /// Dotted attribute path; `None` reads the attribute named like the field
    Attribute(Option<String>),
    /// Template identifier handed to the `TemplateRenderer`
    Template(String),
    Constant(Json),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    Single,
    List,
}

/// Everything resolution needs besides the record
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub store: &'a dyn RecordStore,
    pub renderer: &'a dyn TemplateRenderer,
}

impl<'a> ResolveContext<'a> {
    pub fn new(store: &'a dyn RecordStore, renderer: &'a dyn TemplateRenderer) -> Self {
        Self { store, renderer }
    }
}

/// One named mapping rule from record data to a document field
///
/// # Examples
///
/// ```rust
/// use indexsync::FieldDeclaration;
/// use serde_json::json;
///
/// let tags = FieldDeclaration::nested("blog.tag")
///     .property("tag", FieldDeclaration::string())
///     .property("count", FieldDeclaration::integer());
///
/// assert_eq!(
///     tags.schema(),
///     json!({
///         "type": "nested",
///         "properties": {
///             "count": {"type": "integer"},
///             "tag": {"type": "string"},
///         }
///     })
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDeclaration {
    kind: FieldKind,
    source: FieldSource,
    multiplicity: Multiplicity,
    analyzer: Option<Analyzer>,
    joined: Option<String>,
}

impl FieldDeclaration {
    fn with_kind(kind: FieldKind) -> Self {
        Self {
            kind,
            source: FieldSource::Attribute(None),
            multiplicity: Multiplicity::Single,
            analyzer: None,
            joined: None,
        }
    }

    fn scalar(kind: ScalarKind) -> Self {
        Self::with_kind(FieldKind::Scalar(kind))
    }

    pub fn string() -> Self {
        Self::scalar(ScalarKind::String)
    }

    pub fn integer() -> Self {
        Self::scalar(ScalarKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::scalar(ScalarKind::Boolean)
    }

    pub fn date() -> Self {
        Self::scalar(ScalarKind::Date)
    }

    /// Rendered text
    pub fn template(template: impl Into<String>) -> Self {
        Self::string().source(FieldSource::Template(template.into()))
    }

    /// Related records rendered to text and joined into one string
    pub fn joined(separator: impl Into<String>) -> Self {
        let mut field = Self::string().list();
        field.joined = Some(separator.into());
        field
    }

    /// Single composite over a to-one relation
    pub fn object(record_type: impl Into<String>) -> Self {
        Self::with_kind(FieldKind::Object {
            record_type: Some(record_type.into()),
            properties: BTreeMap::new(),
        })
    }

    /// List of composites over a to-many relation. Without explicit properties
    /// the children are derived from `record_type` at compile time.
    pub fn nested(record_type: impl Into<String>) -> Self {
        Self::object(record_type).list()
    }

    pub fn path(self, path: impl Into<String>) -> Self {
        self.source(FieldSource::Attribute(Some(path.into())))
    }

    pub fn constant(self, value: Json) -> Self {
        self.source(FieldSource::Constant(value))
    }

    pub fn source(mut self, source: FieldSource) -> Self {
        self.source = source;
        self
    }

    pub fn list(mut self) -> Self {
        self.multiplicity = Multiplicity::List;
        self
    }

    pub fn analyzer(mut self, analyzer: Analyzer) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Add a child field (composite kinds only; ignored on scalars)
    pub fn property(mut self, name: impl Into<String>, field: FieldDeclaration) -> Self {
        if let FieldKind::Object { properties, .. } = &mut self.kind {
            properties.insert(name.into(), field);
        }
        self
    }

    pub(crate) fn with_properties(mut self, derived: BTreeMap<String, FieldDeclaration>) -> Self {
        if let FieldKind::Object { properties, .. } = &mut self.kind {
            *properties = derived;
        }
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn field_source(&self) -> &FieldSource {
        &self.source
    }

    pub fn multiplicity(&self) -> Multiplicity {
        self.multiplicity
    }

    pub fn get_analyzer(&self) -> Option<&Analyzer> {
        self.analyzer.as_ref()
    }

    pub fn separator(&self) -> Option<&str> {
        self.joined.as_deref()
    }

    pub fn properties(&self) -> Option<&BTreeMap<String, FieldDeclaration>> {
        match &self.kind {
            FieldKind::Object { properties, .. } => Some(properties),
            FieldKind::Scalar(_) => None,
        }
    }

    pub fn related_type(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Object { record_type, .. } => record_type.as_deref(),
            FieldKind::Scalar(_) => None,
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.kind, FieldKind::Object { .. }) && self.multiplicity == Multiplicity::List
    }

    /// This field and every descendant (depth first)
    pub fn walk(&self) -> Vec<&FieldDeclaration> {
        let mut all = vec![self];
        if let Some(properties) = self.properties() {
            for child in properties.values() {
                all.extend(child.walk());
            }
        }
        all
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Schema
    // ═══════════════════════════════════════════════════════════════════════

    pub fn schema(&self) -> Json {
        let mut schema = match &self.kind {
            FieldKind::Scalar(kind) => json!({ "type": kind.as_str() }),
            FieldKind::Object { properties, .. } => {
                let kind = match self.multiplicity {
                    Multiplicity::Single => "object",
                    Multiplicity::List => "nested",
                };
                let properties: Map<String, Json> = properties
                    .iter()
                    .map(|(name, field)| (name.clone(), field.schema()))
                    .collect();
                json!({ "type": kind, "properties": properties })
            }
        };
        if let Some(analyzer) = &self.analyzer {
            schema["analyzer"] = json!(analyzer.name());
        }
        schema
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Resolution
    // ═══════════════════════════════════════════════════════════════════════

    /// Document value for `record`; `Ok(None)` omits the field
    pub fn resolve(
        &self,
        name: &str,
        record: &Record,
        ctx: &ResolveContext<'_>,
    ) -> Result<Option<Json>> {
        match &self.source {
            FieldSource::Constant(value) => Ok(Some(value.clone())),
            FieldSource::Template(template) => {
                let context = RenderContext::new(record, ctx.store);
                ctx.renderer
                    .render(template, &context)
                    .map(|text| Some(Json::String(text)))
                    .map_err(|e| SyncError::render(template, e.to_string()))
            }
            FieldSource::Attribute(path) => {
                let path = AttributePath::compile(
                    path.as_deref().unwrap_or(name),
                    self.multiplicity == Multiplicity::List,
                );
                match path.evaluate(record, ctx.store)? {
                    Some(resolved) => self.format(resolved, ctx).map(Some),
                    None => Ok(None),
                }
            }
        }
    }

    /// Shape a resolved value according to kind and multiplicity
    pub fn format(&self, resolved: Resolved, ctx: &ResolveContext<'_>) -> Result<Json> {
        if self.multiplicity == Multiplicity::Single {
            return self.format_one(resolved, ctx);
        }

        let items: Vec<Resolved> = match resolved {
            Resolved::Value(Value::Null) => return Ok(Json::Null),
            Resolved::Records(records) => records.into_iter().map(Resolved::Record).collect(),
            other => vec![other],
        };

        if let Some(separator) = &self.joined {
            let texts: Vec<String> = items
                .into_iter()
                .filter_map(|item| text_of(item, ctx))
                .collect();
            return Ok(Json::String(texts.join(separator)));
        }

        items
            .into_iter()
            .map(|item| self.format_one(item, ctx))
            .collect::<Result<Vec<_>>>()
            .map(Json::Array)
    }

    fn format_one(&self, resolved: Resolved, ctx: &ResolveContext<'_>) -> Result<Json> {
        let json = match (&self.kind, resolved) {
            (_, Resolved::Value(Value::Null)) => Json::Null,
            (FieldKind::Object { properties, .. }, Resolved::Record(related)) => {
                Json::Object(resolve_all(properties, &related, ctx)?)
            }
            (FieldKind::Object { properties, .. }, Resolved::Records(records)) => Json::Array(
                records
                    .iter()
                    .map(|related| resolve_all(properties, related, ctx).map(Json::Object))
                    .collect::<Result<Vec<_>>>()?,
            ),
            (FieldKind::Scalar(ScalarKind::String), resolved) => {
                text_of(resolved, ctx).map(Json::String).unwrap_or(Json::Null)
            }
            (_, Resolved::Value(value)) => value.to_json(),
            (_, Resolved::Record(related)) => json!(related.id.0),
            (_, Resolved::Records(records)) => {
                Json::Array(records.iter().map(|r| json!(r.id.0)).collect())
            }
            (_, Resolved::Related(_)) | (_, Resolved::Method { .. }) => Json::Null,
        };
        Ok(json)
    }
}

/// Resolve every field of `fields` against `record`, omitting missing ones
pub fn resolve_all(
    fields: &BTreeMap<String, FieldDeclaration>,
    record: &Record,
    ctx: &ResolveContext<'_>,
) -> Result<Map<String, Json>> {
    let mut document = Map::new();
    for (name, field) in fields {
        if let Some(value) = field.resolve(name, record, ctx)? {
            document.insert(name.clone(), value);
        }
    }
    Ok(document)
}

fn text_of(resolved: Resolved, ctx: &ResolveContext<'_>) -> Option<String> {
    match resolved {
        Resolved::Value(value) => value.to_text(),
        Resolved::Record(record) => Some(ctx.store.display(&record)),
        Resolved::Records(records) => Some(
            records
                .iter()
                .map(|r| ctx.store.display(r))
                .collect::<Vec<_>>()
                .join(DEFAULT_JOIN_SEPARATOR),
        ),
        Resolved::Related(_) | Resolved::Method { .. } => None,
    }
}
