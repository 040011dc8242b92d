//! Mapping → Tantivy schema
//!
//! # Reserved fields
//!
//! 1. `_uid` - `<doc_type>#<id>` (raw, upsert/delete key)
//! 2. `_id` - document id (raw, STORED)
//! 3. `_type` - document type (raw, STORED)
//! 4. `_source` - original JSON body (STORED only)
//!
//! # Mapped fields
//!
//! | mapping type          | tantivy field                          |
//! |-----------------------|----------------------------------------|
//! | `string`              | text, tokenizer from `analyzer`         |
//! | `integer`             | i64, INDEXED                           |
//! | `boolean`             | bool, INDEXED                          |
//! | `date`                | date, INDEXED                          |
//! | `object` / `nested`   | JSON, default tokenizer                |
//!
//! Every doc type of an index shares one schema; when two doc types map the
//! same field name differently the first mapping (by doc type name) wins.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tantivy::schema::{
    Field, IndexRecordOption, JsonObjectOptions, Schema, TextFieldIndexing, TextOptions, INDEXED,
    STORED,
};
use tracing::warn;

use super::tokenizer::{tokenizer_for, DEFAULT_TOKENIZER};
use crate::features::search_engine::ports::{EngineError, EngineResult};

pub const FIELD_UID: &str = "_uid";
pub const FIELD_ID: &str = "_id";
pub const FIELD_TYPE: &str = "_type";
pub const FIELD_SOURCE: &str = "_source";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedType {
    Text { tokenizer: String },
    Integer,
    Boolean,
    Date,
    Json,
}

impl MappedType {
    fn from_mapping(property: &Value, registered: &BTreeSet<String>) -> Self {
        match property["type"].as_str() {
            Some("integer") | Some("long") => MappedType::Integer,
            Some("boolean") => MappedType::Boolean,
            Some("date") => MappedType::Date,
            Some("object") | Some("nested") => MappedType::Json,
            _ => MappedType::Text {
                tokenizer: tokenizer_for(property["analyzer"].as_str(), registered),
            },
        }
    }
}

/// Reject mappings that would shadow a reserved field
pub fn validate_mapping(mapping: &Value) -> EngineResult<()> {
    let Some(properties) = mapping["properties"].as_object() else {
        return Err(EngineError::InvalidInput(
            "mapping must carry a \"properties\" object".to_string(),
        ));
    };
    if let Some(name) = properties.keys().find(|name| name.starts_with('_')) {
        return Err(EngineError::InvalidInput(format!(
            "field name '{}' is reserved",
            name
        )));
    }
    Ok(())
}

/// Field name → mapped type over every doc type mapping
pub fn mapped_fields(
    mappings: &BTreeMap<String, Value>,
    registered: &BTreeSet<String>,
) -> BTreeMap<String, MappedType> {
    let mut fields: BTreeMap<String, MappedType> = BTreeMap::new();
    for (doc_type, mapping) in mappings {
        let Some(properties) = mapping["properties"].as_object() else {
            continue;
        };
        for (name, property) in properties {
            let mapped = MappedType::from_mapping(property, registered);
            match fields.get(name) {
                Some(existing) if *existing != mapped => {
                    warn!(field = %name, doc_type = %doc_type, "Conflicting field mapping ignored");
                }
                Some(_) => {}
                None => {
                    fields.insert(name.clone(), mapped);
                }
            }
        }
    }
    fields
}

fn raw_options() -> TextOptions {
    TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("raw")
                .set_index_option(IndexRecordOption::Basic),
        )
        .set_stored()
}

fn text_options(tokenizer: &str) -> TextOptions {
    TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(tokenizer)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    )
}

pub fn build_schema(fields: &BTreeMap<String, MappedType>) -> Schema {
    let mut schema_builder = Schema::builder();

    schema_builder.add_text_field(FIELD_UID, raw_options());
    schema_builder.add_text_field(FIELD_ID, raw_options());
    schema_builder.add_text_field(FIELD_TYPE, raw_options());
    schema_builder.add_text_field(FIELD_SOURCE, STORED);

    for (name, mapped) in fields {
        match mapped {
            MappedType::Text { tokenizer } => {
                schema_builder.add_text_field(name, text_options(tokenizer));
            }
            MappedType::Integer => {
                schema_builder.add_i64_field(name, INDEXED);
            }
            MappedType::Boolean => {
                schema_builder.add_bool_field(name, INDEXED);
            }
            MappedType::Date => {
                schema_builder.add_date_field(name, INDEXED);
            }
            MappedType::Json => {
                let options = JsonObjectOptions::default().set_indexing_options(
                    TextFieldIndexing::default()
                        .set_tokenizer(DEFAULT_TOKENIZER)
                        .set_index_option(IndexRecordOption::WithFreqsAndPositions),
                );
                schema_builder.add_json_field(name, options);
            }
        }
    }

    schema_builder.build()
}

/// Field handles (cached)
#[derive(Debug, Clone)]
pub struct SchemaFields {
    pub schema: Schema,
    pub uid: Field,
    pub id: Field,
    pub doc_type: Field,
    pub source: Field,
    pub mapped: BTreeMap<String, (Field, MappedType)>,
}

impl SchemaFields {
    pub fn new(fields: BTreeMap<String, MappedType>) -> EngineResult<Self> {
        let schema = build_schema(&fields);
        let mut mapped = BTreeMap::new();
        for (name, kind) in fields {
            let field = schema.get_field(&name)?;
            mapped.insert(name, (field, kind));
        }

        Ok(Self {
            uid: schema.get_field(FIELD_UID)?,
            id: schema.get_field(FIELD_ID)?,
            doc_type: schema.get_field(FIELD_TYPE)?,
            source: schema.get_field(FIELD_SOURCE)?,
            mapped,
            schema,
        })
    }

    /// JSON accepted by `TantivyDocument::parse_json`: reserved fields plus the
    /// mapped subset of `body`, coerced to the mapped types (values that cannot
    /// be coerced are dropped)
    pub fn document_json(&self, doc_type: &str, id: &str, body: &Value) -> Value {
        let mut document = Map::new();
        document.insert(FIELD_UID.to_string(), Value::String(uid(doc_type, id)));
        document.insert(FIELD_ID.to_string(), Value::String(id.to_string()));
        document.insert(FIELD_TYPE.to_string(), Value::String(doc_type.to_string()));
        document.insert(FIELD_SOURCE.to_string(), Value::String(body.to_string()));

        if let Some(body) = body.as_object() {
            for (name, value) in body {
                let Some((_, kind)) = self.mapped.get(name) else {
                    continue;
                };
                let values: Vec<Value> = match value {
                    Value::Array(items) => items.iter().filter_map(|v| coerce(kind, v)).collect(),
                    other => coerce(kind, other).into_iter().collect(),
                };
                if !values.is_empty() {
                    document.insert(name.clone(), Value::Array(values));
                }
            }
        }
        Value::Object(document)
    }
}

pub fn uid(doc_type: &str, id: &str) -> String {
    format!("{}#{}", doc_type, id)
}

fn coerce(kind: &MappedType, value: &Value) -> Option<Value> {
    match (kind, value) {
        (_, Value::Null) => None,
        (MappedType::Text { .. }, Value::String(_)) => Some(value.clone()),
        (MappedType::Text { .. }, Value::Number(_) | Value::Bool(_)) => {
            Some(Value::String(value.to_string()))
        }
        (MappedType::Integer, Value::Number(n)) => n.as_i64().map(Value::from),
        (MappedType::Integer, Value::String(s)) => s.parse::<i64>().ok().map(Value::from),
        (MappedType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (MappedType::Date, Value::String(_)) => Some(value.clone()),
        (MappedType::Json, Value::Object(_)) => Some(value.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post_fields() -> BTreeMap<String, MappedType> {
        let mappings = BTreeMap::from([(
            "blog_post_search".to_string(),
            json!({"properties": {
                "pk": {"type": "integer"},
                "title": {"type": "string", "analyzer": "ngram_2_3_analyzer"},
                "published": {"type": "boolean"},
                "modified_on": {"type": "date"},
                "tags": {"type": "nested", "properties": {"tag": {"type": "string"}}},
            }}),
        )]);
        mapped_fields(&mappings, &BTreeSet::from(["ngram_2_3_analyzer".to_string()]))
    }

    #[test]
    fn test_mapped_types() {
        let fields = post_fields();
        assert_eq!(fields["pk"], MappedType::Integer);
        assert_eq!(
            fields["title"],
            MappedType::Text {
                tokenizer: "ngram_2_3_analyzer".into()
            }
        );
        assert_eq!(fields["tags"], MappedType::Json);
    }

    #[test]
    fn test_schema_has_reserved_and_mapped_fields() {
        let fields = SchemaFields::new(post_fields()).unwrap();
        assert_eq!(fields.schema.fields().count(), 4 + 5);
        assert!(fields.schema.get_field_entry(fields.source).is_stored());
        assert!(!fields.schema.get_field_entry(fields.source).is_indexed());
    }

    #[test]
    fn test_conflicting_doc_types_keep_first() {
        let mappings = BTreeMap::from([
            ("a".to_string(), json!({"properties": {"x": {"type": "integer"}}})),
            ("b".to_string(), json!({"properties": {"x": {"type": "string"}}})),
        ]);
        let fields = mapped_fields(&mappings, &BTreeSet::new());
        assert_eq!(fields["x"], MappedType::Integer);
    }

    #[test]
    fn test_reserved_names_rejected() {
        assert!(validate_mapping(&json!({"properties": {"_id": {"type": "string"}}})).is_err());
        assert!(validate_mapping(&json!({})).is_err());
        assert!(validate_mapping(&json!({"properties": {"pk": {"type": "integer"}}})).is_ok());
    }

    #[test]
    fn test_document_json_coerces_and_drops() {
        let fields = SchemaFields::new(post_fields()).unwrap();
        let body = json!({
            "pk": 3,
            "title": 42,
            "published": "yes",
            "modified_on": null,
            "tags": [{"tag": "a"}, {"tag": "b"}],
            "unmapped": "x",
        });
        let document = fields.document_json("blog_post_search", "3", &body);

        assert_eq!(document["_uid"], json!("blog_post_search#3"));
        assert_eq!(document["pk"], json!([3]));
        assert_eq!(document["title"], json!(["42"]));
        assert!(document.get("published").is_none());
        assert!(document.get("modified_on").is_none());
        assert!(document.get("unmapped").is_none());
        assert_eq!(document["tags"], json!([{"tag": "a"}, {"tag": "b"}]));
        assert_eq!(document["_source"], json!(body.to_string()));
    }
}
