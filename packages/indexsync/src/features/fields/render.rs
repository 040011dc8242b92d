//! Template renderer port
//!
//! Template-sourced fields hand the record to an application-provided
//! renderer and index the returned text. There is no default template
//! language: `NoTemplates` fails every render, `FnRenderer` adapts a closure.

use serde_json::{json, Map, Value as Json};
use thiserror::Error;

use indexsync_storage::{Record, RecordStore};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

/// Data bound into a template: the record (as `object`) and the store to follow
/// its relations
pub struct RenderContext<'a> {
    pub record: &'a Record,
    pub store: &'a dyn RecordStore,
}

impl<'a> RenderContext<'a> {
    pub fn new(record: &'a Record, store: &'a dyn RecordStore) -> Self {
        Self { record, store }
    }

    /// `{"object": {"pk": .., <attributes>..}}`
    pub fn to_json(&self) -> Json {
        let mut object: Map<String, Json> = self
            .record
            .attributes
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        object.insert("pk".to_string(), json!(self.record.id.0));
        json!({ "object": object })
    }
}

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, context: &RenderContext<'_>) -> Result<String, RenderError>;
}

/// Renderer used when the application configures none
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTemplates;

impl TemplateRenderer for NoTemplates {
    fn render(&self, template: &str, _context: &RenderContext<'_>) -> Result<String, RenderError> {
        Err(RenderError::NotFound(template.to_string()))
    }
}

/// Closure adapter
///
/// ```rust
/// use indexsync::{FnRenderer, RenderContext, TemplateRenderer};
/// use indexsync_storage::{MemoryRecordStore, Record};
///
/// let renderer = FnRenderer::new(|template: &str, ctx: &RenderContext<'_>| {
///     Ok(format!("{} for {}", template, ctx.record.reference()))
/// });
/// let store = MemoryRecordStore::new();
/// let record = Record::new("blog.post").with_id(3);
/// let text = renderer.render("t.html", &RenderContext::new(&record, &store)).unwrap();
/// assert_eq!(text, "t.html for blog.post#3");
/// ```
pub struct FnRenderer<F> {
    func: F,
}

impl<F> FnRenderer<F>
where
    F: Fn(&str, &RenderContext<'_>) -> Result<String, RenderError> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> TemplateRenderer for FnRenderer<F>
where
    F: Fn(&str, &RenderContext<'_>) -> Result<String, RenderError> + Send + Sync,
{
    fn render(&self, template: &str, context: &RenderContext<'_>) -> Result<String, RenderError> {
        (self.func)(template, context)
    }
}
