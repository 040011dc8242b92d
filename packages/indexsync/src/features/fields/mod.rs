//! Field Model
//!
//! - `path`: attribute path interpreter (`Read` / `Invoke` / `FetchAll`)
//! - `declaration`: typed field declarations, resolution and schema fragments
//! - `render`: template renderer port used by template-sourced fields

pub mod declaration;
pub mod path;
pub mod render;

pub use declaration::{
    resolve_all, FieldDeclaration, FieldKind, FieldSource, Multiplicity, ResolveContext,
    ScalarKind, DEFAULT_JOIN_SEPARATOR,
};
pub use path::{split_path, AttributePath, PathToken, Resolved};
pub use render::{FnRenderer, NoTemplates, RenderContext, RenderError, TemplateRenderer};
