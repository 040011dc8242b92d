//! Index declarations, compilation, registry and runtime

pub mod compiler;
pub mod declaration;
pub mod registry;
pub mod runtime;

pub use compiler::{split_record_type, CompiledIndex, IndexKey, DEFAULT_DATE_FIELD, PK_FIELD};
pub use declaration::IndexDeclaration;
pub use registry::{global, install_global, IndexRegistry};
pub use runtime::{
    BoundIndex, BulkOutcome, EngineBinding, IndexRuntime, IndexRuntimeBuilder,
    DOC_TYPE_PLACEHOLDER,
};
