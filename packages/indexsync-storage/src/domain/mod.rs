//! Domain layer for the record store
//!
//! # Domain Models
//!
//! - `Record`: flat row of scalar attributes and foreign-key id columns
//! - `RecordTypeMeta`: attribute kinds, computed methods, parent types
//!
//! # Port Traits
//!
//! - `RecordStore`: introspection, traversal and filtered retrieval
//! - `MutationObserver`: before/after hooks around every mutation

pub mod meta;
pub mod models;
pub mod ports;

pub use meta::{AttributeKind, AttributeMeta, Method, MethodFn, RecordTypeMeta};
pub use models::{Record, RecordId, RecordRef, Value};
pub use ports::{
    Attr, DependentSnapshot, MutationEvent, MutationKind, MutationObserver, ObserverError,
    RecordQuery, RecordStore, RelatedSet, RelationFilter,
};
