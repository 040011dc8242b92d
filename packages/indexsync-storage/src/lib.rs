//! indexsync-storage - Record Store Port
//!
//! The record store is the relational side of index synchronization: it owns
//! the rows, describes their types, follows relations, answers
//! "modified since" queries and notifies observers around every mutation.
//!
//! ## Layers
//!
//! - `domain`: record model, type metadata, `RecordStore` / `MutationObserver` ports
//! - `infrastructure`: adapters (`MemoryRecordStore`, feature `memory`)
//!
//! ## Usage
//!
//! ```rust
//! use indexsync_storage::{AttributeMeta, MemoryRecordStore, Record, RecordTypeMeta};
//!
//! let store = MemoryRecordStore::new();
//! store.register_type(
//!     RecordTypeMeta::new("blog.author")
//!         .attribute(AttributeMeta::text("name"))
//!         .display("name"),
//! );
//!
//! let author = store.save(Record::new("blog.author").with("name", "Ada"))?;
//! assert!(!author.id.is_unsaved());
//! # Ok::<(), indexsync_storage::StorageError>(())
//! ```

pub mod domain;
pub mod error;

pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    Attr, AttributeKind, AttributeMeta, DependentSnapshot, Method, MutationEvent, MutationKind,
    MutationObserver, ObserverError, Record, RecordId, RecordQuery, RecordRef, RecordStore,
    RecordTypeMeta, RelatedSet, RelationFilter, Value,
};

#[cfg(feature = "memory")]
pub use infrastructure::MemoryRecordStore;
