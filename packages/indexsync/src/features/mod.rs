//! Feature modules
//!
//! Dependency order, leaves first:
//! `analysis` → `fields` → `index` → `propagation`, with `search_engine`
//! as the engine-side port used by `index`.

pub mod analysis;
pub mod fields;
pub mod index;
pub mod propagation;
pub mod search_engine;
