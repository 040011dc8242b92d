//! Infrastructure layer - Record store adapters

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::MemoryRecordStore;
