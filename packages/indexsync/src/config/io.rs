//! Configuration I/O (YAML schema)
//!
//! Defines the on-disk schema. Loading, defaults and validation live in
//! `config/mod.rs`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// YAML Schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileV1 {
    /// Schema version (always 1 for v1)
    pub version: u64,

    /// Search engine endpoints by logical name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<BTreeMap<String, ConnectionConfig>>,

    /// Seconds subtracted from a suspension scope's start before replay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspension_buffer_secs: Option<u64>,

    /// Bulk chunk size for declarations that do not set `index_by`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_index_by: Option<usize>,
}

/// One search engine endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Index name pattern; `{doc_type}` is replaced by the declaration's doc type
    #[serde(default = "default_index_name")]
    pub index_name: String,

    #[serde(default)]
    pub engine: EngineKind,

    /// On-disk location for the tantivy engine (in RAM when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            index_name: default_index_name(),
            engine: EngineKind::default(),
            path: None,
        }
    }
}

fn default_index_name() -> String {
    "{doc_type}".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Memory,
    Tantivy,
}
