//! Command target selection
//!
//! A selector is `app`, `app.model` or `app.model.facet`. No selectors
//! selects every registered index.

use std::sync::Arc;

use crate::errors::{Result, SyncError};
use crate::features::index::{split_record_type, CompiledIndex, IndexRegistry};

fn selects(index: &CompiledIndex, selector: &str) -> bool {
    let (app_label, _) = split_record_type(index.record_type());
    selector == app_label || selector == index.record_type() || selector == index.key().to_string()
}

/// Indexes named by `selectors`, in registry order. A selector matching no
/// index is an error.
pub fn select_targets(
    registry: &IndexRegistry,
    selectors: &[String],
) -> Result<Vec<Arc<CompiledIndex>>> {
    if let Some(unknown) = selectors
        .iter()
        .find(|selector| !registry.iter().any(|index| selects(index, selector)))
    {
        return Err(SyncError::UnknownIndex(unknown.clone()));
    }

    Ok(registry
        .iter()
        .filter(|index| selectors.is_empty() || selectors.iter().any(|s| selects(index, s)))
        .cloned()
        .collect())
}
