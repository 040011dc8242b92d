//! Suspension scopes
//!
//! A scope pushes a set of record types onto the propagator's stack. While
//! any open scope holds a type (or one of its ancestors), propagation for
//! that type is skipped. Leaving a scope replays its own types, minus those
//! still held by another open scope, by backfilling every related index
//! from `start - buffer`.
//!
//! Deferred types are not lost: every open scope still holding one of them
//! takes over the earlier start, so its own exit replays the whole window.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use indexsync_storage::RecordStore;

use super::propagator::ChangePropagator;
use crate::errors::Result;
use crate::features::index::BulkOutcome;

#[derive(Debug)]
struct OpenScope {
    id: u64,
    types: BTreeSet<String>,
    start: DateTime<Utc>,
}

impl OpenScope {
    fn holds(&self, record_type: &str, store: &dyn RecordStore) -> bool {
        self.types
            .iter()
            .any(|suspended| store.is_subtype(record_type, suspended))
    }
}

/// Types released by a closing scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    /// No longer suspended anywhere; replay now
    pub replayed: BTreeSet<String>,
    /// Still held by another open scope, which inherits `start`
    pub deferred: BTreeSet<String>,
    /// Replay window lower bound
    pub start: DateTime<Utc>,
}

/// Open scopes, innermost last
#[derive(Debug, Default)]
pub struct SuspensionStack {
    scopes: Mutex<Vec<OpenScope>>,
    next_id: AtomicU64,
}

impl SuspensionStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, types: BTreeSet<String>, start: DateTime<Utc>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.scopes.lock().push(OpenScope { id, types, start });
        id
    }

    /// Replay window start of scope `id`, lowered by any deferral it inherited
    pub fn start_of(&self, id: u64) -> Option<DateTime<Utc>> {
        self.scopes
            .lock()
            .iter()
            .find(|scope| scope.id == id)
            .map(|scope| scope.start)
    }

    /// Remove scope `id` and split its types into replayed and deferred.
    ///
    /// Open scopes holding a deferred type move their start back to the
    /// released scope's start when it is earlier. `None` when `id` is not open.
    pub fn release(&self, id: u64, store: &dyn RecordStore) -> Option<Released> {
        let mut scopes = self.scopes.lock();
        let pos = scopes.iter().position(|scope| scope.id == id)?;
        let closed = scopes.remove(pos);

        let (deferred, replayed): (BTreeSet<String>, BTreeSet<String>) =
            closed.types.into_iter().partition(|record_type| {
                scopes.iter().any(|open| open.holds(record_type, store))
            });

        for open in scopes.iter_mut() {
            let inherits = deferred.iter().any(|record_type| open.holds(record_type, store));
            if inherits && closed.start < open.start {
                debug!(scope = open.id, start = %closed.start, "Replay window extended");
                open.start = closed.start;
            }
        }

        Some(Released {
            replayed,
            deferred,
            start: closed.start,
        })
    }

    pub fn is_suspended(&self, record_type: &str, store: &dyn RecordStore) -> bool {
        self.scopes
            .lock()
            .iter()
            .any(|scope| scope.holds(record_type, store))
    }

    pub fn suspended_types(&self) -> BTreeSet<String> {
        self.scopes
            .lock()
            .iter()
            .flat_map(|scope| scope.types.iter().cloned())
            .collect()
    }

    pub fn depth(&self) -> usize {
        self.scopes.lock().len()
    }
}

/// What a scope exit reindexed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    /// Types replayed by this exit
    pub types: BTreeSet<String>,
    /// `(index key, outcome)` per backfilled index
    pub indexes: Vec<(String, BulkOutcome)>,
}

impl ReplayReport {
    pub fn documents(&self) -> usize {
        self.indexes.iter().map(|(_, outcome)| outcome.success_count).sum()
    }
}

/// Guard for one open suspension scope
///
/// Dropping the guard replays like `close()` does and logs a failed replay.
#[must_use = "the scope is closed (and replayed) as soon as the guard is dropped"]
pub struct SuspensionScope<'a> {
    propagator: &'a ChangePropagator,
    id: u64,
    types: BTreeSet<String>,
    start: DateTime<Utc>,
    closed: bool,
}

impl<'a> SuspensionScope<'a> {
    pub(crate) fn open(propagator: &'a ChangePropagator, types: BTreeSet<String>) -> Self {
        let buffer = chrono::Duration::from_std(propagator.buffer())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let start = Utc::now() - buffer;
        let id = propagator.suspension().push(types.clone(), start);
        info!(types = ?types, "Suspended index propagation");
        Self {
            propagator,
            id,
            types,
            start,
            closed: false,
        }
    }

    pub fn types(&self) -> &BTreeSet<String> {
        &self.types
    }

    /// Lower bound of the replay window; earlier than the opening time when
    /// a scope closed before this one handed over deferred types
    pub fn start(&self) -> DateTime<Utc> {
        self.propagator
            .suspension()
            .start_of(self.id)
            .unwrap_or(self.start)
    }

    pub fn close(mut self) -> Result<ReplayReport> {
        self.closed = true;
        self.replay()
    }

    fn replay(&self) -> Result<ReplayReport> {
        let suspension = self.propagator.suspension();
        let runtime = self.propagator.runtime();
        let store = runtime.store().as_ref();

        let Some(released) = suspension.release(self.id, store) else {
            return Ok(ReplayReport::default());
        };
        if !released.deferred.is_empty() {
            warn!(
                types = ?released.deferred,
                "Replay deferred, types still suspended by an open scope"
            );
        }

        let start = released.start;
        let mut report = ReplayReport {
            types: released.replayed,
            indexes: Vec::new(),
        };
        if report.types.is_empty() {
            return Ok(report);
        }

        let related = |a: &str, b: &str| store.is_subtype(a, b) || store.is_subtype(b, a);
        for bound in runtime.bound_indexes()? {
            let index = bound.index();
            let affected = report.types.iter().any(|record_type| {
                related(record_type.as_str(), index.record_type())
                    || index
                        .dependencies()
                        .keys()
                        .any(|dependency| related(record_type.as_str(), dependency.as_str()))
            });
            if !affected {
                continue;
            }
            let outcome = bound.backfill(Some(start), None, None)?;
            report.indexes.push((index.key().to_string(), outcome));
        }

        info!(
            types = ?report.types,
            indexes = report.indexes.len(),
            documents = report.documents(),
            "Replayed suspended changes"
        );
        Ok(report)
    }
}

impl Drop for SuspensionScope<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.replay() {
            warn!(types = ?self.types, error = %e, "Replay after suspension failed");
        }
    }
}
