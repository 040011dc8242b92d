//! Change propagation: mutation observer, dependency fan-out, suspension

pub mod propagator;
pub mod suspension;

pub use propagator::ChangePropagator;
pub use suspension::{Released, ReplayReport, SuspensionScope, SuspensionStack};
