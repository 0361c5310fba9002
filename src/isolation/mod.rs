//! Crash containment for silo attempts.
//!
//! An attempt runs inside an [`IsolationBoundary`]: a supervised task whose
//! panics and background failures are funnelled through an explicit failure
//! channel rather than a process-wide handler, plus a [`BoundaryScope`] that
//! records every resource the attempt acquires so teardown can reclaim it.

mod boundary;
mod scope;
pub use boundary::*;
pub use scope::*;
