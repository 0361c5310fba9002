//! Lifecycle host for a single cluster silo.
//!
//! A silo is taken through configuration checks, membership provider
//! resolution and cluster attach by a single-use [`SiloController`]. Each
//! attempt runs inside an [`IsolationBoundary`] that contains its failures
//! and reclaims what it acquired, and a [`RetryDriver`] hands every attempt
//! a brand-new controller and boundary.

mod config;
mod errors;
mod isolation;
mod provider;
mod retry;
mod silo;
pub mod metrics;

pub use config::*;
pub use errors::*;
pub use isolation::*;
pub use provider::*;
pub use retry::*;
pub use silo::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
