//! Membership providers and the loader that resolves them.
//!
//! A membership provider records which silos currently belong to a cluster.
//! The lifecycle controller never names a provider type directly: it asks
//! the [`ProviderRegistry`] to resolve the unit selected by the cluster
//! configuration and drives it only through [`MembershipProvider`].

mod in_memory;
mod loader;
pub use in_memory::*;
pub use loader::*;


#[cfg(test)]
use mockall::automock;
use async_trait::async_trait;

use crate::ClusterConfig;
use crate::Result;

/// Capability set every membership provider must offer.
///
/// Any error returned from these calls is handled by the controller exactly
/// like one of its own failures.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MembershipProvider: Send + Sync + 'static {
    /// Local-only check of the settings the provider will run with.
    /// Must not perform network or storage I/O.
    fn validate(
        &self,
        config: &ClusterConfig,
    ) -> Result<()>;

    /// Registers the silo in the cluster membership. May suspend while
    /// waiting for the membership store to acknowledge.
    async fn attach(
        &self,
        config: &ClusterConfig,
    ) -> Result<()>;

    /// Releases whatever `attach` acquired. Must be safe to call on a
    /// provider whose attach never completed.
    async fn detach(&self) -> Result<()>;
}
