//! Resolves the membership provider named by a cluster configuration.
//!
//! Units are registered under a location string before any silo starts and
//! the registry is frozen afterwards, so one registry can be shared by every
//! attempt. Resolution only constructs the provider; nothing is attached and
//! nothing in the registry changes, whether resolution succeeds or not.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use super::InMemoryMembershipProvider;
use super::InMemoryMembershipTable;
use super::MembershipProvider;
use crate::metrics::PROVIDER_RESOLUTIONS;
use crate::ClusterConfig;
use crate::LivenessKind;
use crate::LoadError;
use crate::Result;

/// Location of the built-in in-memory membership table unit.
pub const IN_MEMORY_PROVIDER_LOCATION: &str = "silo_host.membership.in_memory";

/// Interface version membership units must be built against.
pub const MEMBERSHIP_PROVIDER_ABI: u32 = 1;

/// Builds a fresh, not yet attached provider.
pub type MembershipProviderFactory = Arc<dyn Fn() -> Arc<dyn MembershipProvider> + Send + Sync>;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// What a registered unit exports.
#[derive(Clone)]
pub enum UnitExport {
    MembershipProvider(MembershipProviderFactory),
    /// Some other component kind (reminder table, stream provider, ...)
    Component { kind: String },
}

impl fmt::Debug for UnitExport {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            UnitExport::MembershipProvider(_) => write!(f, "MembershipProvider"),
            UnitExport::Component { kind } => write!(f, "Component({kind})"),
        }
    }
}

/// A loadable unit registered under a location.
#[derive(Debug, Clone)]
pub struct ProviderUnit {
    location: String,
    abi_version: u32,
    export: UnitExport,
}

impl ProviderUnit {
    /// Unit exporting a membership provider built against the current ABI.
    pub fn membership<F, P>(
        location: impl Into<String>,
        factory: F,
    ) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: MembershipProvider,
    {
        let factory: MembershipProviderFactory = Arc::new(move || Arc::new(factory()) as Arc<dyn MembershipProvider>);
        Self {
            location: location.into(),
            abi_version: MEMBERSHIP_PROVIDER_ABI,
            export: UnitExport::MembershipProvider(factory),
        }
    }

    /// Unit exporting a provider that is already type-erased.
    pub fn membership_dyn(
        location: impl Into<String>,
        factory: MembershipProviderFactory,
    ) -> Self {
        Self {
            location: location.into(),
            abi_version: MEMBERSHIP_PROVIDER_ABI,
            export: UnitExport::MembershipProvider(factory),
        }
    }

    /// Unit exporting something other than a membership provider.
    pub fn component(
        location: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            location: location.into(),
            abi_version: MEMBERSHIP_PROVIDER_ABI,
            export: UnitExport::Component { kind: kind.into() },
        }
    }

    pub fn with_abi_version(
        mut self,
        abi_version: u32,
    ) -> Self {
        self.abi_version = abi_version;
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }
}

/// A resolved provider that has not been started.
///
/// Owned by exactly one lifecycle controller; deliberately not `Clone`.
pub struct ProviderHandle {
    id: u64,
    location: String,
    provider: Arc<dyn MembershipProvider>,
}

impl ProviderHandle {
    fn new(
        location: String,
        provider: Arc<dyn MembershipProvider>,
    ) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            location,
            provider,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn provider(&self) -> &dyn MembershipProvider {
        self.provider.as_ref()
    }

    /// Reference kept by the isolation boundary so it can force a detach if
    /// the owning controller disappears mid-attempt.
    pub(crate) fn teardown_ref(&self) -> Arc<dyn MembershipProvider> {
        self.provider.clone()
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("id", &self.id)
            .field("location", &self.location)
            .finish()
    }
}

/// Read-only map from location to loadable unit.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    units: HashMap<String, ProviderUnit>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Registry holding only the built-in units, backed by a fresh table.
    pub fn builtin() -> Self {
        Self::builder().with_in_memory_table(InMemoryMembershipTable::default()).build()
    }

    pub fn contains(
        &self,
        location: &str,
    ) -> bool {
        self.units.contains_key(location)
    }

    /// Resolves the membership provider selected by `config`.
    ///
    /// # Errors
    /// - `LoadError::InvalidConfiguration` when the liveness kind and the
    ///   location contradict each other
    /// - `LoadError::NotFound` when no unit is registered at the location
    /// - `LoadError::TypeMismatch` when the unit exports another component
    ///   kind or targets an incompatible interface version
    pub fn resolve(
        &self,
        config: &ClusterConfig,
    ) -> Result<ProviderHandle> {
        let result = self.resolve_unit(config);
        let label = match &result {
            Ok(_) => "ok",
            Err(LoadError::NotFound { .. }) => "not_found",
            Err(LoadError::TypeMismatch { .. }) => "type_mismatch",
            Err(LoadError::InvalidConfiguration(_)) => "invalid_configuration",
        };
        PROVIDER_RESOLUTIONS.with_label_values(&[label]).inc();

        match result {
            Ok(handle) => {
                debug!(
                    "resolved membership provider at {:?} (handle {}) for silo {}",
                    handle.location, handle.id, config.silo_name
                );
                Ok(handle)
            }
            Err(e) => {
                warn!("failed to resolve membership provider for silo {}: {}", config.silo_name, e);
                Err(e.into())
            }
        }
    }

    fn resolve_unit(
        &self,
        config: &ClusterConfig,
    ) -> std::result::Result<ProviderHandle, LoadError> {
        let location = effective_location(config)?;

        let unit = self.units.get(location).ok_or_else(|| LoadError::NotFound {
            location: location.to_string(),
        })?;

        if unit.abi_version != MEMBERSHIP_PROVIDER_ABI {
            return Err(LoadError::TypeMismatch {
                location: location.to_string(),
                reason: format!(
                    "incompatible version: unit targets v{}, host requires v{}",
                    unit.abi_version, MEMBERSHIP_PROVIDER_ABI
                ),
            });
        }

        match &unit.export {
            UnitExport::MembershipProvider(factory) => Ok(ProviderHandle::new(location.to_string(), factory())),
            UnitExport::Component { kind } => Err(LoadError::TypeMismatch {
                location: location.to_string(),
                reason: format!("unit exports a {kind}, not a membership provider"),
            }),
        }
    }
}

/// Picks the location to load from, checking it against the liveness kind.
fn effective_location(config: &ClusterConfig) -> std::result::Result<&str, LoadError> {
    let location = config.provider_location.trim();
    match config.liveness_kind.builtin_location() {
        None if location.is_empty() => Err(LoadError::InvalidConfiguration(format!(
            "liveness kind {} requires a provider location",
            LivenessKind::Custom
        ))),
        None => Ok(location),
        Some(builtin) if location.is_empty() || location == builtin => Ok(builtin),
        Some(_) => Err(LoadError::InvalidConfiguration(format!(
            "liveness kind {} does not load from {:?}; select {} to use a provider location",
            config.liveness_kind,
            location,
            LivenessKind::Custom
        ))),
    }
}

#[derive(Default)]
pub struct ProviderRegistryBuilder {
    units: HashMap<String, ProviderUnit>,
}

impl ProviderRegistryBuilder {
    /// Registers a unit. A later unit at the same location replaces the
    /// earlier one.
    pub fn register(
        mut self,
        unit: ProviderUnit,
    ) -> Self {
        self.units.insert(unit.location.clone(), unit);
        self
    }

    /// Registers the built-in in-memory unit, backed by `table`.
    pub fn with_in_memory_table(
        self,
        table: InMemoryMembershipTable,
    ) -> Self {
        self.register(ProviderUnit::membership(IN_MEMORY_PROVIDER_LOCATION, move || {
            InMemoryMembershipProvider::new(table.clone())
        }))
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry { units: self.units }
    }
}
