use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::ConfigurationError;
use crate::Result;
use crate::IN_MEMORY_PROVIDER_LOCATION;

/// Strategy used to track cluster membership.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum LivenessKind {
    /// Built-in in-process membership table, meant for development clusters
    #[default]
    InMemory,
    /// Provider loaded from `provider_location`
    Custom,
}

impl LivenessKind {
    /// Location of the unit shipped for a built-in kind.
    pub fn builtin_location(&self) -> Option<&'static str> {
        match self {
            LivenessKind::InMemory => Some(IN_MEMORY_PROVIDER_LOCATION),
            LivenessKind::Custom => None,
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin_location().is_some()
    }
}

impl fmt::Display for LivenessKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            LivenessKind::InMemory => write!(f, "in_memory"),
            LivenessKind::Custom => write!(f, "custom"),
        }
    }
}

/// Identity and membership strategy of the cluster a silo joins.
///
/// Building a `ClusterConfig` never validates it: settings may be assembled
/// or corrected piecemeal between attempts. A lifecycle controller takes its
/// own snapshot, so edits made while an attempt runs are never observed by it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    #[serde(default = "default_silo_name")]
    pub silo_name: String,

    #[serde(default)]
    pub liveness_kind: LivenessKind,

    /// Registry location of the provider unit; empty means the built-in default
    #[serde(default)]
    pub provider_location: String,

    /// Opaque settings handed to the provider
    #[serde(default)]
    pub provider_settings: HashMap<String, String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_id: default_cluster_id(),
            silo_name: default_silo_name(),
            liveness_kind: LivenessKind::default(),
            provider_location: String::new(),
            provider_settings: HashMap::new(),
        }
    }
}

impl ClusterConfig {
    /// Single-silo development cluster with a freshly generated identity.
    pub fn localhost_primary() -> Self {
        Self {
            cluster_id: nanoid::nanoid!(),
            silo_name: "primary".to_string(),
            ..Self::default()
        }
    }

    /// Checks the settings the controller owns. Provider selection is
    /// checked by the loader.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_id.trim().is_empty() {
            return Err(ConfigurationError::Invalid("cluster_id cannot be empty".into()).into());
        }

        if self.silo_name.trim().is_empty() {
            return Err(ConfigurationError::Invalid("silo_name cannot be empty".into()).into());
        }

        if let Some(key) = self.provider_settings.keys().find(|k| k.trim().is_empty()) {
            return Err(ConfigurationError::Invalid(format!(
                "provider_settings contains an empty key (value: {:?})",
                self.provider_settings.get(key)
            ))
            .into());
        }

        Ok(())
    }
}

fn default_cluster_id() -> String {
    "dev".to_string()
}
fn default_silo_name() -> String {
    "silo-1".to_string()
}
