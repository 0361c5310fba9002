//! Built-in membership table kept in process memory.
//!
//! Suitable for single-process development clusters. The table outlives the
//! silos that register in it, the same way an external membership store
//! would, which makes leaked registrations observable.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;
use tracing::info;

use super::MembershipProvider;
use crate::AttachError;
use crate::ClusterConfig;
use crate::ConfigurationError;
use crate::Result;

/// Provider setting holding a simulated acknowledgement delay in milliseconds.
pub const ATTACH_DELAY_SETTING: &str = "attach_delay_ms";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MembershipKey {
    pub cluster_id: String,
    pub silo_name: String,
}

#[derive(Debug, Clone)]
pub struct MembershipEntry {
    pub joined_at: Instant,
}

/// Shared membership rows keyed by cluster and silo.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMembershipTable {
    rows: Arc<DashMap<MembershipKey, MembershipEntry>>,
}

impl InMemoryMembershipTable {
    /// Inserts a row; fails if the silo is already registered.
    pub fn insert_row(
        &self,
        key: MembershipKey,
    ) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.rows.entry(key) {
            Entry::Occupied(e) => Err(AttachError::Rejected(format!(
                "silo {} is already registered in cluster {}",
                e.key().silo_name,
                e.key().cluster_id
            ))
            .into()),
            Entry::Vacant(e) => {
                e.insert(MembershipEntry {
                    joined_at: Instant::now(),
                });
                Ok(())
            }
        }
    }

    pub fn remove_row(
        &self,
        key: &MembershipKey,
    ) -> bool {
        self.rows.remove(key).is_some()
    }

    pub fn contains(
        &self,
        key: &MembershipKey,
    ) -> bool {
        self.rows.contains_key(key)
    }

    /// Silo names registered for `cluster_id`, sorted.
    pub fn members(
        &self,
        cluster_id: &str,
    ) -> Vec<String> {
        let mut members: Vec<String> = self
            .rows
            .iter()
            .filter(|row| row.key().cluster_id == cluster_id)
            .map(|row| row.key().silo_name.clone())
            .collect();
        members.sort();
        members
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Provider over an [`InMemoryMembershipTable`].
pub struct InMemoryMembershipProvider {
    table: InMemoryMembershipTable,
    registered: Mutex<Option<MembershipKey>>,
}

impl InMemoryMembershipProvider {
    pub fn new(table: InMemoryMembershipTable) -> Self {
        Self {
            table,
            registered: Mutex::new(None),
        }
    }

    fn attach_delay(config: &ClusterConfig) -> Result<Option<Duration>> {
        match config.provider_settings.get(ATTACH_DELAY_SETTING) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<u64>().map(|ms| Some(Duration::from_millis(ms))).map_err(|e| {
                ConfigurationError::Invalid(format!("{ATTACH_DELAY_SETTING} must be an integer, got {raw:?}: {e}")).into()
            }),
        }
    }
}

#[async_trait]
impl MembershipProvider for InMemoryMembershipProvider {
    fn validate(
        &self,
        config: &ClusterConfig,
    ) -> Result<()> {
        Self::attach_delay(config).map(|_| ())
    }

    async fn attach(
        &self,
        config: &ClusterConfig,
    ) -> Result<()> {
        if let Some(delay) = Self::attach_delay(config)? {
            debug!("in-memory membership: delaying attach by {:?}", delay);
            tokio::time::sleep(delay).await;
        }

        let key = MembershipKey {
            cluster_id: config.cluster_id.clone(),
            silo_name: config.silo_name.clone(),
        };
        self.table.insert_row(key.clone())?;
        info!("silo {} joined cluster {}", key.silo_name, key.cluster_id);
        *self.registered.lock() = Some(key);
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        if let Some(key) = self.registered.lock().take() {
            self.table.remove_row(&key);
            info!("silo {} left cluster {}", key.silo_name, key.cluster_id);
        }
        Ok(())
    }
}
