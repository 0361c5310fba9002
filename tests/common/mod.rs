use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use silo_host::AttachError;
use silo_host::AttemptPolicy;
use silo_host::ClusterConfig;
use silo_host::InMemoryMembershipTable;
use silo_host::LifecycleConfig;
use silo_host::LivenessKind;
use silo_host::MembershipProvider;
use silo_host::ProviderRegistry;
use silo_host::ProviderUnit;
use silo_host::Result;
use silo_host::RetryDriver;

pub const RECORDING_LOCATION: &str = "integration.membership.recording";
pub const PANICKING_LOCATION: &str = "integration.membership.panicking";
pub const REMINDERS_LOCATION: &str = "integration.reminders";

/// Attach/detach bookkeeping shared by every provider a unit builds.
#[derive(Debug, Default)]
pub struct AttachLedger {
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub attaches: AtomicUsize,
    pub detaches: AtomicUsize,
}

impl AttachLedger {
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }
}

/// Takes `delay` to attach and records how many attaches overlap.
pub struct RecordingProvider {
    ledger: Arc<AttachLedger>,
    delay: Duration,
}

#[async_trait]
impl MembershipProvider for RecordingProvider {
    fn validate(
        &self,
        _config: &ClusterConfig,
    ) -> Result<()> {
        Ok(())
    }

    async fn attach(
        &self,
        _config: &ClusterConfig,
    ) -> Result<()> {
        self.ledger.attaches.fetch_add(1, Ordering::SeqCst);
        let now = self.ledger.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.ledger.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.ledger.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        self.ledger.detaches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Crashes the task it attaches on.
pub struct PanickingProvider;

#[async_trait]
impl MembershipProvider for PanickingProvider {
    fn validate(
        &self,
        _config: &ClusterConfig,
    ) -> Result<()> {
        Ok(())
    }

    async fn attach(
        &self,
        _config: &ClusterConfig,
    ) -> Result<()> {
        panic!("membership store client crashed");
    }

    async fn detach(&self) -> Result<()> {
        Err(AttachError::Rejected("never attached".to_string()).into())
    }
}

pub struct TestContext {
    pub table: InMemoryMembershipTable,
    pub ledger: Arc<AttachLedger>,
    pub driver: RetryDriver,
}

/// Driver over a registry with the built-in table, a recording unit, a
/// panicking unit and a unit exporting some other component kind.
pub fn test_context(attach_delay: Duration) -> TestContext {
    let table = InMemoryMembershipTable::default();
    let ledger = Arc::new(AttachLedger::default());

    let recording_ledger = ledger.clone();
    let registry = ProviderRegistry::builder()
        .with_in_memory_table(table.clone())
        .register(ProviderUnit::membership(RECORDING_LOCATION, move || RecordingProvider {
            ledger: recording_ledger.clone(),
            delay: attach_delay,
        }))
        .register(ProviderUnit::membership(PANICKING_LOCATION, || PanickingProvider))
        .register(ProviderUnit::component(REMINDERS_LOCATION, "reminder table"))
        .build();

    let lifecycle = LifecycleConfig {
        attach_timeout_ms: 5_000,
        detach_timeout_ms: 1_000,
    };
    let policy = AttemptPolicy {
        attempt_timeout_ms: 10_000,
        termination_grace_ms: 500,
    };

    TestContext {
        table,
        ledger,
        driver: RetryDriver::new(Arc::new(registry), lifecycle, policy),
    }
}

pub fn custom(
    mut config: ClusterConfig,
    location: &str,
) -> ClusterConfig {
    config.liveness_kind = LivenessKind::Custom;
    config.provider_location = location.to_string();
    config
}
