//! Providers and config helpers shared by the unit tests.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::AttachError;
use crate::ClusterConfig;
use crate::LifecycleConfig;
use crate::LivenessKind;
use crate::MembershipProvider;
use crate::ProviderRegistry;
use crate::ProviderUnit;
use crate::Result;

pub(crate) const SCRIPTED_LOCATION: &str = "tests.membership.scripted";

pub(crate) fn custom_config(location: &str) -> ClusterConfig {
    let mut config = ClusterConfig::localhost_primary();
    config.liveness_kind = LivenessKind::Custom;
    config.provider_location = location.to_string();
    config
}

pub(crate) fn short_lifecycle() -> LifecycleConfig {
    LifecycleConfig {
        attach_timeout_ms: 1_000,
        detach_timeout_ms: 500,
    }
}

/// Counts the calls made to every [`ScriptedProvider`] built from it.
#[derive(Debug, Default)]
pub(crate) struct ProviderCalls {
    pub(crate) validates: AtomicUsize,
    pub(crate) attaches: AtomicUsize,
    pub(crate) detaches: AtomicUsize,
}

impl ProviderCalls {
    pub(crate) fn attaches(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub(crate) fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum AttachScript {
    #[default]
    Succeed,
    Reject,
    Panic,
}

/// Provider whose behavior is fixed up front.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedProvider {
    pub(crate) calls: Arc<ProviderCalls>,
    pub(crate) attach: AttachScript,
    pub(crate) attach_delay: Duration,
    pub(crate) fail_detach: bool,
}

impl ScriptedProvider {
    pub(crate) fn new(calls: Arc<ProviderCalls>) -> Self {
        Self {
            calls,
            ..Default::default()
        }
    }

    pub(crate) fn attach(
        mut self,
        script: AttachScript,
    ) -> Self {
        self.attach = script;
        self
    }

    pub(crate) fn attach_delay(
        mut self,
        delay: Duration,
    ) -> Self {
        self.attach_delay = delay;
        self
    }

    pub(crate) fn fail_detach(mut self) -> Self {
        self.fail_detach = true;
        self
    }

    /// Registry holding the built-in units plus this provider at
    /// [`SCRIPTED_LOCATION`].
    pub(crate) fn registry(self) -> Arc<ProviderRegistry> {
        Arc::new(
            ProviderRegistry::builder()
                .with_in_memory_table(Default::default())
                .register(ProviderUnit::membership(SCRIPTED_LOCATION, move || self.clone()))
                .build(),
        )
    }
}

#[async_trait]
impl MembershipProvider for ScriptedProvider {
    fn validate(
        &self,
        _config: &ClusterConfig,
    ) -> Result<()> {
        self.calls.validates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn attach(
        &self,
        _config: &ClusterConfig,
    ) -> Result<()> {
        self.calls.attaches.fetch_add(1, Ordering::SeqCst);
        if !self.attach_delay.is_zero() {
            tokio::time::sleep(self.attach_delay).await;
        }
        match self.attach {
            AttachScript::Succeed => Ok(()),
            AttachScript::Reject => Err(AttachError::Rejected("membership store refused the silo".into()).into()),
            AttachScript::Panic => panic!("scripted attach panic"),
        }
    }

    async fn detach(&self) -> Result<()> {
        self.calls.detaches.fetch_add(1, Ordering::SeqCst);
        if self.fail_detach {
            return Err(AttachError::Rejected("membership store unreachable".into()).into());
        }
        Ok(())
    }
}
