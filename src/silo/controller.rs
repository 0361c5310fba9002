//! The lifecycle controller of a single silo.
//!
//! ## Key Responsibilities
//! - Validates the cluster configuration and resolves the membership
//!   provider during `initialize`, without contacting the cluster
//! - Attaches the provider during `start`, bounded by a deadline and a
//!   cancellation token
//! - Guarantees that every unsuccessful stage ends in `Failed` with the
//!   provider detached and the cause recorded
//!
//! A controller is single-use. Once it fails or stops, a retry needs a new
//! instance, so nothing from a poisoned attempt can leak into the next one.
//! All operations take `&mut self`, which rules out concurrent entry into one
//! controller; the cancellation token is the only handle other tasks get.
//!
//! ## Example Usage
//! ```ignore
//! let mut silo = SiloController::new(config, lifecycle, registry, scope);
//! silo.initialize()?;
//! silo.start(false).await?;
//! // ...
//! silo.stop().await?;
//! ```

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::SiloState;
use crate::metrics::LIFECYCLE_TRANSITIONS;
use crate::metrics::START_LATENCY;
use crate::AttachError;
use crate::BoundaryScope;
use crate::ClusterConfig;
use crate::ConfigurationError;
use crate::Error;
use crate::FailureCause;
use crate::FailureStage;
use crate::LifecycleConfig;
use crate::ProviderHandle;
use crate::ProviderRegistry;
use crate::Result;
use crate::StateTransitionError;

/// Dropping a controller that still holds an attached provider does not
/// detach it; the boundary ledger the provider was tracked on does.
pub struct SiloController {
    config: Arc<ClusterConfig>,
    lifecycle: LifecycleConfig,
    registry: Arc<ProviderRegistry>,
    scope: BoundaryScope,
    state: SiloState,
    provider: Option<ProviderHandle>,
    failure: Option<FailureCause>,
    cancel: CancellationToken,
}

impl SiloController {
    /// Binds a new controller to a snapshot of `config`.
    ///
    /// The controller's cancellation token is a child of the scope's
    /// shutdown token, so terminating the boundary cancels a pending start.
    pub fn new(
        config: ClusterConfig,
        lifecycle: LifecycleConfig,
        registry: Arc<ProviderRegistry>,
        scope: BoundaryScope,
    ) -> Self {
        let cancel = scope.shutdown_token().child_token();
        scope.record_state(SiloState::Uninitialized);
        Self {
            config: Arc::new(config),
            lifecycle,
            registry,
            scope,
            state: SiloState::Uninitialized,
            provider: None,
            failure: None,
            cancel,
        }
    }

    pub fn state(&self) -> SiloState {
        self.state
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Cause of the failure, once the controller reached `Failed`.
    pub fn failure(&self) -> Option<&FailureCause> {
        self.failure.as_ref()
    }

    /// Token that aborts a pending `start` when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn scope(&self) -> &BoundaryScope {
        &self.scope
    }

    /// Location of the resolved provider while the controller holds one.
    pub fn provider_location(&self) -> Option<&str> {
        self.provider.as_ref().map(|p| p.location())
    }

    /// Validates the configuration and resolves the membership provider.
    ///
    /// Local-only: no provider call other than `validate` is made and the
    /// cluster is never contacted.
    ///
    /// # Errors
    /// - `InvalidState` unless the controller is `Uninitialized`
    /// - a `Lifecycle` error wrapping the `ConfigurationError` or `LoadError`
    ///   that moved the controller to `Failed`
    pub fn initialize(&mut self) -> Result<()> {
        self.ensure_state("initialize", SiloState::Uninitialized)?;
        self.transition(SiloState::Initializing);

        match self.resolve_provider() {
            Ok(handle) => {
                debug!(
                    "[{}] provider at {:?} resolved and validated",
                    self.config.silo_name,
                    handle.location()
                );
                self.provider = Some(handle);
                self.transition(SiloState::Initialized);
                Ok(())
            }
            Err(e) => Err(self.fail(FailureStage::Initialize, e)),
        }
    }

    /// Attaches the silo to cluster membership.
    ///
    /// With `catch_errors == false` a failed start is returned as an error.
    /// With `catch_errors == true` it is logged and `Ok(false)` is returned.
    /// Either way the controller ends in `Failed`, the provider has been
    /// detached and [`SiloController::failure`] holds the cause.
    /// `InvalidState` is always returned as an error.
    ///
    /// Bounded by `attach_timeout_ms` and by the cancellation token.
    pub async fn start(
        &mut self,
        catch_errors: bool,
    ) -> Result<bool> {
        self.ensure_state("start", SiloState::Initialized)?;
        self.transition(SiloState::Starting);

        let started_at = Instant::now();
        let attached = self.attach_provider().await;
        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;

        match attached {
            Ok(()) => {
                START_LATENCY.with_label_values(&["running"]).observe(elapsed_ms);
                self.transition(SiloState::Running);
                info!(
                    "[{}] running in cluster {}",
                    self.config.silo_name, self.config.cluster_id
                );
                Ok(true)
            }
            Err(e) => {
                START_LATENCY.with_label_values(&["failed"]).observe(elapsed_ms);
                if let Err(detach_err) = self.release_provider().await {
                    warn!(
                        "[{}] detach after failed start also failed: {}",
                        self.config.silo_name, detach_err
                    );
                }
                let err = self.fail(FailureStage::Start, e);
                if catch_errors {
                    warn!("[{}] start failed, error absorbed: {}", self.config.silo_name, err);
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Leaves the cluster. `Running -> Stopped`.
    ///
    /// The controller is `Stopped` even if the provider's detach fails; that
    /// error is returned after the transition.
    pub async fn stop(&mut self) -> Result<()> {
        self.ensure_state("stop", SiloState::Running)?;
        let released = self.release_provider().await;
        self.transition(SiloState::Stopped);
        released
    }

    /// Releases what a silo that never ran still holds.
    ///
    /// Permitted from `Initialized` (drops the resolved, never attached
    /// provider) and from `Failed`. The controller ends `Disposed` and can
    /// never be initialized again.
    pub fn uninitialize(&mut self) -> Result<()> {
        if !matches!(self.state, SiloState::Initialized | SiloState::Failed) {
            return Err(StateTransitionError::InvalidState {
                operation: "uninitialize",
                state: self.state,
            }
            .into());
        }

        if let Some(handle) = self.provider.take() {
            debug!(
                "[{}] dropping unattached provider at {:?}",
                self.config.silo_name,
                handle.location()
            );
        }
        self.transition(SiloState::Disposed);
        Ok(())
    }

    fn resolve_provider(&self) -> Result<ProviderHandle> {
        self.config.validate()?;

        let handle = self.registry.resolve(&self.config)?;
        handle.provider().validate(&self.config).map_err(|e| match e {
            Error::Configuration(inner) => Error::Configuration(inner),
            other => ConfigurationError::RejectedByProvider {
                location: handle.location().to_string(),
                reason: other.to_string(),
            }
            .into(),
        })?;

        Ok(handle)
    }

    async fn attach_provider(&self) -> Result<()> {
        let handle = self
            .provider
            .as_ref()
            .ok_or_else(|| Error::Fatal("initialized silo holds no provider".to_string()))?;

        // Tracked before attach so a half-finished attach is still released
        // if this controller is dropped mid-way.
        self.scope.track(handle.id(), handle.location(), handle.teardown_ref());

        let deadline = self.lifecycle.attach_timeout();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!("[{}] start cancelled while attaching", self.config.silo_name);
                Err(AttachError::Cancelled.into())
            }
            attached = tokio::time::timeout(deadline, handle.provider().attach(&self.config)) => match attached {
                Ok(Ok(())) => Ok(()),
                Ok(Err(Error::Attach(e))) => Err(e.into()),
                Ok(Err(e)) => Err(AttachError::Rejected(e.to_string()).into()),
                Err(_) => Err(AttachError::Timeout(deadline).into()),
            }
        }
    }

    /// Detaches and drops the provider. The boundary keeps tracking it if
    /// the detach did not succeed, so teardown can try again.
    async fn release_provider(&mut self) -> Result<()> {
        let Some(handle) = self.provider.take() else {
            return Ok(());
        };

        let result = match tokio::time::timeout(self.lifecycle.detach_timeout(), handle.provider().detach()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AttachError::Timeout(self.lifecycle.detach_timeout()).into()),
        };

        if result.is_ok() {
            self.scope.release(handle.id());
            debug!("[{}] provider at {:?} detached", self.config.silo_name, handle.location());
        }
        result
    }

    fn ensure_state(
        &self,
        operation: &'static str,
        expected: SiloState,
    ) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(StateTransitionError::InvalidState {
                operation,
                state: self.state,
            }
            .into())
        }
    }

    fn transition(
        &mut self,
        next: SiloState,
    ) {
        debug!("[{}] {} -> {}", self.config.silo_name, self.state, next);
        LIFECYCLE_TRANSITIONS.with_label_values(&[next.as_str()]).inc();
        self.scope.record_state(next);
        self.state = next;
    }

    /// Records `error` as the failure cause and moves to `Failed`.
    fn fail(
        &mut self,
        stage: FailureStage,
        error: Error,
    ) -> Error {
        let cause = FailureCause::new(
            self.config.silo_name.clone(),
            self.config.cluster_id.clone(),
            self.config.liveness_kind,
            self.config.provider_location.clone(),
            stage,
            error,
        );
        error!("{}", cause);
        self.failure = Some(cause.clone());
        self.transition(SiloState::Failed);
        Error::Lifecycle(cause)
    }
}
