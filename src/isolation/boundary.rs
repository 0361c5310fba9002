use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::BoundaryScope;
use crate::metrics::FORCED_RELEASES;
use crate::ClusterConfig;
use crate::Error;
use crate::IsolationError;
use crate::LifecycleConfig;
use crate::ProviderRegistry;
use crate::Result;
use crate::SiloController;

/// Lets the owner of a boundary stop the attempt it hosts.
///
/// Only handed out inside the crate: the retry driver is the one component
/// allowed to force an attempt to end.
#[derive(Clone)]
pub(crate) struct TerminationHandle {
    token: CancellationToken,
}

impl TerminationHandle {
    pub(crate) fn terminate(&self) {
        self.token.cancel();
    }
}

/// What teardown had to clean up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Background tasks still running at teardown
    pub aborted_tasks: usize,
    /// Providers the controller left attached and the boundary detached
    pub forced_detaches: usize,
    /// Forced detaches that returned an error or timed out
    pub failed_detaches: usize,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.aborted_tasks == 0 && self.forced_detaches == 0
    }
}

/// Crash-containment context for a single silo attempt.
///
/// The attempt body runs on its own task. Panics, errors from background
/// tasks spawned through the [`BoundaryScope`], and termination requests all
/// come back from [`IsolationBoundary::run`] as error values. Resources the
/// attempt acquired are reclaimed by [`IsolationBoundary::tear_down`], which
/// consumes the boundary.
pub struct IsolationBoundary {
    name: String,
    registry: Arc<ProviderRegistry>,
    lifecycle: LifecycleConfig,
    termination_grace: Duration,
    terminate: CancellationToken,
    scope: BoundaryScope,
    failures: mpsc::UnboundedReceiver<IsolationError>,
    used: bool,
    torn_down: bool,
}

impl IsolationBoundary {
    pub fn new(
        name: impl Into<String>,
        registry: Arc<ProviderRegistry>,
        lifecycle: LifecycleConfig,
        termination_grace: Duration,
    ) -> Self {
        let name = name.into();
        let terminate = CancellationToken::new();
        let (failures_tx, failures) = mpsc::unbounded_channel();
        let scope = BoundaryScope::new(name.clone(), terminate.clone(), failures_tx);
        debug!("[{}] boundary created", name);

        Self {
            name,
            registry,
            lifecycle,
            termination_grace,
            terminate,
            scope,
            failures,
            used: false,
            torn_down: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &BoundaryScope {
        &self.scope
    }

    pub(crate) fn termination_handle(&self) -> TerminationHandle {
        TerminationHandle {
            token: self.terminate.clone(),
        }
    }

    /// Builds a fresh controller bound to `config` and runs `body` with it.
    ///
    /// `body` never shares the caller's task: whatever it does, the caller
    /// gets a value or an error back. Once termination is requested the
    /// controller's cancellation token fires and the body gets the
    /// termination grace period to wind down before it is aborted.
    pub async fn run<F, Fut, T>(
        &mut self,
        config: ClusterConfig,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(SiloController) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.used {
            return Err(IsolationError::AlreadyUsed(self.name.clone()).into());
        }
        self.used = true;

        let controller = SiloController::new(config, self.lifecycle, self.registry.clone(), self.scope.clone());
        // `body` itself is called on the spawned task, so a panic while it
        // builds its future is contained as well
        let mut handle: JoinHandle<Result<T>> = tokio::spawn(async move { body(controller).await });

        let result = tokio::select! {
            biased;
            Some(failure) = self.failures.recv() => {
                error!("[{}] contained failure: {}", self.name, failure);
                abort_and_wait(handle).await;
                Err(failure.into())
            }
            joined = &mut handle => settle(joined),
            _ = self.terminate.cancelled() => {
                warn!("[{}] termination requested, waiting up to {:?}", self.name, self.termination_grace);
                match tokio::time::timeout(self.termination_grace, &mut handle).await {
                    Ok(joined) => settle(joined),
                    Err(_) => {
                        abort_and_wait(handle).await;
                        Err(IsolationError::Terminated.into())
                    }
                }
            }
        };

        // A background task may have failed while the body was finishing
        match (result, self.failures.try_recv()) {
            (Ok(_), Ok(failure)) => {
                error!("[{}] contained failure: {}", self.name, failure);
                Err(failure.into())
            }
            (result, _) => result,
        }
    }

    /// Releases everything the hosted attempt acquired.
    ///
    /// Runs on every path, success included: remaining background tasks are
    /// aborted and providers still attached are detached.
    pub async fn tear_down(mut self) -> TeardownReport {
        self.terminate.cancel();

        let aborted_tasks = self.scope.abort_tasks().await;
        let leftovers = self.scope.drain_ledger();
        let mut report = TeardownReport {
            aborted_tasks,
            forced_detaches: leftovers.len(),
            failed_detaches: 0,
        };

        for tracked in leftovers {
            FORCED_RELEASES.inc();
            warn!("[{}] force detaching provider at {:?}", self.name, tracked.location);
            match tokio::time::timeout(self.lifecycle.detach_timeout(), tracked.provider.detach()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("[{}] forced detach of {:?} failed: {}", self.name, tracked.location, e);
                    report.failed_detaches += 1;
                }
                Err(_) => {
                    error!("[{}] forced detach of {:?} timed out", self.name, tracked.location);
                    report.failed_detaches += 1;
                }
            }
        }

        self.torn_down = true;
        info!("[{}] boundary torn down: {:?}", self.name, report);
        report
    }
}

impl Drop for IsolationBoundary {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        self.terminate.cancel();
        self.scope.abort_tasks_now();
        let leaked = self.scope.tracked_providers();
        if leaked > 0 {
            error!(
                "[{}] dropped without teardown; {} provider(s) were never detached",
                self.name, leaked
            );
        }
    }
}

async fn abort_and_wait<T>(handle: JoinHandle<T>) {
    handle.abort();
    let _ = handle.await;
}

fn settle<T>(joined: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(Error::from(e)),
    }
}
