use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::metrics::ATTEMPTS_TOTAL;
use crate::AttemptPolicy;
use crate::ClusterConfig;
use crate::Error;
use crate::IsolationBoundary;
use crate::IsolationError;
use crate::LifecycleConfig;
use crate::ProviderRegistry;
use crate::Result;
use crate::SiloController;
use crate::SiloState;
use crate::TeardownReport;

/// Whether an attempt got its silo running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Running,
    Failed,
}

impl AttemptOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Running => "running",
            AttemptOutcome::Failed => "failed",
        }
    }
}

/// Everything one attempt produced.
#[derive(Debug)]
pub struct AttemptResult<T> {
    pub attempt_id: u64,
    pub cluster_id: String,
    /// The body's own value or error
    pub result: Result<T>,
    /// Whether the silo got to `Running` at any point during the attempt
    pub reached_running: bool,
    /// Last state the silo was seen in, `None` if no controller was built
    pub final_state: Option<SiloState>,
    /// What the boundary had to reclaim after the attempt
    pub teardown: TeardownReport,
}

impl<T> AttemptResult<T> {
    /// `Running` iff the silo reached `Running`, independent of what the
    /// body returned afterwards.
    pub fn outcome(&self) -> AttemptOutcome {
        if self.reached_running {
            AttemptOutcome::Running
        } else {
            AttemptOutcome::Failed
        }
    }

    pub fn is_running(&self) -> bool {
        self.outcome() == AttemptOutcome::Running
    }

    /// The captured error, lifecycle context included.
    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }
}

/// Runs lifecycle attempts, each in its own boundary.
///
/// Attempts for the same cluster identity are strictly sequential: a second
/// caller waits until the first attempt has been torn down. Attempts for
/// different clusters proceed independently.
pub struct RetryDriver {
    registry: Arc<ProviderRegistry>,
    lifecycle: LifecycleConfig,
    policy: AttemptPolicy,
    gates: DashMap<String, Arc<Mutex<()>>>,
    next_attempt: AtomicU64,
}

impl RetryDriver {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        lifecycle: LifecycleConfig,
        policy: AttemptPolicy,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            policy,
            gates: DashMap::new(),
            next_attempt: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Runs one lifecycle against `config`: initialize, then start.
    ///
    /// A silo that reaches `Running` is stopped again before the boundary is
    /// torn down, so a successful attempt leaves no registration behind. A
    /// failed silo is uninitialized. The attempt as a whole is bounded by the
    /// policy's `attempt_timeout_ms`.
    pub async fn attempt(
        &self,
        config: &ClusterConfig,
    ) -> AttemptResult<SiloState> {
        self.attempt_with(config, Some(self.policy.attempt_timeout()), run_to_running)
            .await
    }

    /// Runs `body` against a new controller bound to a snapshot of `config`.
    ///
    /// `deadline` bounds the whole attempt. When it passes, the boundary is
    /// terminated and the attempt fails with `IsolationError::TimedOut`.
    /// The boundary is torn down before this returns, on every path.
    pub async fn attempt_with<F, Fut, T>(
        &self,
        config: &ClusterConfig,
        deadline: Option<Duration>,
        body: F,
    ) -> AttemptResult<T>
    where
        F: FnOnce(SiloController) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let gate = self.gate(&config.cluster_id);
        let serialized = gate.lock().await;

        let attempt_id = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        info!(
            "attempt {} for silo {} in cluster {} (liveness: {}, location: {:?})",
            attempt_id, config.silo_name, config.cluster_id, config.liveness_kind, config.provider_location
        );

        let mut boundary = IsolationBoundary::new(
            format!("{}#{}", config.cluster_id, attempt_id),
            self.registry.clone(),
            self.lifecycle,
            self.policy.termination_grace(),
        );
        let termination = boundary.termination_handle();

        let result = {
            let run = boundary.run(config.clone(), body);
            tokio::pin!(run);
            match deadline {
                None => run.await,
                Some(limit) => match tokio::time::timeout(limit, &mut run).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("attempt {} exceeded {:?}, terminating", attempt_id, limit);
                        termination.terminate();
                        if let Err(e) = run.await {
                            debug!("attempt {} ended after termination: {}", attempt_id, e);
                        }
                        Err(IsolationError::TimedOut(limit).into())
                    }
                },
            }
        };

        let reached_running = boundary.scope().reached(SiloState::Running);
        let final_state = boundary.scope().last_state();
        let teardown = boundary.tear_down().await;
        let attempt = AttemptResult {
            attempt_id,
            cluster_id: config.cluster_id.clone(),
            result,
            reached_running,
            final_state,
            teardown,
        };

        drop(serialized);
        drop(gate);
        // Only the map still holds the gate once no attempt waits on it
        self.gates
            .remove_if(&config.cluster_id, |_, gate| Arc::strong_count(gate) == 1);

        ATTEMPTS_TOTAL.with_label_values(&[attempt.outcome().as_str()]).inc();
        match attempt.error() {
            None => info!("attempt {} succeeded", attempt_id),
            Some(e) => warn!("attempt {} failed: {}", attempt_id, e),
        }
        attempt
    }

    fn gate(
        &self,
        cluster_id: &str,
    ) -> Arc<Mutex<()>> {
        // Clone out so the map shard is not locked while the gate is awaited
        self.gates.entry(cluster_id.to_string()).or_default().clone()
    }

    #[cfg(test)]
    pub(crate) fn gate_count(&self) -> usize {
        self.gates.len()
    }
}

async fn run_to_running(mut silo: SiloController) -> Result<SiloState> {
    if let Err(e) = silo.initialize() {
        silo.uninitialize()?;
        return Err(e);
    }

    if let Err(e) = silo.start(false).await {
        silo.uninitialize()?;
        return Err(e);
    }

    let reached = silo.state();
    silo.stop().await?;
    Ok(reached)
}
