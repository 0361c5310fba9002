use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::warn;

use crate::errors::panic_message;
use crate::IsolationError;
use crate::MembershipProvider;
use crate::Result;
use crate::SiloState;

/// Provider the boundary must detach if its controller never does.
pub(crate) struct TrackedProvider {
    pub(crate) location: String,
    pub(crate) provider: Arc<dyn MembershipProvider>,
}

/// Resources owned on behalf of one boundary.
///
/// Cloned into the controller the boundary hosts. Everything acquired
/// through a scope (background tasks, attached providers) is reclaimed when
/// the owning boundary is torn down, whatever state the controller is in.
#[derive(Clone)]
pub struct BoundaryScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    name: String,
    shutdown: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
    ledger: Mutex<HashMap<u64, TrackedProvider>>,
    states: Mutex<Vec<SiloState>>,
    failures: mpsc::UnboundedSender<IsolationError>,
}

impl BoundaryScope {
    pub(crate) fn new(
        name: String,
        shutdown: CancellationToken,
        failures: mpsc::UnboundedSender<IsolationError>,
    ) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                name,
                shutdown,
                tasks: Mutex::new(JoinSet::new()),
                ledger: Mutex::new(HashMap::new()),
                states: Mutex::new(Vec::new()),
                failures,
            }),
        }
    }

    /// Scope not owned by any boundary. Failures it observes are only
    /// logged and nothing sweeps its ledger.
    pub fn detached(name: impl Into<String>) -> Self {
        let (failures, _) = mpsc::unbounded_channel();
        Self::new(name.into(), CancellationToken::new(), failures)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Token cancelled when the owning boundary is terminated or torn down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Runs `task` in the background for as long as the boundary lives.
    ///
    /// A panic or error in the task is reported through the boundary's
    /// failure channel instead of reaching the caller's context.
    pub fn spawn<F>(
        &self,
        task_name: &str,
        task: F,
    ) where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let failures = self.inner.failures.clone();
        let scope_name = self.inner.name.clone();
        let task_name = task_name.to_string();

        let mut tasks = self.inner.tasks.lock();
        reap_finished(&mut tasks);
        tasks.spawn(async move {
            let failure = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => IsolationError::TaskFailed {
                    task: task_name,
                    reason: e.to_string(),
                },
                Err(payload) => IsolationError::Panicked(format!("task {}: {}", task_name, panic_message(payload))),
            };
            error!("[{}] background failure: {}", scope_name, failure);
            if failures.send(failure).is_err() {
                warn!("[{}] failure channel closed", scope_name);
            }
        });
    }

    pub fn running_tasks(&self) -> usize {
        let mut tasks = self.inner.tasks.lock();
        reap_finished(&mut tasks);
        tasks.len()
    }

    /// Whether the hosted controller ever was in `state`.
    pub fn reached(
        &self,
        state: SiloState,
    ) -> bool {
        self.inner.states.lock().contains(&state)
    }

    /// Most recent state of the hosted controller, if one was created.
    pub fn last_state(&self) -> Option<SiloState> {
        self.inner.states.lock().last().copied()
    }

    pub(crate) fn record_state(
        &self,
        state: SiloState,
    ) {
        self.inner.states.lock().push(state);
    }

    pub fn tracked_providers(&self) -> usize {
        self.inner.ledger.lock().len()
    }

    pub(crate) fn track(
        &self,
        id: u64,
        location: &str,
        provider: Arc<dyn MembershipProvider>,
    ) {
        self.inner.ledger.lock().insert(
            id,
            TrackedProvider {
                location: location.to_string(),
                provider,
            },
        );
    }

    pub(crate) fn release(
        &self,
        id: u64,
    ) {
        self.inner.ledger.lock().remove(&id);
    }

    pub(crate) fn drain_ledger(&self) -> Vec<TrackedProvider> {
        self.inner.ledger.lock().drain().map(|(_, tracked)| tracked).collect()
    }

    /// Aborts every background task and waits for them to finish.
    /// Returns how many were actually cancelled.
    pub(crate) async fn abort_tasks(&self) -> usize {
        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock());
        tasks.abort_all();

        let mut cancelled = 0;
        while let Some(joined) = tasks.join_next().await {
            if matches!(joined, Err(ref e) if e.is_cancelled()) {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub(crate) fn abort_tasks_now(&self) {
        self.inner.tasks.lock().abort_all();
    }
}

/// Drops the results of tasks that already completed.
fn reap_finished(tasks: &mut JoinSet<()>) {
    while tasks.try_join_next().is_some() {}
}
