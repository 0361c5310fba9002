//! Silo Lifecycle Error Hierarchy
//!
//! Errors are grouped by the lifecycle stage that raises them:
//! configuration checks, provider resolution, cluster attach, state machine
//! misuse and crash containment.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

use crate::LivenessKind;
use crate::SiloState;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Settings could not be loaded or deserialized
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Malformed or inconsistent settings, detected before any external call
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Membership provider could not be resolved
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Membership provider rejected or timed out while joining the cluster
    #[error(transparent)]
    Attach(#[from] AttachError),

    /// Operation invoked on a silo in the wrong state. Always a caller bug.
    #[error(transparent)]
    InvalidState(#[from] StateTransitionError),

    /// Failure observed by an isolation boundary
    #[error(transparent)]
    Isolation(#[from] IsolationError),

    /// A failed lifecycle stage, with the context needed to diagnose it
    #[error("{0}")]
    Lifecycle(#[source] FailureCause),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Strips lifecycle context and returns the underlying error.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Lifecycle(cause) => cause.error().root_cause(),
            other => other,
        }
    }

    pub fn failure_cause(&self) -> Option<&FailureCause> {
        match self {
            Error::Lifecycle(cause) => Some(cause),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The resolved provider's own validation refused the settings
    #[error("Provider at {location:?} rejected configuration: {reason}")]
    RejectedByProvider { location: String, reason: String },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// Location does not resolve to any loadable unit
    #[error("No loadable unit found at location {location:?}")]
    NotFound { location: String },

    /// Unit exists but does not provide the membership capability set
    #[error("Unit at {location:?} is not a usable membership provider: {reason}")]
    TypeMismatch { location: String, reason: String },

    /// Liveness kind and provider location contradict each other
    #[error("Liveness kind inconsistent with provider location: {0}")]
    InvalidConfiguration(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AttachError {
    #[error("Provider rejected attach: {0}")]
    Rejected(String),

    #[error("Attach did not complete within {0:?}")]
    Timeout(Duration),

    #[error("Attach cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Cannot {operation} while silo is {state}")]
    InvalidState { operation: &'static str, state: SiloState },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum IsolationError {
    /// A contained task panicked
    #[error("Contained task panicked: {0}")]
    Panicked(String),

    /// A background task spawned inside the boundary returned an error
    #[error("Background task {task} failed: {reason}")]
    TaskFailed { task: String, reason: String },

    #[error("Boundary was terminated before the attempt completed")]
    Terminated,

    #[error("Attempt exceeded its total timeout of {0:?}")]
    TimedOut(Duration),

    /// Each boundary hosts a single run
    #[error("Boundary {0} already hosted a run")]
    AlreadyUsed(String),
}

impl From<JoinError> for IsolationError {
    fn from(err: JoinError) -> Self {
        if err.is_panic() {
            IsolationError::Panicked(panic_message(err.into_panic()))
        } else {
            IsolationError::Terminated
        }
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        IsolationError::from(err).into()
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Lifecycle stage in which a silo failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Initialize,
    Start,
}

impl fmt::Display for FailureStage {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            FailureStage::Initialize => write!(f, "initialize"),
            FailureStage::Start => write!(f, "start"),
        }
    }
}

/// Error recorded by a failed silo together with the settings it ran with.
#[derive(Debug, Clone)]
pub struct FailureCause {
    pub silo_name: String,
    pub cluster_id: String,
    pub liveness_kind: LivenessKind,
    pub provider_location: String,
    pub stage: FailureStage,
    error: Arc<Error>,
}

impl FailureCause {
    pub(crate) fn new(
        silo_name: String,
        cluster_id: String,
        liveness_kind: LivenessKind,
        provider_location: String,
        stage: FailureStage,
        error: Error,
    ) -> Self {
        Self {
            silo_name,
            cluster_id,
            liveness_kind,
            provider_location,
            stage,
            error: Arc::new(error),
        }
    }

    pub fn error(&self) -> &Error {
        &self.error
    }
}

impl fmt::Display for FailureCause {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "Silo {} failed to {} (cluster: {}, liveness: {}, provider location: {:?}): {}",
            self.silo_name, self.stage, self.cluster_id, self.liveness_kind, self.provider_location, self.error
        )
    }
}

impl std::error::Error for FailureCause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}
