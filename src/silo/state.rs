use std::fmt;

/// Lifecycle states of a silo controller.
///
/// - `initialize`: Uninitialized -> Initializing -> Initialized | Failed
/// - `start`: Initialized -> Starting -> Running | Failed
/// - `stop`: Running -> Stopped
/// - `uninitialize`: Initialized | Failed -> Disposed
///
/// `Failed`, `Stopped` and `Disposed` are terminal. Disposing a `Failed`
/// controller is the only move out of one, and it never leads back to a
/// usable state: a retry always needs a new controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiloState {
    Uninitialized,
    Initializing,
    Initialized,
    Starting,
    Running,
    Stopped,
    Failed,
    /// Released through `uninitialize`; distinct from `Uninitialized`
    Disposed,
}

impl SiloState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SiloState::Failed | SiloState::Stopped | SiloState::Disposed)
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            SiloState::Uninitialized => "uninitialized",
            SiloState::Initializing => "initializing",
            SiloState::Initialized => "initialized",
            SiloState::Starting => "starting",
            SiloState::Running => "running",
            SiloState::Stopped => "stopped",
            SiloState::Failed => "failed",
            SiloState::Disposed => "disposed",
        }
    }
}

impl fmt::Display for SiloState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
