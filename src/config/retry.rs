use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::ConfigurationError;
use crate::Result;

/// Bounds for one attempt driven by the retry driver.
///
/// Attempts are never retried automatically; this only limits how long a
/// single attempt and its teardown may take.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AttemptPolicy {
    /// Total time an attempt may take before its boundary is terminated
    /// (unit: milliseconds)
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Grace period a terminated attempt gets to wind down before it is
    /// aborted (unit: milliseconds)
    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: default_attempt_timeout_ms(),
            termination_grace_ms: default_termination_grace_ms(),
        }
    }
}

impl AttemptPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.attempt_timeout_ms == 0 {
            return Err(ConfigurationError::Invalid("attempt_timeout_ms must be greater than 0".into()).into());
        }
        if self.termination_grace_ms == 0 {
            return Err(ConfigurationError::Invalid("termination_grace_ms must be greater than 0".into()).into());
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }
}

fn default_attempt_timeout_ms() -> u64 {
    60_000
}
fn default_termination_grace_ms() -> u64 {
    5_000
}
