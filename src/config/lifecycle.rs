use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::ConfigurationError;
use crate::Result;

/// Timing bounds applied by the lifecycle controller
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Deadline for the provider to acknowledge `attach` (unit: milliseconds)
    #[serde(default = "default_attach_timeout_ms")]
    pub attach_timeout_ms: u64,

    /// Upper bound for a single `detach` call (unit: milliseconds)
    #[serde(default = "default_detach_timeout_ms")]
    pub detach_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            attach_timeout_ms: default_attach_timeout_ms(),
            detach_timeout_ms: default_detach_timeout_ms(),
        }
    }
}

impl LifecycleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.attach_timeout_ms == 0 {
            return Err(ConfigurationError::Invalid("attach_timeout_ms must be greater than 0".into()).into());
        }
        if self.detach_timeout_ms == 0 {
            return Err(ConfigurationError::Invalid("detach_timeout_ms must be greater than 0".into()).into());
        }
        Ok(())
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    pub fn detach_timeout(&self) -> Duration {
        Duration::from_millis(self.detach_timeout_ms)
    }
}

fn default_attach_timeout_ms() -> u64 {
    30_000
}
fn default_detach_timeout_ms() -> u64 {
    5_000
}
