use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::ConfigurationError;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MonitoringConfig {
    #[serde(default = "default_prometheus_enabled")]
    pub prometheus_enabled: bool,

    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}
impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_enabled: default_prometheus_enabled(),
            prometheus_port: default_prometheus_port(),
            log_dir: default_log_dir(),
        }
    }
}
impl MonitoringConfig {
    /// Validates monitoring configuration
    /// # Errors
    /// Returns `ConfigurationError::Invalid` when:
    /// - Prometheus is enabled with port 0 or a privileged port
    /// - The log directory is empty
    pub fn validate(&self) -> Result<()> {
        if self.prometheus_enabled {
            if self.prometheus_port == 0 {
                return Err(ConfigurationError::Invalid("prometheus_port cannot be 0 when enabled".into()).into());
            }

            // Check privileged ports (requires root)
            if self.prometheus_port < 1024 {
                return Err(ConfigurationError::Invalid(format!(
                    "prometheus_port {} is a privileged port (requires root)",
                    self.prometheus_port
                ))
                .into());
            }
        } else if self.prometheus_port != default_prometheus_port() {
            warn!(
                "prometheus_port configured to {} but monitoring is disabled",
                self.prometheus_port
            );
        }

        if self.log_dir.as_os_str().is_empty() {
            return Err(ConfigurationError::Invalid("log_dir path cannot be empty".into()).into());
        }

        Ok(())
    }
}
fn default_prometheus_enabled() -> bool {
    false
}

fn default_prometheus_port() -> u16 {
    9090
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/tmp/silo-host/logs")
}
