//! Sandbox executor: runs candidate source in an isolated environment
//!
//! Drivers are tried in priority order. An unavailable driver is skipped
//! without surfacing an error; `SandboxUnavailable` is only reported when
//! every driver has been passed over.

pub mod docker;
pub mod harness;
pub mod local;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::domain::{ExecutionResult, ExitStatus, Invocation};
use crate::error::{AnvilError, Result};

pub use docker::{DockerConfig, DockerDriver};
pub use local::{LocalConfig, LocalDriver};
pub use remote::{RemoteConfig, RemoteDriver};

/// One execution backend
#[async_trait]
pub trait SandboxDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap readiness probe (credentials present, binary installed)
    async fn is_available(&self) -> bool;

    /// Run `source` and call the invocation's entry point
    ///
    /// `Err(SandboxUnavailable)` means the backend could not be used at all
    /// and the next driver should be tried.
    async fn execute(&self, source: &str, invocation: &Invocation, timeout: Duration) -> Result<ExecutionResult>;
}

/// Availability of one configured driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverStatus {
    pub name: String,
    pub available: bool,
}

/// Priority-ordered list of drivers
#[derive(Clone, Default)]
pub struct SandboxExecutor {
    drivers: Vec<Arc<dyn SandboxDriver>>,
}

impl std::fmt::Debug for SandboxExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxExecutor")
            .field("drivers", &self.driver_names())
            .finish()
    }
}

impl SandboxExecutor {
    pub fn new(drivers: Vec<Arc<dyn SandboxDriver>>) -> Self {
        Self { drivers }
    }

    /// Append a driver at the lowest priority
    pub fn with_driver(mut self, driver: Arc<dyn SandboxDriver>) -> Self {
        self.drivers.push(driver);
        self
    }

    pub fn driver_names(&self) -> Vec<String> {
        self.drivers.iter().map(|d| d.name().to_string()).collect()
    }

    pub async fn execute(&self, source: &str, invocation: &Invocation, timeout_ms: u64) -> Result<ExecutionResult> {
        let timeout = Duration::from_millis(timeout_ms);
        let mut skipped = Vec::new();

        for driver in &self.drivers {
            let name = driver.name();
            if !driver.is_available().await {
                debug!("Sandbox driver {} unavailable, falling through", name);
                skipped.push(format!("{}: unavailable", name));
                continue;
            }

            match driver.execute(source, invocation, timeout).await {
                Ok(result) if result.exit_status == ExitStatus::SandboxUnavailable => {
                    warn!("Sandbox driver {} reported unavailable: {}", name, result.stderr.trim());
                    skipped.push(format!("{}: {}", name, result.stderr.trim()));
                }
                Ok(result) => {
                    info!("Sandbox {} finished: {}", name, result.summary());
                    return Ok(result.with_driver(name));
                }
                Err(AnvilError::SandboxUnavailable(reason)) => {
                    warn!("Sandbox driver {} failed to start: {}", name, reason);
                    skipped.push(format!("{}: {}", name, reason));
                }
                Err(e) => return Err(e),
            }
        }

        warn!("No sandbox driver available");
        Ok(ExecutionResult::unavailable(format!(
            "no sandbox driver available (tried: {})",
            if skipped.is_empty() { "none".to_string() } else { skipped.join("; ") }
        )))
    }

    /// Report each driver's availability in priority order
    pub async fn probe(&self) -> Vec<DriverStatus> {
        let mut statuses = Vec::with_capacity(self.drivers.len());
        for driver in &self.drivers {
            statuses.push(DriverStatus {
                name: driver.name().to_string(),
                available: driver.is_available().await,
            });
        }
        statuses
    }
}
