//! Docker driver: one throwaway container per execution
//!
//! The container runs with no network, a read-only root filesystem and the
//! candidate mounted read-only. It is force-removed on every exit path,
//! including when the calling future is dropped mid-run.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use tempfile::TempDir;
use tokio::process::Command;

use super::harness;
use super::local::find_on_path;
use super::SandboxDriver;
use crate::domain::{ExecutionResult, Invocation};
use crate::error::{AnvilError, Result};
use crate::id::generate_sandbox_name;

const WORKDIR: &str = "/work";

#[derive(Debug, Clone)]
pub struct DockerConfig {
    pub image: String,
    /// Value for `--network`
    pub network: String,
    pub memory: String,
    pub cpus: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: "python:3.12-slim".to_string(),
            network: "none".to_string(),
            memory: "256m".to_string(),
            cpus: "1".to_string(),
        }
    }
}

impl DockerConfig {
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }
}

/// Removes the named container when dropped unless disarmed
struct ContainerGuard {
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            armed: true,
        }
    }

    /// Remove the container now and disarm the guard
    async fn remove(mut self) {
        self.armed = false;
        let status = Command::new("docker")
            .args(["rm", "-f", self.name.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            warn!("Failed to remove container {}: {}", self.name, e);
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("Removing container {} from drop guard", self.name);
            let _ = std::process::Command::new("docker")
                .args(["rm", "-f", self.name.as_str()])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
        }
    }
}

#[derive(Debug, Default)]
pub struct DockerDriver {
    config: DockerConfig,
}

impl DockerDriver {
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    fn run_args(&self, name: &str, mount: &str, invocation: &Invocation) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "--name".into(),
            name.into(),
            "--network".into(),
            self.config.network.clone(),
            "--read-only".into(),
            "--tmpfs".into(),
            "/tmp".into(),
            "--memory".into(),
            self.config.memory.clone(),
            "--cpus".into(),
            self.config.cpus.clone(),
            "--pids-limit".into(),
            "64".into(),
            "-v".into(),
            format!("{}:{}:ro", mount, WORKDIR),
            "-w".into(),
            WORKDIR.into(),
            "-e".into(),
            "PYTHONDONTWRITEBYTECODE=1".into(),
            self.config.image.clone(),
            "python3".into(),
        ];
        args.extend(harness::harness_args(invocation));
        args
    }
}

#[async_trait]
impl SandboxDriver for DockerDriver {
    fn name(&self) -> &str {
        "docker"
    }

    async fn is_available(&self) -> bool {
        if find_on_path("docker").is_none() {
            return false;
        }
        let info = Command::new("docker")
            .args(["info", "--format", "{{.ServerVersion}}"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        matches!(
            tokio::time::timeout(Duration::from_secs(5), info).await,
            Ok(Ok(status)) if status.success()
        )
    }

    async fn execute(&self, source: &str, invocation: &Invocation, timeout: Duration) -> Result<ExecutionResult> {
        let workdir = TempDir::new()?;
        harness::write_files(workdir.path(), source)?;

        let name = generate_sandbox_name();
        let args = self.run_args(&name, &workdir.path().to_string_lossy(), invocation);

        let guard = ContainerGuard::new(&name);
        let start = Instant::now();
        let spawned = Command::new("docker")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                guard.remove().await;
                return Err(AnvilError::SandboxUnavailable(format!("failed to start docker: {}", e)));
            }
        };

        let outcome = tokio::time::timeout(timeout, child.wait_with_output()).await;
        guard.remove().await;

        match outcome {
            Ok(Ok(output)) => {
                let elapsed = start.elapsed().as_millis() as u64;
                let stdout = harness::capture(&output.stdout);
                let stderr = harness::capture(&output.stderr);
                debug!("Container {} exited with {:?} in {}ms", name, output.status.code(), elapsed);
                match output.status.code() {
                    Some(0) => Ok(ExecutionResult {
                        stderr,
                        ..ExecutionResult::success(stdout, elapsed)
                    }),
                    // 125: the docker daemon failed before the container ran
                    Some(125) => Err(AnvilError::SandboxUnavailable(format!("docker run failed: {}", stderr.trim()))),
                    _ => Ok(ExecutionResult::runtime_error(stdout, stderr, elapsed)),
                }
            }
            Ok(Err(e)) => Err(AnvilError::Io(e)),
            Err(_) => {
                warn!("Container {} exceeded {}ms; removed", name, timeout.as_millis());
                Ok(ExecutionResult::timeout(timeout.as_millis() as u64))
            }
        }
    }
}
