//! Local driver: a child interpreter in a throwaway directory
//!
//! The least isolated driver. The child gets a fresh temporary working
//! directory, a minimal environment and a hard wall-clock timeout; on
//! timeout the process is killed.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use tempfile::TempDir;
use tokio::process::Command;

use super::SandboxDriver;
use super::harness;
use crate::domain::{ExecutionResult, Invocation};
use crate::error::{AnvilError, Result};

#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Interpreter name or path
    pub python: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
        }
    }
}

impl LocalConfig {
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }
}

/// Resolve a program on PATH (or accept an existing path as-is)
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let candidate = PathBuf::from(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then_some(candidate);
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|p| p.is_file())
}

#[derive(Debug, Default)]
pub struct LocalDriver {
    config: LocalConfig,
}

impl LocalDriver {
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SandboxDriver for LocalDriver {
    fn name(&self) -> &str {
        "local"
    }

    async fn is_available(&self) -> bool {
        find_on_path(&self.config.python).is_some()
    }

    async fn execute(&self, source: &str, invocation: &Invocation, timeout: Duration) -> Result<ExecutionResult> {
        let python = find_on_path(&self.config.python)
            .ok_or_else(|| AnvilError::SandboxUnavailable(format!("{} not found on PATH", self.config.python)))?;

        let workdir = TempDir::new()?;
        harness::write_files(workdir.path(), source)?;

        let mut cmd = Command::new(&python);
        cmd.args(harness::harness_args(invocation))
            .current_dir(workdir.path())
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("HOME", workdir.path())
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let child = cmd
            .spawn()
            .map_err(|e| AnvilError::SandboxUnavailable(format!("failed to spawn {}: {}", python.display(), e)))?;

        // Dropping the wait future on timeout drops the child, which kills it
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let elapsed = start.elapsed().as_millis() as u64;
                let stdout = harness::capture(&output.stdout);
                let stderr = harness::capture(&output.stderr);
                debug!("Local run exited with {:?} in {}ms", output.status.code(), elapsed);
                if output.status.success() {
                    Ok(ExecutionResult {
                        stderr,
                        ..ExecutionResult::success(stdout, elapsed)
                    })
                } else {
                    Ok(ExecutionResult::runtime_error(stdout, stderr, elapsed))
                }
            }
            Ok(Err(e)) => Err(AnvilError::Io(e)),
            Err(_) => {
                warn!("Local run exceeded {}ms; killed", timeout.as_millis());
                Ok(ExecutionResult::timeout(timeout.as_millis() as u64))
            }
        }
    }
}
