//! Sandbox invocation and outcome types

use serde::{Deserialize, Serialize};

use super::signature::Signature;

/// How a sandbox run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    RuntimeError,
    Timeout,
    SandboxUnavailable,
}

/// Outcome of one sandbox run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Driver that produced the result (empty when none was available)
    #[serde(default)]
    pub driver: String,
}

impl ExecutionResult {
    pub fn success(stdout: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            exit_status: ExitStatus::Success,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms,
            driver: String::new(),
        }
    }

    pub fn runtime_error(stdout: impl Into<String>, stderr: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            exit_status: ExitStatus::RuntimeError,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration_ms,
            driver: String::new(),
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self {
            exit_status: ExitStatus::Timeout,
            stdout: String::new(),
            stderr: format!("execution exceeded {}ms and was terminated", duration_ms),
            duration_ms,
            driver: String::new(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            exit_status: ExitStatus::SandboxUnavailable,
            stdout: String::new(),
            stderr: reason.into(),
            duration_ms: 0,
            driver: String::new(),
        }
    }

    /// Tag the result with the driver that produced it
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.exit_status == ExitStatus::Success
    }

    /// Short description suitable for a failure trace
    pub fn summary(&self) -> String {
        match self.exit_status {
            ExitStatus::Success => format!("success in {}ms", self.duration_ms),
            ExitStatus::RuntimeError => format!("runtime error: {}", self.stderr.trim()),
            ExitStatus::Timeout => format!("timeout after {}ms", self.duration_ms),
            ExitStatus::SandboxUnavailable => format!("sandbox unavailable: {}", self.stderr.trim()),
        }
    }
}

/// Entry point and keyword arguments to call after loading a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub entry_point: String,
    pub args: serde_json::Map<String, serde_json::Value>,
}

impl Invocation {
    pub fn new(entry_point: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
            args: serde_json::Map::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.args.insert(name.into(), value);
        self
    }

    /// Verification call built from a signature: one representative value
    /// per declared parameter
    pub fn sample(signature: &Signature) -> Self {
        signature
            .params
            .iter()
            .fold(Self::new(&signature.entry_point), |inv, p| {
                inv.with_arg(&p.name, p.ty.sample_value())
            })
    }

    /// Arguments as a JSON object string
    pub fn args_json(&self) -> String {
        serde_json::Value::Object(self.args.clone()).to_string()
    }
}
