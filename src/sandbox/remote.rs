//! Remote driver: ephemeral VM sandboxes behind an HTTP API
//!
//! Protocol:
//! - `POST {base}/sandboxes` `{id, template, timeout_ms}`; the client picks the id
//! - `POST {base}/sandboxes/{id}/exec` `{files, command, timeout_ms}` ->
//!   `{exit_code, stdout, stderr, timed_out}`
//! - `DELETE {base}/sandboxes/{id}`
//!
//! Only available when the API key variable is set. The delete guard is
//! armed before the create request goes out, so a sandbox the service
//! created is deleted even if its response never reached us.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::harness;
use super::SandboxDriver;
use crate::domain::{ExecutionResult, Invocation};
use crate::error::{AnvilError, Result};
use crate::id::generate_sandbox_name;

/// Extra time allowed on top of the execution timeout for the round trip
const REQUEST_OVERHEAD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub template: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.sandbox.example.com/v1".to_string(),
            api_key_env: "ANVIL_SANDBOX_API_KEY".to_string(),
            template: "python3".to_string(),
        }
    }
}

impl RemoteConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = var.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    id: &'a str,
    template: &'a str,
    timeout_ms: u64,
}

#[derive(Debug, Serialize)]
struct ExecRequest<'a> {
    files: HashMap<&'a str, &'a str>,
    command: Vec<String>,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ExecResponse {
    exit_code: i32,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    timed_out: bool,
}

/// Issues the delete call on drop if `delete` was never awaited
struct SandboxGuard {
    client: Client,
    url: String,
    api_key: String,
    armed: bool,
}

impl SandboxGuard {
    async fn delete(mut self) {
        self.armed = false;
        let result = self.client.delete(&self.url).bearer_auth(&self.api_key).send().await;
        match result {
            Ok(resp) if resp.status().is_success() => debug!("Deleted remote sandbox {}", self.url),
            Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                debug!("Remote sandbox {} was never created", self.url)
            }
            Ok(resp) => warn!("Delete of {} returned {}", self.url, resp.status()),
            Err(e) => warn!("Delete of {} failed: {}", self.url, e),
        }
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let request = self.client.delete(&self.url).bearer_auth(&self.api_key);
            let url = self.url.clone();
            handle.spawn(async move {
                if let Err(e) = request.send().await {
                    warn!("Deferred delete of {} failed: {}", url, e);
                }
            });
        } else {
            warn!("Remote sandbox {} leaked: no runtime to delete it", self.url);
        }
    }
}

pub struct RemoteDriver {
    config: RemoteConfig,
    client: Client,
}

impl std::fmt::Debug for RemoteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDriver")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl RemoteDriver {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(&self.config.api_key_env).ok().filter(|k| !k.trim().is_empty())
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn sandbox_url(&self, id: &str) -> String {
        format!("{}/sandboxes/{}", self.base(), id)
    }

    async fn create(&self, api_key: &str, id: &str, timeout: Duration) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/sandboxes", self.base()))
            .bearer_auth(api_key)
            .timeout(REQUEST_OVERHEAD)
            .json(&CreateRequest {
                id,
                template: &self.config.template,
                timeout_ms: timeout.as_millis() as u64 + REQUEST_OVERHEAD.as_millis() as u64,
            })
            .send()
            .await
            .map_err(|e| AnvilError::SandboxUnavailable(format!("remote sandbox unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(AnvilError::SandboxUnavailable(format!(
                "remote sandbox create returned {}",
                response.status()
            )));
        }
        debug!("Created remote sandbox {}", id);
        Ok(())
    }

    async fn exec(
        &self,
        api_key: &str,
        id: &str,
        source: &str,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<ExecResponse> {
        let mut files = HashMap::new();
        files.insert(harness::HARNESS_FILE, harness::HARNESS_SOURCE);
        files.insert(harness::TOOL_FILE, source);

        let mut command = vec!["python3".to_string()];
        command.extend(harness::harness_args(invocation));

        let response = self
            .client
            .post(format!("{}/exec", self.sandbox_url(id)))
            .bearer_auth(api_key)
            .timeout(timeout + REQUEST_OVERHEAD)
            .json(&ExecRequest {
                files,
                command,
                timeout_ms: timeout.as_millis() as u64,
            })
            .send()
            .await
            .map_err(|e| AnvilError::SandboxUnavailable(format!("remote exec failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AnvilError::SandboxUnavailable(format!(
                "remote exec returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AnvilError::SandboxUnavailable(format!("bad exec response: {}", e)))
    }
}

#[async_trait]
impl SandboxDriver for RemoteDriver {
    fn name(&self) -> &str {
        "remote"
    }

    async fn is_available(&self) -> bool {
        self.api_key().is_some() && !self.config.base_url.is_empty()
    }

    async fn execute(&self, source: &str, invocation: &Invocation, timeout: Duration) -> Result<ExecutionResult> {
        let api_key = self
            .api_key()
            .ok_or_else(|| AnvilError::SandboxUnavailable(format!("{} is not set", self.config.api_key_env)))?;

        let id = generate_sandbox_name();
        let guard = SandboxGuard {
            client: self.client.clone(),
            url: self.sandbox_url(&id),
            api_key: api_key.clone(),
            armed: true,
        };
        if let Err(e) = self.create(&api_key, &id, timeout).await {
            guard.delete().await;
            return Err(e);
        }

        let start = Instant::now();
        let outcome = tokio::time::timeout(
            timeout + REQUEST_OVERHEAD,
            self.exec(&api_key, &id, source, invocation, timeout),
        )
        .await;
        guard.delete().await;

        let elapsed = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(resp)) if resp.timed_out => Ok(ExecutionResult::timeout(timeout.as_millis() as u64)),
            Ok(Ok(resp)) if resp.exit_code == 0 => Ok(ExecutionResult {
                stderr: resp.stderr,
                ..ExecutionResult::success(resp.stdout, elapsed)
            }),
            Ok(Ok(resp)) => Ok(ExecutionResult::runtime_error(resp.stdout, resp.stderr, elapsed)),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(ExecutionResult::timeout(timeout.as_millis() as u64)),
        }
    }
}
