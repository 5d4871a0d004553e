//! Pipeline - the self-healing orchestrator
//!
//! Intake (`request_build`, `report_failure`, `check`) starts at most one
//! run per tool; further signals for a tool with a run in flight are folded
//! into that run. Runs for different tools proceed in parallel. Finished
//! runs are archived to the `runs` collection (the repair log).

mod config;
mod runner;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::watch;

use crate::audit::AuditGate;
use crate::domain::{
    ExecutionResult, ExitStatus, Invocation, PipelineRun, RunMode, RunOutcome, Signature, ToolStatus,
    VersionSummary,
};
use crate::error::{AnvilError, Result};
use crate::generator::Generator;
use crate::sandbox::SandboxExecutor;
use crate::storage::{Filter, Storage};
use crate::store::VersionStore;

pub use config::PipelineConfig;
pub use runner::{PipelineRunner, RunConclusion};

/// Collection name for archived runs
pub const RUNS: &str = "runs";

/// Status query result for one tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolStatusReport {
    pub tool: String,
    pub status: ToolStatus,
    pub active_sequence: Option<u64>,
    pub last_run_outcome: Option<RunOutcome>,
    pub last_run_timestamp: Option<i64>,
    /// Id of the run currently in flight, if any
    pub in_flight: Option<String>,
}

/// Result of a health check
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub result: ExecutionResult,
    /// Run started (or joined) because the check failed
    pub repair_run: Option<String>,
}

/// In-flight run registry entry
struct InFlight {
    run: Arc<Mutex<PipelineRun>>,
    done: watch::Sender<bool>,
}

pub struct Pipeline {
    runner: Arc<PipelineRunner>,
    inflight: Mutex<HashMap<String, InFlight>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.runner.config)
            .field("sandbox", &self.runner.sandbox)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        store: Arc<VersionStore>,
        generator: Arc<dyn Generator>,
        sandbox: Arc<SandboxExecutor>,
        audit: Arc<dyn AuditGate>,
    ) -> Self {
        Self::with_config(store, generator, sandbox, audit, PipelineConfig::default())
    }

    pub fn with_config(
        store: Arc<VersionStore>,
        generator: Arc<dyn Generator>,
        sandbox: Arc<SandboxExecutor>,
        audit: Arc<dyn AuditGate>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            runner: Arc::new(PipelineRunner {
                store,
                generator,
                sandbox,
                audit,
                config,
            }),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<VersionStore> {
        &self.runner.store
    }

    pub fn sandbox(&self) -> &Arc<SandboxExecutor> {
        &self.runner.sandbox
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.runner.config
    }

    fn registry(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, InFlight>>> {
        self.inflight
            .lock()
            .map_err(|e| AnvilError::Storage(format!("run registry poisoned: {}", e)))
    }

    // ------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------

    /// Register a tool and start its initial Build run
    ///
    /// Fails with `InvalidTransition` if the tool already has an Active
    /// version; repairs go through `report_failure`.
    pub fn request_build(self: &Arc<Self>, name: &str, intent: &str, signature: &Signature) -> Result<String> {
        let mut registry = self.registry()?;
        // A conflicting contract must fail even while a run is in flight
        self.store().register(name, intent, signature)?;
        if let Some(run_id) = coalesce(&registry, name) {
            return Ok(run_id);
        }

        if let Some(seq) = self.store().active_sequence(name)? {
            return Err(AnvilError::InvalidTransition(format!(
                "{} already has active version {}; report a failure to repair it",
                name, seq
            )));
        }

        Ok(self.start(&mut registry, PipelineRun::new(name, RunMode::Build, None)))
    }

    /// Signal that a tool's invocation failed
    ///
    /// Starts a Fix run, or a Build run carrying the trace when the tool has
    /// never been promoted. Joins the in-flight run if there is one.
    pub fn report_failure(self: &Arc<Self>, name: &str, failure_trace: &str) -> Result<String> {
        let mut registry = self.registry()?;
        if let Some(run_id) = coalesce(&registry, name) {
            return Ok(run_id);
        }

        let tool = self.store().get_tool(name)?;
        if tool.deactivated {
            return Err(AnvilError::UnknownTool(format!("{} (deactivated)", name)));
        }
        let mode = match self.store().active_sequence(name)? {
            Some(_) => RunMode::Fix,
            None => RunMode::Build,
        };

        let run = PipelineRun::new(name, mode, Some(failure_trace.to_string()));
        Ok(self.start(&mut registry, run))
    }

    fn start(self: &Arc<Self>, registry: &mut HashMap<String, InFlight>, run: PipelineRun) -> String {
        let run_id = run.id.clone();
        let tool = run.tool.clone();
        info!("Starting {} run {} for {}", run.mode, run_id, tool);

        if let Err(e) = self.store().set_status(&tool, ToolStatus::Repairing) {
            warn!("Could not mark {} repairing: {}", tool, e);
        }

        let shared = Arc::new(Mutex::new(run));
        let (done, _) = watch::channel(false);
        registry.insert(
            tool.clone(),
            InFlight {
                run: Arc::clone(&shared),
                done,
            },
        );

        let pipeline = Arc::clone(self);
        let id = run_id.clone();
        tokio::spawn(async move {
            let worker = tokio::spawn({
                let runner = Arc::clone(&pipeline.runner);
                let shared = Arc::clone(&shared);
                async move { runner.run(&shared).await }
            });
            let conclusion = match worker.await {
                Ok(conclusion) => conclusion,
                Err(e) => {
                    error!("Run {} for {} died: {}", id, tool, e);
                    pipeline.runner.discard_orphan(&shared);
                    let cause = if e.is_panic() { "panicked" } else { "cancelled" };
                    RunConclusion::escalated(format!("unexpected fault: {}", cause))
                }
            };
            pipeline.finish(&tool, &shared, conclusion);
        });

        run_id
    }

    /// Record the outcome, archive the run and release the tool
    fn finish(&self, tool: &str, run: &Mutex<PipelineRun>, conclusion: RunConclusion) {
        // Held until the entry is gone so no signal joins a run after its record is archived
        let mut registry = self.inflight.lock().unwrap_or_else(|e| e.into_inner());

        runner::update_run(run, |r| r.finish(conclusion.outcome, conclusion.detail.as_str()));
        let archived = runner::snapshot(run);

        let status = match conclusion.outcome {
            RunOutcome::Deployed => ToolStatus::Healthy,
            _ if conclusion.escalate => ToolStatus::Failed,
            _ => match self.store().active_sequence(tool) {
                Ok(Some(_)) => ToolStatus::Degraded,
                _ => ToolStatus::Failed,
            },
        };
        if let Err(e) = self.store().set_status(tool, status) {
            warn!("Could not set status of {}: {}", tool, e);
        }

        if let Err(e) = self.store().storage().create(RUNS, &archived) {
            warn!("Could not archive run {}: {}", archived.id, e);
        }
        info!(
            "Run {} for {} finished: {} ({}, {} signals coalesced)",
            archived.id, tool, conclusion.outcome, conclusion.detail, archived.coalesced
        );

        let entry = registry.remove(tool);
        drop(registry);
        if let Some(entry) = entry {
            entry.done.send_replace(true);
        }
    }

    /// Run a tool's Active version; report a failure if it breaks
    pub async fn check(self: &Arc<Self>, name: &str) -> Result<HealthCheck> {
        let active = self.store().get_active(name)?;
        let tool = self.store().get_tool(name)?;
        let invocation = Invocation::sample(&tool.signature);

        let result = self
            .sandbox()
            .execute(&active.source, &invocation, self.config().sandbox_timeout_ms)
            .await?;

        let repair_run = match result.exit_status {
            ExitStatus::Success => {
                if self.in_flight(name).is_none() {
                    self.store().set_status(name, ToolStatus::Healthy)?;
                }
                None
            }
            ExitStatus::SandboxUnavailable => {
                warn!("Health check of {} skipped: {}", name, result.stderr.trim());
                None
            }
            _ => {
                let trace = format!("{}\n{}", result.summary(), result.stderr.trim());
                Some(self.report_failure(name, &trace)?)
            }
        };

        Ok(HealthCheck { result, repair_run })
    }

    /// Re-promote an earlier version of a tool
    pub fn restore(&self, name: &str, sequence: u64) -> Result<VersionSummary> {
        if let Some(run_id) = self.in_flight(name) {
            return Err(AnvilError::InvalidTransition(format!(
                "{} has run {} in flight",
                name, run_id
            )));
        }
        let version = self.store().get_version_by_sequence(name, sequence)?;
        let restored = self.store().restore(&version.id)?;
        info!("Restored {} by request", restored.id);
        Ok(restored.summary())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Id of the run in flight for a tool
    pub fn in_flight(&self, name: &str) -> Option<String> {
        let registry = self.inflight.lock().ok()?;
        registry.get(name).map(|entry| runner::snapshot(&entry.run).id)
    }

    /// Snapshots of every run in flight
    pub fn active_runs(&self) -> Vec<PipelineRun> {
        match self.inflight.lock() {
            Ok(registry) => registry.values().map(|e| runner::snapshot(&e.run)).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn tool_status(&self, name: &str) -> Result<ToolStatusReport> {
        let tool = self.store().get_tool(name)?;
        let active_sequence = self.store().active_sequence(name)?;

        let inflight = self
            .registry()?
            .get(name)
            .map(|entry| runner::snapshot(&entry.run));
        let last = match &inflight {
            Some(run) => Some(run.clone()),
            None => self.runs(name)?.pop(),
        };

        Ok(ToolStatusReport {
            tool: tool.name,
            status: tool.status,
            active_sequence,
            last_run_outcome: last.as_ref().and_then(|r| r.outcome),
            last_run_timestamp: last.as_ref().map(|r| r.last_timestamp()),
            in_flight: inflight.map(|r| r.id),
        })
    }

    /// Version summaries, oldest first
    pub fn history(&self, name: &str) -> Result<Vec<VersionSummary>> {
        Ok(self.store().history(name)?.iter().map(|v| v.summary()).collect())
    }

    /// Archived runs for a tool, oldest first
    pub fn runs(&self, name: &str) -> Result<Vec<PipelineRun>> {
        self.store().storage().query(RUNS, &[Filter::eq("tool", name)])
    }

    /// A run by id, in flight or archived
    pub fn get_run(&self, run_id: &str) -> Result<PipelineRun> {
        {
            let registry = self.registry()?;
            if let Some(entry) = registry.values().find(|e| runner::snapshot(&e.run).id == run_id) {
                return Ok(runner::snapshot(&entry.run));
            }
        }
        self.store()
            .storage()
            .get(RUNS, run_id)?
            .ok_or_else(|| AnvilError::RunNotFound(run_id.to_string()))
    }

    /// Wait for a run to be archived and return it
    pub async fn wait(&self, run_id: &str) -> Result<PipelineRun> {
        let receiver = {
            let registry = self.registry()?;
            registry
                .values()
                .find(|e| runner::snapshot(&e.run).id == run_id)
                .map(|e| e.done.subscribe())
        };

        if let Some(mut receiver) = receiver {
            debug!("Waiting for run {}", run_id);
            // A closed channel means the entry was dropped; the archive is authoritative
            let _ = receiver.wait_for(|done| *done).await;
        }

        self.store()
            .storage()
            .get(RUNS, run_id)?
            .ok_or_else(|| AnvilError::RunNotFound(run_id.to_string()))
    }

    /// Tool count per status, deactivated tools excluded
    pub fn stats(&self) -> Result<HashMap<ToolStatus, usize>> {
        let mut counts = HashMap::new();
        for tool in self.store().list_tools()?.into_iter().filter(|t| !t.deactivated) {
            *counts.entry(tool.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// Fold a signal into the tool's in-flight run, if any
fn coalesce(registry: &HashMap<String, InFlight>, tool: &str) -> Option<String> {
    let entry = registry.get(tool)?;
    let mut run = entry.run.lock().unwrap_or_else(|e| e.into_inner());
    run.coalesced += 1;
    info!("Coalesced signal for {} into run {} ({} so far)", tool, run.id, run.coalesced);
    Some(run.id.clone())
}
