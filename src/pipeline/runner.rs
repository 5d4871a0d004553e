//! Stage driver for one pipeline run
//!
//! Generating -> Verifying -> Auditing -> Promoting. Each stage either hands
//! over to the next or concludes the run. The tool's Active version is only
//! touched by the final `promote`.

use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};

use super::config::PipelineConfig;
use crate::audit::AuditGate;
use crate::domain::{Invocation, PipelineRun, RunMode, RunOutcome, Stage, Tool, Version, VersionState};
use crate::error::{AnvilError, Result};
use crate::generator::Generator;
use crate::sandbox::SandboxExecutor;
use crate::store::VersionStore;

/// How a run ended, and whether the tool needs an operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConclusion {
    pub outcome: RunOutcome,
    pub detail: String,
    /// Tool goes to `Failed` regardless of its Active version
    pub escalate: bool,
}

impl RunConclusion {
    fn deployed(detail: impl Into<String>) -> Self {
        Self {
            outcome: RunOutcome::Deployed,
            detail: detail.into(),
            escalate: false,
        }
    }

    fn rolled_back(detail: impl Into<String>) -> Self {
        Self {
            outcome: RunOutcome::RolledBack,
            detail: detail.into(),
            escalate: false,
        }
    }

    fn aborted(detail: impl Into<String>) -> Self {
        Self {
            outcome: RunOutcome::Aborted,
            detail: detail.into(),
            escalate: false,
        }
    }

    pub(super) fn escalated(detail: impl Into<String>) -> Self {
        Self {
            outcome: RunOutcome::Aborted,
            detail: detail.into(),
            escalate: true,
        }
    }
}

/// Apply a change to a shared run record
pub(super) fn update_run(run: &Mutex<PipelineRun>, f: impl FnOnce(&mut PipelineRun)) {
    let mut guard = run.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut guard);
}

pub(super) fn snapshot(run: &Mutex<PipelineRun>) -> PipelineRun {
    run.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Executes the stages of a single run
pub struct PipelineRunner {
    pub(super) store: Arc<VersionStore>,
    pub(super) generator: Arc<dyn Generator>,
    pub(super) sandbox: Arc<SandboxExecutor>,
    pub(super) audit: Arc<dyn AuditGate>,
    pub(super) config: PipelineConfig,
}

impl PipelineRunner {
    /// Drive the run to a conclusion; never fails
    pub async fn run(&self, run: &Mutex<PipelineRun>) -> RunConclusion {
        let PipelineRun { id, tool, mode, trigger, .. } = snapshot(run);
        debug!("Run {} starting for {} ({})", id, tool, mode);

        let mut candidate: Option<String> = None;
        let conclusion = match self.stages(&tool, mode, trigger.as_deref(), run, &mut candidate).await {
            Ok(conclusion) => conclusion,
            Err(e) if e.is_expected_failure() => {
                warn!("Run {} aborted: {}", id, e);
                RunConclusion::aborted(e.to_string())
            }
            Err(e) => {
                error!("Run {} hit an unexpected fault: {}", id, e);
                RunConclusion::escalated(format!("unexpected fault: {}", e))
            }
        };

        if let Some(version_id) = candidate.filter(|_| conclusion.outcome != RunOutcome::Deployed) {
            self.discard(&version_id);
        }
        conclusion
    }

    /// Reject the candidate of a run whose task died before concluding
    pub(super) fn discard_orphan(&self, run: &Mutex<PipelineRun>) {
        let PipelineRun { tool, candidate_sequence, .. } = snapshot(run);
        let Some(sequence) = candidate_sequence else { return };
        match self.store.get_version_by_sequence(&tool, sequence) {
            Ok(version) if matches!(version.state, VersionState::Active | VersionState::Superseded) => {}
            Ok(version) => self.discard(&version.id),
            Err(e) => warn!("Could not look up candidate {} of {}: {}", sequence, tool, e),
        }
    }

    /// Leave an unpromoted candidate Rejected
    fn discard(&self, version_id: &str) {
        match self.store.reject(version_id) {
            Ok(_) => debug!("Candidate {} left rejected", version_id),
            Err(e) => warn!("Could not reject candidate {}: {}", version_id, e),
        }
    }

    async fn stages(
        &self,
        tool_name: &str,
        mode: RunMode,
        trigger: Option<&str>,
        run: &Mutex<PipelineRun>,
        candidate: &mut Option<String>,
    ) -> Result<RunConclusion> {
        let tool = self.store.get_tool(tool_name)?;
        let prior = match self.store.get_active(tool_name) {
            Ok(version) => Some(version),
            Err(AnvilError::NoActiveVersion(_)) => None,
            Err(e) => return Err(e),
        };

        // Generating
        update_run(run, |r| r.enter(Stage::Generating));
        let source = match self.generate(&tool, mode, prior.as_ref(), trigger).await {
            Ok(source) => source,
            Err(AnvilError::GenerationInvalid(violations)) => {
                return Ok(RunConclusion::escalated(format!("generation invalid: {}", violations)));
            }
            Err(e @ AnvilError::OracleUnavailable(_)) => return Ok(RunConclusion::aborted(e.to_string())),
            Err(e) => return Err(e),
        };

        let version = self.store.append_candidate(tool_name, &source, mode.into())?;
        *candidate = Some(version.id.clone());
        update_run(run, |r| r.candidate_sequence = Some(version.sequence));

        // Verifying
        update_run(run, |r| r.enter(Stage::Verifying));
        let invocation = Invocation::sample(&tool.signature);
        let result = self
            .sandbox
            .execute(&source, &invocation, self.config.sandbox_timeout_ms)
            .await?;
        let summary = result.summary();
        let verified = self.store.mark_verified(&version.id, result)?;
        if verified.state != VersionState::Verified {
            info!("Candidate {} failed verification: {}", version.id, summary);
            return Ok(RunConclusion::aborted(format!("verification failed: {}", summary)));
        }

        // Auditing
        update_run(run, |r| r.enter(Stage::Auditing));
        let prior_source = prior.as_ref().map(|v| v.source.as_str());
        let review = self.audit.review(prior_source, &source, &tool.intent);
        let verdict = match tokio::time::timeout(self.config.audit_timeout(), review).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(AnvilError::AuditUnavailable(reason))) => {
                warn!("Audit unavailable for {}: {}", version.id, reason);
                return Ok(RunConclusion::aborted(format!("audit unavailable: {}", reason)));
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!("Audit for {} timed out", version.id);
                return Ok(RunConclusion::aborted(format!(
                    "audit unavailable: no verdict within {}ms",
                    self.config.audit_timeout_ms
                )));
            }
        };
        let findings = verdict.findings.join("; ");
        let audited = self.store.mark_audited(&version.id, verdict)?;
        if audited.state != VersionState::Audited {
            info!("Audit rejected {}: {}", version.id, findings);
            return Ok(RunConclusion::rolled_back(format!("audit rejected: {}", findings)));
        }

        // Promoting
        update_run(run, |r| r.enter(Stage::Promoting));
        self.store.promote(&version.id)?;
        Ok(RunConclusion::deployed(match &prior {
            Some(p) => format!("{} promoted, {} superseded", version.id, p.id),
            None => format!("{} promoted", version.id),
        }))
    }

    /// Call the generator, retrying `OracleUnavailable` with backoff
    async fn generate(&self, tool: &Tool, mode: RunMode, prior: Option<&Version>, trigger: Option<&str>) -> Result<String> {
        let max = self.config.max_generation_attempts;
        let mut last: Option<AnvilError> = None;

        for attempt in 1..=max {
            let call = async {
                match (mode, prior) {
                    (RunMode::Fix, Some(prior)) => {
                        self.generator
                            .fix(&tool.intent, &tool.signature, &prior.source, trigger.unwrap_or(""))
                            .await
                    }
                    _ => self.generator.build(&tool.intent, &tool.signature).await,
                }
            };

            match tokio::time::timeout(self.config.generation_timeout(), call).await {
                Ok(Ok(source)) => return Ok(source),
                Ok(Err(e)) if e.is_transient() => {
                    warn!("Oracle attempt {}/{} for {} failed: {}", attempt, max, tool.name, e);
                    last = Some(e);
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!("Oracle attempt {}/{} for {} timed out", attempt, max, tool.name);
                    last = Some(AnvilError::OracleUnavailable(format!(
                        "no response within {}ms",
                        self.config.generation_timeout_ms
                    )));
                }
            }

            if attempt < max {
                let delay = self.config.backoff_delay(attempt);
                debug!("Retrying oracle in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
        }

        Err(AnvilError::OracleUnavailable(format!(
            "{} attempts failed, last: {}",
            max,
            last.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}
