//! PipelineRun record
//!
//! One end-to-end attempt to heal (or first build) a tool. Runs live in
//! memory while in flight and are archived to the repair log once their
//! outcome is known.

use serde::{Deserialize, Serialize};

use super::version::GeneratedBy;
use crate::id::{generate_run_id, now_ms};
use crate::storage::HasId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Build,
    Fix,
}

impl From<RunMode> for GeneratedBy {
    fn from(mode: RunMode) -> Self {
        match mode {
            RunMode::Build => GeneratedBy::Build,
            RunMode::Fix => GeneratedBy::Fix,
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Build => f.write_str("build"),
            RunMode::Fix => f.write_str("fix"),
        }
    }
}

/// Pipeline stage reached by a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Generating,
    Verifying,
    Auditing,
    Promoting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Candidate promoted to Active
    Deployed,
    /// Audit rejected the candidate; prior Active version kept
    RolledBack,
    /// Any other failure
    Aborted,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Deployed => f.write_str("deployed"),
            RunOutcome::RolledBack => f.write_str("rolled_back"),
            RunOutcome::Aborted => f.write_str("aborted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub tool: String,
    pub mode: RunMode,
    /// Failure trace that started the run; `None` for an initial build
    pub trigger: Option<String>,
    pub stages_completed: Vec<Stage>,
    pub outcome: Option<RunOutcome>,
    /// Sequence of the candidate this run appended, if it got that far
    pub candidate_sequence: Option<u64>,
    /// Human-readable reason for the outcome
    pub detail: Option<String>,
    /// Signals folded into this run after it started
    #[serde(default)]
    pub coalesced: u32,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

impl PipelineRun {
    pub fn new(tool: impl Into<String>, mode: RunMode, trigger: Option<String>) -> Self {
        Self {
            id: generate_run_id(),
            tool: tool.into(),
            mode,
            trigger,
            stages_completed: Vec::new(),
            outcome: None,
            candidate_sequence: None,
            detail: None,
            coalesced: 0,
            started_at: now_ms(),
            finished_at: None,
        }
    }

    /// Record that a stage was reached
    pub fn enter(&mut self, stage: Stage) {
        if self.stages_completed.last() != Some(&stage) {
            self.stages_completed.push(stage);
        }
    }

    pub fn finish(&mut self, outcome: RunOutcome, detail: impl Into<String>) {
        self.outcome = Some(outcome);
        self.detail = Some(detail.into());
        self.finished_at = Some(now_ms());
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Timestamp of the last change to this run
    pub fn last_timestamp(&self) -> i64 {
        self.finished_at.unwrap_or(self.started_at)
    }
}

impl HasId for PipelineRun {
    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run() {
        let run = PipelineRun::new("stock", RunMode::Fix, Some("ConnectionError".into()));
        assert!(run.id.starts_with("run-"));
        assert!(!run.is_finished());
        assert!(run.stages_completed.is_empty());
        assert_eq!(run.last_timestamp(), run.started_at);
    }

    #[test]
    fn test_enter_does_not_duplicate() {
        let mut run = PipelineRun::new("stock", RunMode::Build, None);
        run.enter(Stage::Generating);
        run.enter(Stage::Generating);
        run.enter(Stage::Verifying);
        assert_eq!(run.stages_completed, vec![Stage::Generating, Stage::Verifying]);
    }

    #[test]
    fn test_finish() {
        let mut run = PipelineRun::new("stock", RunMode::Fix, None);
        run.finish(RunOutcome::RolledBack, "audit rejected");
        assert!(run.is_finished());
        assert_eq!(run.outcome, Some(RunOutcome::RolledBack));
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_mode_maps_to_generated_by() {
        assert_eq!(GeneratedBy::from(RunMode::Fix), GeneratedBy::Fix);
        assert_eq!(RunOutcome::RolledBack.to_string(), "rolled_back");
    }
}
