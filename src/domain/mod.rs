//! Domain types for Anvil
//!
//! - Tool: a named capability with a declared signature and health status
//! - Version: one immutable generated implementation of a tool
//! - ExecutionResult / Invocation: sandbox inputs and outputs
//! - AuditVerdict: review gate outcome
//! - PipelineRun: one end-to-end healing attempt

pub mod audit;
pub mod execution;
pub mod run;
pub mod signature;
pub mod tool;
pub mod version;

pub use audit::{AuditDecision, AuditVerdict};
pub use execution::{ExecutionResult, ExitStatus, Invocation};
pub use run::{PipelineRun, RunMode, RunOutcome, Stage};
pub use signature::{DEFAULT_ENTRY_POINT, Param, ParamType, Signature};
pub use tool::{Tool, ToolStatus};
pub use version::{GeneratedBy, Version, VersionState, VersionSummary, source_digest};
