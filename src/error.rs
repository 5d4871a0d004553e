//! Error types for Anvil
//!
//! Centralized error handling using thiserror. The first block of variants is
//! the pipeline failure taxonomy; the rest is plumbing.

use thiserror::Error;

/// All error types that can occur in Anvil
#[derive(Debug, Error)]
pub enum AnvilError {
    /// Oracle could not be reached or timed out (transient)
    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Generated source failed the structural checks twice
    #[error("Generation invalid: {0}")]
    GenerationInvalid(String),

    /// Every sandbox driver is unavailable
    #[error("Sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    /// Audit gate could not be reached
    #[error("Audit unavailable: {0}")]
    AuditUnavailable(String),

    /// Version lifecycle transition not allowed from the current state
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Tool was never registered (or has been deactivated)
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Conflicting registration for an existing tool name
    #[error("Tool already exists: {0}")]
    AlreadyExists(String),

    /// Tool has never had a successful promotion
    #[error("No active version: {0}")]
    NoActiveVersion(String),

    /// Version not found in the store
    #[error("Version not found: {0}")]
    VersionNotFound(String),

    /// Pipeline run not found
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Persisted state violates a store invariant
    #[error("Corrupt store: {0}")]
    Corruption(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Non-transient LLM error (bad request, auth)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Malformed input (signature text, arguments)
    #[error("Parse error: {0}")]
    Parse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnvilError {
    /// Whether the orchestrator may retry the failed call
    pub fn is_transient(&self) -> bool {
        matches!(self, AnvilError::OracleUnavailable(_))
    }

    /// Whether this is one of the defined pipeline failure kinds, as opposed
    /// to an unexpected fault that needs operator escalation
    pub fn is_expected_failure(&self) -> bool {
        matches!(
            self,
            AnvilError::OracleUnavailable(_)
                | AnvilError::GenerationInvalid(_)
                | AnvilError::SandboxUnavailable(_)
                | AnvilError::AuditUnavailable(_)
                | AnvilError::InvalidTransition(_)
                | AnvilError::UnknownTool(_)
        )
    }
}

/// Result type alias for Anvil operations
pub type Result<T> = std::result::Result<T, AnvilError>;
