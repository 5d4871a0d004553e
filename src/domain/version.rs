//! Version types
//!
//! A Version is one generated implementation of a Tool. The source text of a
//! version never changes after creation; only its lifecycle state moves.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::audit::AuditVerdict;
use super::execution::ExecutionResult;

/// Lifecycle state of a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionState {
    Candidate,
    Verified,
    Audited,
    Active,
    Rejected,
    Superseded,
}

impl VersionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionState::Candidate => "candidate",
            VersionState::Verified => "verified",
            VersionState::Audited => "audited",
            VersionState::Active => "active",
            VersionState::Rejected => "rejected",
            VersionState::Superseded => "superseded",
        }
    }
}

impl std::fmt::Display for VersionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which generator mode produced a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratedBy {
    Build,
    Fix,
}

impl std::fmt::Display for GeneratedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeneratedBy::Build => f.write_str("build"),
            GeneratedBy::Fix => f.write_str("fix"),
        }
    }
}

/// One generated implementation of a tool, with its current lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    /// `<tool>@<sequence>`
    pub id: String,
    pub tool: String,
    pub sequence: u64,
    pub source: String,
    /// SHA-256 of `source`, hex encoded
    pub digest: String,
    pub generated_by: GeneratedBy,
    pub created_at: i64,
    pub state: VersionState,
    pub verification: Option<ExecutionResult>,
    pub audit: Option<AuditVerdict>,
}

impl Version {
    pub fn is_active(&self) -> bool {
        self.state == VersionState::Active
    }

    pub fn summary(&self) -> VersionSummary {
        VersionSummary {
            id: self.id.clone(),
            sequence: self.sequence,
            state: self.state,
            generated_by: self.generated_by,
            created_at: self.created_at,
            digest: self.digest.clone(),
            verification: self.verification.as_ref().map(|r| r.summary()),
            audit_findings: self.audit.as_ref().map(|a| a.findings.clone()).unwrap_or_default(),
        }
    }
}

/// Read-only view of a version for history listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub id: String,
    pub sequence: u64,
    pub state: VersionState,
    pub generated_by: GeneratedBy,
    pub created_at: i64,
    pub digest: String,
    pub verification: Option<String>,
    pub audit_findings: Vec<String>,
}

/// Hex SHA-256 digest of source text
pub fn source_digest(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}
