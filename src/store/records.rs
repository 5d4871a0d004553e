//! Persisted record shapes for the version store.
//!
//! A version is split across two collections: the immutable
//! [`VersionRecord`] (append-only, never rewritten) and its mutable
//! [`Lifecycle`]. The [`ActivePointer`] table maps each tool to its single
//! active version.

use serde::{Deserialize, Serialize};

use crate::domain::{AuditVerdict, ExecutionResult, GeneratedBy, Version, VersionState};
use crate::storage::HasId;

pub const TOOLS: &str = "tools";
pub const VERSIONS: &str = "versions";
pub const LIFECYCLE: &str = "lifecycle";
pub const ACTIVE: &str = "active";

/// Immutable part of a version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: String,
    pub tool: String,
    pub sequence: u64,
    pub source: String,
    pub digest: String,
    pub generated_by: GeneratedBy,
    pub created_at: i64,
}

impl HasId for VersionRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Mutable lifecycle of a version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lifecycle {
    pub id: String,
    pub tool: String,
    pub state: VersionState,
    pub verification: Option<ExecutionResult>,
    pub audit: Option<AuditVerdict>,
    pub updated_at: i64,
}

impl HasId for Lifecycle {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Tool name to active version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivePointer {
    /// Tool name
    pub id: String,
    pub version_id: String,
    pub sequence: u64,
    pub updated_at: i64,
}

impl HasId for ActivePointer {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Join the two halves into the public view
pub fn assemble(record: VersionRecord, lifecycle: Lifecycle) -> Version {
    Version {
        id: record.id,
        tool: record.tool,
        sequence: record.sequence,
        source: record.source,
        digest: record.digest,
        generated_by: record.generated_by,
        created_at: record.created_at,
        state: lifecycle.state,
        verification: lifecycle.verification,
        audit: lifecycle.audit,
    }
}
