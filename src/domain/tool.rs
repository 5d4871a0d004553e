//! Tool record and related types
//!
//! A Tool is a named capability backed by generated source code. The record
//! holds the declared contract and the health status; the implementations
//! themselves live in the version log.

use serde::{Deserialize, Serialize};

use super::signature::Signature;
use crate::id::now_ms;
use crate::storage::HasId;

/// A named capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Unique key; stored as the record ID
    #[serde(rename = "id")]
    pub name: String,

    /// Human-readable description of the desired behaviour
    pub intent: String,

    /// Declared invocation contract
    pub signature: Signature,

    pub status: ToolStatus,

    /// Deactivated tools keep their history but accept no new versions
    #[serde(default)]
    pub deactivated: bool,

    pub created_at: i64,
    pub updated_at: i64,
}

/// Health of a tool as seen by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Active version is believed to work
    Healthy,
    /// A failure was reported and not (yet) repaired
    Degraded,
    /// A pipeline run is in flight
    Repairing,
    /// Escalated to an operator, or unusable with no active version
    Failed,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Healthy => "healthy",
            ToolStatus::Degraded => "degraded",
            ToolStatus::Repairing => "repairing",
            ToolStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Tool {
    /// Create a freshly registered tool
    ///
    /// New tools start `Degraded`: they have no working implementation yet.
    pub fn new(name: impl Into<String>, intent: impl Into<String>, signature: Signature) -> Self {
        let now = now_ms();
        Self {
            name: name.into(),
            intent: intent.into(),
            signature,
            status: ToolStatus::Degraded,
            deactivated: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a registration request matches this tool's declared contract
    pub fn same_contract(&self, intent: &str, signature: &Signature) -> bool {
        self.intent == intent && &self.signature == signature
    }
}

impl HasId for Tool {
    fn id(&self) -> &str {
        &self.name
    }
}
