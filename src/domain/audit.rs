//! Review gate verdicts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditDecision {
    Approved,
    Rejected,
}

/// Outcome of one audit pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditVerdict {
    pub decision: AuditDecision,
    /// Ordered human-readable concerns
    pub findings: Vec<String>,
    pub reviewed_at: DateTime<Utc>,
}

impl AuditVerdict {
    pub fn approved(findings: Vec<String>) -> Self {
        Self {
            decision: AuditDecision::Approved,
            findings,
            reviewed_at: Utc::now(),
        }
    }

    pub fn rejected(findings: Vec<String>) -> Self {
        Self {
            decision: AuditDecision::Rejected,
            findings,
            reviewed_at: Utc::now(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.decision == AuditDecision::Approved
    }
}
