//! Audit gate: last review before promotion
//!
//! A static screen over the added lines runs first; if it finds anything the
//! candidate is rejected without a reviewer call. Otherwise a single LLM
//! review of the diff decides. The reviewer answers `APPROVED:` or
//! `REJECTED:` followed by its findings, one per line.

pub mod screen;

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::domain::AuditVerdict;
use crate::error::{AnvilError, Result};
use crate::llm::{CompletionRequest, LlmClient};

pub use screen::{added_lines, unified_diff};

const AUDIT_SYSTEM_PROMPT: &str = "You are a security-focused code reviewer for generated tool \
implementations. You give binary APPROVED/REJECTED verdicts with specific findings.";

/// Review gate contract
#[async_trait]
pub trait AuditGate: Send + Sync {
    /// Review the candidate against the active source (if any)
    ///
    /// `Err(AuditUnavailable)` means no verdict could be obtained.
    async fn review(&self, prior_source: Option<&str>, candidate: &str, intent: &str) -> Result<AuditVerdict>;
}

/// Static screen plus one reviewer call
pub struct LlmAuditGate {
    llm: Arc<dyn LlmClient>,
    allowed_hosts: Vec<String>,
    max_tokens: u32,
}

impl std::fmt::Debug for LlmAuditGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAuditGate")
            .field("model", &self.llm.model())
            .field("allowed_hosts", &self.allowed_hosts)
            .finish()
    }
}

impl LlmAuditGate {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            allowed_hosts: Vec::new(),
            max_tokens: 800,
        }
    }

    /// Hosts that generated code may contact
    pub fn with_allowed_hosts(mut self, hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_prompt(&self, prior: Option<&str>, candidate: &str, intent: &str) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format!("Declared intent: {}\n\n", intent));

        if prior.is_some() {
            prompt.push_str("Review this change to the active implementation:\n\n```diff\n");
            prompt.push_str(&unified_diff(prior, candidate));
            prompt.push_str("```\n\n");
        } else {
            prompt.push_str("Review this new implementation:\n\n```python\n");
            prompt.push_str(candidate);
            prompt.push_str("\n```\n\n");
        }

        if !self.allowed_hosts.is_empty() {
            prompt.push_str(&format!("Declared network hosts: {}\n\n", self.allowed_hosts.join(", ")));
        }

        prompt.push_str(
            "Reject if the code:\n\
             1. Calls network hosts other than the declared ones\n\
             2. Deletes or overwrites files, or runs shell commands\n\
             3. Leaks credentials or environment variables\n\
             4. Does something materially different from the declared intent\n\n\
             Respond with `APPROVED:` or `REJECTED:` on the first line, followed by \
             one finding per line.",
        );
        prompt
    }
}

/// Parse the reviewer's reply; anything unrecognizable is a rejection
pub fn parse_verdict(response: &str) -> AuditVerdict {
    let text = response.trim();
    let (head, rest) = text.split_once('\n').unwrap_or((text, ""));
    let head = head.trim().trim_start_matches(['*', '#', ' ']);

    let upper = head.to_ascii_uppercase();
    let (approved, first) = if upper.starts_with("APPROVED") {
        (true, &head["APPROVED".len()..])
    } else if upper.starts_with("REJECTED") {
        (false, &head["REJECTED".len()..])
    } else if upper.starts_with("NEEDS REVIEW") {
        (false, &head["NEEDS REVIEW".len()..])
    } else {
        return AuditVerdict::rejected(vec![format!("unrecognized audit response: {}", head)]);
    };

    let findings: Vec<String> = std::iter::once(first)
        .chain(rest.lines())
        .map(|l| l.trim().trim_start_matches([':', '*']).trim_start_matches("- ").trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();

    if approved {
        AuditVerdict::approved(findings)
    } else {
        AuditVerdict::rejected(findings)
    }
}

#[async_trait]
impl AuditGate for LlmAuditGate {
    async fn review(&self, prior_source: Option<&str>, candidate: &str, intent: &str) -> Result<AuditVerdict> {
        let findings = screen::screen(prior_source, candidate, &self.allowed_hosts);
        if !findings.is_empty() {
            warn!("Static screen rejected candidate: {}", findings.join("; "));
            return Ok(AuditVerdict::rejected(findings));
        }

        let request = CompletionRequest::new(AUDIT_SYSTEM_PROMPT)
            .with_user_message(self.build_prompt(prior_source, candidate, intent))
            .with_max_tokens(self.max_tokens)
            .with_temperature(0.0);

        debug!("Requesting audit review ({} bytes of candidate)", candidate.len());
        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| AnvilError::AuditUnavailable(e.to_string()))?;

        let verdict = parse_verdict(&response.content);
        info!(
            "Audit {}: {} finding(s)",
            if verdict.is_approved() { "approved" } else { "rejected" },
            verdict.findings.len()
        );
        Ok(verdict)
    }
}
