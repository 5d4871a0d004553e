//! Prompt contracts for the code-generating oracle

use crate::domain::Signature;

/// System prompt shared by build and fix requests
pub const SYSTEM_PROMPT: &str = "You write small, self-contained Python tools. \
Reply with exactly one ```python code block and nothing else. \
The code must define the entry point function with exactly the parameters given, \
use every parameter, and never hardcode values that a parameter supplies. \
Only the Python standard library is available. Return JSON-serialisable values.";

fn contract(intent: &str, signature: &Signature) -> String {
    let params = signature.param_names().join(", ");
    let mut prompt = String::new();
    prompt.push_str("## Intent\n");
    prompt.push_str(intent.trim());
    prompt.push_str("\n\n## Contract\n");
    prompt.push_str(&format!("Signature: {}\n", signature));
    prompt.push_str(&format!("Entry point: def {}({}):\n", signature.entry_point, params));
    for p in &signature.params {
        prompt.push_str(&format!("- `{}` ({}) is supplied by the caller\n", p.name, p.ty.as_str()));
    }
    prompt
}

/// Prompt for a brand-new implementation
pub fn build_prompt(intent: &str, signature: &Signature) -> String {
    let mut prompt = contract(intent, signature);
    prompt.push_str("\nWrite the implementation.\n");
    prompt
}

/// Prompt for repairing an implementation that failed at runtime
pub fn fix_prompt(intent: &str, signature: &Signature, prior_source: &str, failure_trace: &str) -> String {
    let mut prompt = contract(intent, signature);
    prompt.push_str("\n## Current implementation (BROKEN)\n```python\n");
    prompt.push_str(prior_source.trim_end());
    prompt.push_str("\n```\n\n## Failure\n```\n");
    prompt.push_str(failure_trace.trim_end());
    prompt.push_str("\n```\n\nFix the implementation so the failure cannot recur. Keep the same contract.\n");
    prompt
}

/// Follow-up prompt after a candidate failed the structural checks
pub fn amend_prompt(original: &str, rejected_source: &str, violations: &[String]) -> String {
    let mut prompt = String::from(original);
    prompt.push_str("\n## Previous attempt (REJECTED - fix these issues)\n");
    for v in violations {
        prompt.push_str(&format!("- {}\n", v));
    }
    prompt.push_str("\n```python\n");
    prompt.push_str(rejected_source.trim_end());
    prompt.push_str("\n```\n\n");
    prompt.push_str("Every value that a parameter supplies MUST come from that parameter. ");
    prompt.push_str("Do NOT hardcode it and do NOT repeat the same mistakes.\n");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig() -> Signature {
        Signature::parse("(city: string) -> number").unwrap()
    }

    #[test]
    fn test_build_prompt_states_contract() {
        let p = build_prompt("fetch current temperature for a city", &sig());
        assert!(p.contains("fetch current temperature for a city"));
        assert!(p.contains("def run(city):"));
        assert!(p.contains("(city: string) -> number"));
    }

    #[test]
    fn test_fix_prompt_carries_trace_and_source() {
        let p = fix_prompt("x", &sig(), "def run(city):\n    boom()\n", "NameError: boom");
        assert!(p.contains("boom()"));
        assert!(p.contains("NameError: boom"));
        assert!(p.contains("BROKEN"));
    }

    #[test]
    fn test_amend_prompt_lists_violations() {
        let p = amend_prompt("base", "def run(city):\n    return 1\n", &["parameter `city` is never used".into()]);
        assert!(p.starts_with("base"));
        assert!(p.contains("parameter `city` is never used"));
        assert!(p.contains("REJECTED"));
    }
}
