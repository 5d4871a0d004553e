//! Static screen over the lines a candidate adds
//!
//! Cheap pattern checks that run before the reviewer call. Anything found
//! here rejects the candidate outright.

use regex::Regex;
use similar::{ChangeTag, TextDiff};

/// Patterns that destroy files or shell out
const UNSAFE_PATTERNS: &[(&str, &str)] = &[
    (r"shutil\.rmtree\s*\(", "destructive filesystem operation: shutil.rmtree"),
    (r"os\.(remove|unlink|rmdir|removedirs)\s*\(", "destructive filesystem operation: os file removal"),
    (r"\.unlink\s*\(", "destructive filesystem operation: Path.unlink"),
    (r"\brm\s+-[a-zA-Z]*[rf][a-zA-Z]*\b", "destructive shell command: rm"),
    (r"os\.(system|popen)\s*\(", "shell command execution"),
    (r"\bsubprocess\.", "subprocess execution"),
    (r"\b(eval|exec)\s*\(", "dynamic code execution"),
];

/// Unified diff of prior against candidate (or the whole candidate as added)
pub fn unified_diff(prior: Option<&str>, candidate: &str) -> String {
    let old = prior.unwrap_or("");
    TextDiff::from_lines(old, candidate)
        .unified_diff()
        .context_radius(3)
        .header("active", "candidate")
        .to_string()
}

/// Lines present in the candidate but not in the prior source
pub fn added_lines(prior: Option<&str>, candidate: &str) -> Vec<String> {
    let old = prior.unwrap_or("");
    TextDiff::from_lines(old, candidate)
        .iter_all_changes()
        .filter(|c| c.tag() == ChangeTag::Insert)
        .map(|c| c.value().trim_end().to_string())
        .collect()
}

/// Hostnames referenced by URL literals
pub fn referenced_hosts(text: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r#"https?://([A-Za-z0-9.-]+)"#) else {
        return Vec::new();
    };
    let mut hosts: Vec<String> = re
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('.').to_ascii_lowercase())
        .collect();
    hosts.dedup();
    hosts
}

fn host_allowed(host: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|a| {
        let a = a.to_ascii_lowercase();
        host == a || host.ends_with(&format!(".{}", a))
    })
}

/// Findings for unsafe additions
///
/// Hosts already referenced by the prior source count as declared. Host
/// checks only apply when an allow-list is configured.
pub fn screen(prior: Option<&str>, candidate: &str, allowed_hosts: &[String]) -> Vec<String> {
    let added = added_lines(prior, candidate);
    let mut findings = Vec::new();

    for (pattern, label) in UNSAFE_PATTERNS {
        let Ok(re) = Regex::new(pattern) else { continue };
        if let Some(line) = added.iter().find(|l| !l.trim_start().starts_with('#') && re.is_match(l)) {
            findings.push(format!("{} (`{}`)", label, line.trim()));
        }
    }

    if !allowed_hosts.is_empty() {
        let mut declared: Vec<String> = allowed_hosts.to_vec();
        if let Some(prior) = prior {
            declared.extend(referenced_hosts(prior));
        }
        let mut seen = Vec::new();
        for host in referenced_hosts(&added.join("\n")) {
            if !host_allowed(&host, &declared) && !seen.contains(&host) {
                findings.push(format!("network call to undeclared host `{}`", host));
                seen.push(host);
            }
        }
    }

    findings
}
