//! Structural checks on generated source
//!
//! These are syntactic, not semantic: the candidate must declare the entry
//! point with exactly the declared parameters, and every parameter must
//! actually flow into the body rather than being replaced by a literal.

use regex::Regex;

use crate::domain::Signature;

/// Pull the code out of an oracle reply
///
/// Prefers a ```python block, then any fenced block, then the whole reply.
pub fn extract_code(response: &str) -> String {
    for marker in ["```python", "```py\n"] {
        if let Some(start) = response.find(marker) {
            let after = start + marker.len();
            if let Some(end) = response[after..].find("```") {
                return response[after..after + end].trim().to_string();
            }
        }
    }

    if let Some(start) = response.find("```") {
        let after = start + 3;
        let content_start = response[after..].find('\n').map(|i| after + i + 1).unwrap_or(after);
        if let Some(end) = response[content_start..].find("```") {
            return response[content_start..content_start + end].trim().to_string();
        }
    }

    response.trim().to_string()
}

/// Parameter names from a Python parameter list, without annotations or defaults
fn parse_param_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let name = p.split([':', '=']).next().unwrap_or(p);
            name.trim().trim_start_matches('*').to_string()
        })
        .collect()
}

/// Check generated source against a signature
///
/// Returns the list of violations; empty means the candidate passes.
pub fn check_source(source: &str, signature: &Signature) -> Vec<String> {
    let mut violations = Vec::new();

    if source.trim().is_empty() {
        violations.push("no code was returned".to_string());
        return violations;
    }

    let entry = regex::escape(&signature.entry_point);
    let def_re = match Regex::new(&format!(r"(?ms)^def\s+{}\s*\((.*?)\)\s*(->[^:]*)?:", entry)) {
        Ok(re) => re,
        Err(e) => {
            violations.push(format!("cannot check entry point: {}", e));
            return violations;
        }
    };

    let expected = signature.param_names();
    let Some(caps) = def_re.captures(source) else {
        violations.push(format!(
            "entry point `def {}({})` is not declared at top level",
            signature.entry_point,
            expected.join(", ")
        ));
        return violations;
    };

    let declared = parse_param_list(caps.get(1).map(|m| m.as_str()).unwrap_or(""));
    if declared != expected {
        violations.push(format!(
            "entry point takes ({}) but the signature declares ({})",
            declared.join(", "),
            expected.join(", ")
        ));
    }

    let body_start = caps.get(0).map(|m| m.end()).unwrap_or(0);
    violations.extend(check_parameterization(&source[body_start..], signature));
    violations
}

/// Flag parameters that are ignored or overwritten with literals
///
/// Either is the signature of a hardcoded value the caller should supply.
pub fn check_parameterization(body: &str, signature: &Signature) -> Vec<String> {
    let mut violations = Vec::new();
    for name in signature.param_names() {
        let escaped = regex::escape(name);
        let used = Regex::new(&format!(r"\b{}\b", escaped))
            .map(|re| re.is_match(body))
            .unwrap_or(true);
        if !used {
            violations.push(format!(
                "parameter `{}` is never used; its value appears to be hardcoded",
                name
            ));
            continue;
        }

        let rebound = Regex::new(&format!(
            r#"(?m)^\s*{}\s*=\s*(["'\d\[{{(-]|True\b|False\b|None\b|f["'])"#,
            escaped
        ))
        .map(|re| re.is_match(body))
        .unwrap_or(false);
        if rebound {
            violations.push(format!("parameter `{}` is overwritten with a literal value", name));
        }
    }
    violations
}
