//! ID generation utilities for Anvil
//!
//! Provides functions for generating identifiers for pipeline runs, versions
//! and sandbox resources.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a unique pipeline run ID
///
/// Format: `run-{timestamp_ms}-{random_hex}`
/// Example: `run-1738300800123-a1b2`
pub fn generate_run_id() -> String {
    let random: u16 = rand::rng().random();
    format!("run-{}-{:04x}", now_ms(), random)
}

/// Version ID for a tool's nth generated implementation
///
/// Format: `{tool}@{sequence}`
/// Example: `stock@4`
pub fn version_id(tool: &str, sequence: u64) -> String {
    format!("{}@{}", tool, sequence)
}

/// Generate a name for an ephemeral sandbox resource (container, VM)
///
/// Format: `anvil-{random_hex}`
pub fn generate_sandbox_name() -> String {
    let random: u32 = rand::rng().random();
    format!("anvil-{:08x}", random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        assert!(ts > 1577836800000); // 2020-01-01
        assert!(ts < 4102444800000); // 2100-01-01
    }

    #[test]
    fn test_generate_run_id_format() {
        let id = generate_run_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "run");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_version_id_format() {
        assert_eq!(version_id("stock", 4), "stock@4");
    }

    #[test]
    fn test_sandbox_name_format() {
        let name = generate_sandbox_name();
        assert!(name.starts_with("anvil-"));
        assert_eq!(name.len(), "anvil-".len() + 8);
    }
}
