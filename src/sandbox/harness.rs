//! Python harness that loads a candidate and calls its entry point
//!
//! Every driver writes the candidate as `tool.py` next to `harness.py` and
//! runs `python3 harness.py tool.py <entry_point> <args-json>`. The harness
//! prints the JSON-encoded return value as the last line of stdout.

use std::path::Path;

use crate::domain::Invocation;
use crate::error::Result;

pub const HARNESS_FILE: &str = "harness.py";
pub const TOOL_FILE: &str = "tool.py";

/// Cap on captured stdout/stderr, per stream
pub const MAX_OUTPUT_BYTES: usize = 32 * 1024;

pub const HARNESS_SOURCE: &str = r#"import importlib.util
import json
import sys

def main():
    path, entry, args = sys.argv[1], sys.argv[2], json.loads(sys.argv[3])
    spec = importlib.util.spec_from_file_location("tool", path)
    module = importlib.util.module_from_spec(spec)
    spec.loader.exec_module(module)
    fn = getattr(module, entry, None)
    if not callable(fn):
        sys.stderr.write("entry point %r is not defined\n" % entry)
        sys.exit(2)
    result = fn(**args)
    sys.stdout.write("\n" + json.dumps(result, default=str) + "\n")

if __name__ == "__main__":
    main()
"#;

/// Write the harness and candidate into a working directory
pub fn write_files(dir: &Path, source: &str) -> Result<()> {
    std::fs::write(dir.join(HARNESS_FILE), HARNESS_SOURCE)?;
    std::fs::write(dir.join(TOOL_FILE), source)?;
    Ok(())
}

/// Arguments after the interpreter, relative to the working directory
pub fn harness_args(invocation: &Invocation) -> Vec<String> {
    vec![
        HARNESS_FILE.to_string(),
        TOOL_FILE.to_string(),
        invocation.entry_point.clone(),
        invocation.args_json(),
    ]
}

/// JSON value printed by the harness, if the run got that far
pub fn result_value(stdout: &str) -> Option<serde_json::Value> {
    stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| serde_json::from_str(l).ok())
}

/// Lossy UTF-8 with a byte cap on a char boundary
pub fn capture(bytes: &[u8]) -> String {
    let mut s = String::from_utf8_lossy(bytes).into_owned();
    if s.len() > MAX_OUTPUT_BYTES {
        let mut end = MAX_OUTPUT_BYTES;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
        s.push_str("\n[output truncated]");
    }
    s
}
