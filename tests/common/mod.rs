//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anvil::audit::LlmAuditGate;
use anvil::domain::{ExecutionResult, Invocation, Signature};
use anvil::error::Result;
use anvil::generator::OracleGenerator;
use anvil::llm::MockLlmClient;
use anvil::sandbox::{SandboxDriver, SandboxExecutor};
use anvil::store::VersionStore;
use anvil::{Pipeline, PipelineConfig};
use tempfile::TempDir;

/// Sandbox driver that "runs" source by inspecting it
///
/// Source containing `raise` fails with a runtime error; anything else
/// succeeds.
pub struct InspectingDriver {
    name: &'static str,
    available: bool,
    pub calls: AtomicUsize,
}

impl InspectingDriver {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            available: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn unavailable(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            available: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SandboxDriver for InspectingDriver {
    fn name(&self) -> &str {
        self.name
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn execute(&self, source: &str, _: &Invocation, _: Duration) -> Result<ExecutionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if source.contains("raise") {
            Ok(ExecutionResult::runtime_error("", "Traceback: RuntimeError", 2))
        } else {
            Ok(ExecutionResult::success("\n1.0\n", 2))
        }
    }
}

/// Pieces of a wired pipeline kept around for assertions
pub struct Harness {
    pub dir: TempDir,
    pub oracle: Arc<MockLlmClient>,
    pub reviewer: Arc<MockLlmClient>,
    pub pipeline: Arc<Pipeline>,
}

/// Wire a pipeline over a fresh store with scripted oracle and reviewer
pub fn harness(oracle: MockLlmClient, reviewer: MockLlmClient, sandbox: SandboxExecutor) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(VersionStore::open(dir.path()).unwrap());
    let pipeline = wire(store, oracle, reviewer, sandbox);
    Harness {
        dir,
        oracle: pipeline.0,
        reviewer: pipeline.1,
        pipeline: pipeline.2,
    }
}

/// Wire a pipeline over an existing store
pub fn wire(
    store: Arc<VersionStore>,
    oracle: MockLlmClient,
    reviewer: MockLlmClient,
    sandbox: SandboxExecutor,
) -> (Arc<MockLlmClient>, Arc<MockLlmClient>, Arc<Pipeline>) {
    let oracle = Arc::new(oracle);
    let reviewer = Arc::new(reviewer);
    let pipeline = Pipeline::with_config(
        store,
        Arc::new(OracleGenerator::new(oracle.clone())),
        Arc::new(sandbox),
        Arc::new(LlmAuditGate::new(reviewer.clone())),
        PipelineConfig::default().with_backoff_base_ms(1),
    );
    (oracle, reviewer, Arc::new(pipeline))
}

pub fn inspecting_sandbox() -> SandboxExecutor {
    SandboxExecutor::default().with_driver(InspectingDriver::new("fake"))
}

pub fn weather_sig() -> Signature {
    Signature::parse("(city: string) -> number").unwrap()
}

pub fn stock_sig() -> Signature {
    Signature::parse("(symbol: string) -> number").unwrap()
}

/// Oracle reply holding a stock implementation tagged with `n`
pub fn stock_reply(n: u32) -> String {
    format!(
        "```python\ndef run(symbol):\n    quote = lookup(symbol)\n    return quote * {}\n\ndef lookup(symbol):\n    return float(len(symbol))\n```",
        n
    )
}

pub fn approve() -> MockLlmClient {
    MockLlmClient::new(vec!["APPROVED: no concerns"])
}
