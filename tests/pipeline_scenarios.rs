//! End-to-end pipeline scenarios
//!
//! Drives the public intake API with a scripted oracle and reviewer and a
//! fake sandbox driver.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anvil::domain::{RunMode, RunOutcome, Stage, ToolStatus, VersionState};
use anvil::error::AnvilError;
use anvil::llm::MockLlmClient;
use anvil::sandbox::{RemoteConfig, RemoteDriver, SandboxExecutor};

use common::*;

const HARDCODED_WEATHER: &str =
    "```python\nimport urllib.request\n\ndef run(city):\n    url = 'https://wttr.in/London?format=j1'\n    return 14.0\n```";

const GOOD_WEATHER: &str = "```python\ndef run(city):\n    return float(len(city))\n```";

/// Scenario A: a hardcoded literal fails the parameterization check twice
#[tokio::test]
async fn test_hardcoded_build_aborts_without_active_version() {
    let h = harness(MockLlmClient::new(vec![HARDCODED_WEATHER]), approve(), inspecting_sandbox());

    let run_id = h
        .pipeline
        .request_build("weather", "fetch current temperature for a city", &weather_sig())
        .unwrap();
    let run = h.pipeline.wait(&run_id).await.unwrap();

    assert_eq!(run.outcome, Some(RunOutcome::Aborted));
    assert_eq!(run.stages_completed, vec![Stage::Generating]);
    assert!(run.detail.unwrap().contains("never used"));
    assert_eq!(h.oracle.call_count(), 2);
    assert_eq!(h.reviewer.call_count(), 0);

    let amended = h.oracle.requests()[1].last_user_message().unwrap().to_string();
    assert!(amended.contains("REJECTED"));

    assert!(matches!(
        h.pipeline.store().get_active("weather"),
        Err(AnvilError::NoActiveVersion(_))
    ));
    assert!(h.pipeline.history("weather").unwrap().is_empty());
    assert_eq!(h.pipeline.tool_status("weather").unwrap().status, ToolStatus::Failed);
}

/// Scenario B: a Fix run promotes v4 over v3
#[tokio::test]
async fn test_fix_run_promotes_next_version() {
    let oracle = MockLlmClient::new((1..=4).map(stock_reply).collect::<Vec<_>>());
    let h = harness(oracle, approve(), inspecting_sandbox());
    let p = &h.pipeline;

    let run = p.wait(&p.request_build("stock", "latest share price", &stock_sig()).unwrap()).await.unwrap();
    assert_eq!(run.outcome, Some(RunOutcome::Deployed));
    for _ in 0..2 {
        let run = p.wait(&p.report_failure("stock", "KeyError: 'price'").unwrap()).await.unwrap();
        assert_eq!(run.outcome, Some(RunOutcome::Deployed));
    }
    assert_eq!(p.store().active_sequence("stock").unwrap(), Some(3));

    let trace = "ConnectionError: HTTPSConnectionPool(host='quotes.example.com'): Max retries exceeded";
    let run = p.wait(&p.report_failure("stock", trace).unwrap()).await.unwrap();

    assert_eq!(run.mode, RunMode::Fix);
    assert_eq!(run.outcome, Some(RunOutcome::Deployed));
    assert_eq!(run.candidate_sequence, Some(4));
    assert_eq!(
        run.stages_completed,
        vec![Stage::Generating, Stage::Verifying, Stage::Auditing, Stage::Promoting]
    );

    let active = p.store().get_active("stock").unwrap();
    assert_eq!(active.sequence, 4);
    assert!(active.source.contains("quote * 4"));

    let history = p.history("stock").unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[2].state, VersionState::Superseded);
    assert_eq!(history[3].state, VersionState::Active);
    assert_eq!(history.iter().filter(|v| v.state == VersionState::Active).count(), 1);

    let fix_prompt = h.oracle.requests().last().unwrap().last_user_message().unwrap().to_string();
    assert!(fix_prompt.contains("Max retries exceeded"));
    assert!(fix_prompt.contains("quote * 3"));

    let status = p.tool_status("stock").unwrap();
    assert_eq!(status.status, ToolStatus::Healthy);
    assert_eq!(status.active_sequence, Some(4));
    assert_eq!(status.last_run_outcome, Some(RunOutcome::Deployed));
}

/// Scenario C: a second signal during generation joins the in-flight run
#[tokio::test]
async fn test_burst_of_failures_coalesces() {
    let oracle = MockLlmClient::new(vec![stock_reply(1), stock_reply(2)]).with_delay(Duration::from_millis(200));
    let h = harness(oracle, approve(), inspecting_sandbox());
    let p = &h.pipeline;

    p.wait(&p.request_build("stock", "latest share price", &stock_sig()).unwrap()).await.unwrap();
    assert_eq!(h.oracle.call_count(), 1);

    let first = p.report_failure("stock", "ConnectionError: refused").unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = p.report_failure("stock", "ConnectionError: refused").unwrap();
    assert_eq!(first, second);
    assert_eq!(p.active_runs().len(), 1);

    let run = p.wait(&first).await.unwrap();
    assert_eq!(run.coalesced, 1);
    assert_eq!(h.oracle.call_count(), 2);
    assert_eq!(p.runs("stock").unwrap().len(), 2);
}

/// Scenario D: an unavailable remote driver falls through to the next one
#[tokio::test]
async fn test_sandbox_falls_through_to_local() {
    let remote = RemoteDriver::new(RemoteConfig::default().with_api_key_env("ANVIL_IT_NO_SUCH_KEY"));
    let local = InspectingDriver::new("local");
    let sandbox = SandboxExecutor::default()
        .with_driver(Arc::new(remote))
        .with_driver(local.clone());
    let h = harness(MockLlmClient::new(vec![GOOD_WEATHER]), approve(), sandbox);

    let run_id = h
        .pipeline
        .request_build("weather", "fetch current temperature for a city", &weather_sig())
        .unwrap();
    let run = h.pipeline.wait(&run_id).await.unwrap();

    assert_eq!(run.outcome, Some(RunOutcome::Deployed));
    assert_eq!(local.call_count(), 1);
    let verification = h.pipeline.store().get_active("weather").unwrap().verification.unwrap();
    assert!(verification.is_success());
    assert_eq!(verification.driver, "local");
}

/// Audit rejection of a Fix candidate leaves the active source untouched
#[tokio::test]
async fn test_audit_rejection_keeps_active_source() {
    let reviewer = MockLlmClient::new(vec![
        "APPROVED: fine",
        "REJECTED:\n- reads API keys from the environment and logs them",
    ]);
    let oracle = MockLlmClient::new(vec![stock_reply(1), stock_reply(2)]);
    let h = harness(oracle, reviewer, inspecting_sandbox());
    let p = &h.pipeline;

    p.wait(&p.request_build("stock", "latest share price", &stock_sig()).unwrap()).await.unwrap();
    let before = p.store().get_active("stock").unwrap().source;

    let run = p.wait(&p.report_failure("stock", "TimeoutError").unwrap()).await.unwrap();

    assert_eq!(run.outcome, Some(RunOutcome::RolledBack));
    assert_eq!(p.store().get_active("stock").unwrap().source, before);

    let history = p.history("stock").unwrap();
    assert_eq!(history[1].state, VersionState::Rejected);
    assert_eq!(history[1].audit_findings, vec!["reads API keys from the environment and logs them"]);
    assert_eq!(p.tool_status("stock").unwrap().status, ToolStatus::Degraded);
}

/// Destructive additions are rejected before the reviewer is asked
#[tokio::test]
async fn test_static_screen_blocks_destructive_candidate() {
    let destructive = "```python\nimport shutil\n\ndef run(symbol):\n    shutil.rmtree('/var/cache/quotes')\n    return float(len(symbol))\n```";
    let oracle = MockLlmClient::new(vec![stock_reply(1), destructive.to_string()]);
    let h = harness(oracle, approve(), inspecting_sandbox());
    let p = &h.pipeline;

    p.wait(&p.request_build("stock", "latest share price", &stock_sig()).unwrap()).await.unwrap();
    assert_eq!(h.reviewer.call_count(), 1);

    let run = p.wait(&p.report_failure("stock", "IOError").unwrap()).await.unwrap();
    assert_eq!(run.outcome, Some(RunOutcome::RolledBack));
    assert_eq!(h.reviewer.call_count(), 1);
    assert_eq!(p.store().active_sequence("stock").unwrap(), Some(1));
}

/// A candidate that fails in the sandbox is rejected and never audited
#[tokio::test]
async fn test_broken_candidate_is_rejected() {
    let broken = "```python\ndef run(symbol):\n    raise ConnectionError(symbol)\n```";
    let oracle = MockLlmClient::new(vec![stock_reply(1), broken.to_string()]);
    let h = harness(oracle, approve(), inspecting_sandbox());
    let p = &h.pipeline;

    p.wait(&p.request_build("stock", "latest share price", &stock_sig()).unwrap()).await.unwrap();
    let run = p.wait(&p.report_failure("stock", "ValueError").unwrap()).await.unwrap();

    assert_eq!(run.outcome, Some(RunOutcome::Aborted));
    assert!(run.detail.unwrap().starts_with("verification failed"));
    assert_eq!(h.reviewer.call_count(), 1);

    let v2 = p.store().get_version_by_sequence("stock", 2).unwrap();
    assert_eq!(v2.state, VersionState::Rejected);
    assert!(!v2.verification.unwrap().is_success());
    assert_eq!(p.store().active_sequence("stock").unwrap(), Some(1));
}

/// Oracle outages are retried a bounded number of times
#[tokio::test]
async fn test_oracle_outage_aborts_after_three_attempts() {
    let h = harness(
        MockLlmClient::default().then_unavailable("503 Service Unavailable"),
        approve(),
        inspecting_sandbox(),
    );

    let run_id = h
        .pipeline
        .request_build("weather", "fetch current temperature for a city", &weather_sig())
        .unwrap();
    let run = h.pipeline.wait(&run_id).await.unwrap();

    assert_eq!(run.outcome, Some(RunOutcome::Aborted));
    assert!(run.detail.unwrap().contains("3 attempts"));
    assert_eq!(h.oracle.call_count(), 3);
}

/// An unreachable reviewer aborts the run instead of promoting or rolling back
#[tokio::test]
async fn test_unreachable_audit_gate_aborts() {
    let h = harness(
        MockLlmClient::new(vec![GOOD_WEATHER]),
        MockLlmClient::default().then_unavailable("connection reset"),
        inspecting_sandbox(),
    );

    let run_id = h
        .pipeline
        .request_build("weather", "fetch current temperature for a city", &weather_sig())
        .unwrap();
    let run = h.pipeline.wait(&run_id).await.unwrap();

    assert_eq!(run.outcome, Some(RunOutcome::Aborted));
    assert_eq!(h.pipeline.history("weather").unwrap()[0].state, VersionState::Rejected);
    assert!(h.pipeline.store().active_sequence("weather").unwrap().is_none());
}

/// A tool deactivated mid-run finishes without promoting anything
#[tokio::test]
async fn test_deactivation_during_run() {
    let oracle = MockLlmClient::new(vec![GOOD_WEATHER]).with_delay(Duration::from_millis(150));
    let h = harness(oracle, approve(), inspecting_sandbox());
    let p = &h.pipeline;

    let run_id = p
        .request_build("weather", "fetch current temperature for a city", &weather_sig())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    p.store().deactivate("weather").unwrap();

    let run = p.wait(&run_id).await.unwrap();
    assert_eq!(run.outcome, Some(RunOutcome::Aborted));
    assert!(p.history("weather").unwrap().is_empty());

    // Identical re-registration reactivates the tool
    let run = p
        .wait(&p.request_build("weather", "fetch current temperature for a city", &weather_sig()).unwrap())
        .await
        .unwrap();
    assert_eq!(run.outcome, Some(RunOutcome::Deployed));
}

/// Health check on a broken active version starts a Fix run
#[tokio::test]
async fn test_failed_check_starts_repair() {
    let broken = "```python\ndef run(city):\n    raise KeyError(city)\n```";
    let oracle = MockLlmClient::new(vec![GOOD_WEATHER.to_string()]);
    let h = harness(oracle, approve(), inspecting_sandbox());
    let p = &h.pipeline;
    p.wait(&p.request_build("weather", "fetch current temperature for a city", &weather_sig()).unwrap())
        .await
        .unwrap();

    let check = p.check("weather").await.unwrap();
    assert!(check.result.is_success());
    assert!(check.repair_run.is_none());

    // Put a broken version in place by hand
    let v2 = p.store().append_candidate("weather", &anvil::generator::extract_code(broken), anvil::domain::GeneratedBy::Fix).unwrap();
    p.store().mark_verified(&v2.id, anvil::domain::ExecutionResult::success("", 1)).unwrap();
    p.store()
        .mark_audited(&v2.id, anvil::domain::AuditVerdict::approved(vec![]))
        .unwrap();
    p.store().promote(&v2.id).unwrap();

    let check = p.check("weather").await.unwrap();
    assert!(!check.result.is_success());
    let run = p.wait(&check.repair_run.unwrap()).await.unwrap();
    assert_eq!(run.mode, RunMode::Fix);
    assert!(run.trigger.unwrap().contains("runtime error"));
    assert_eq!(run.outcome, Some(RunOutcome::Deployed));
    assert_eq!(p.store().active_sequence("weather").unwrap(), Some(3));
}
