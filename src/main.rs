use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;
mod config;

use anvil::audit::LlmAuditGate;
use anvil::domain::{PipelineRun, RunOutcome, Signature, ToolStatus, VersionState};
use anvil::generator::OracleGenerator;
use anvil::llm::{AnthropicClient, LlmClient, MockLlmClient};
use anvil::sandbox::{
    DockerConfig, DockerDriver, LocalConfig, LocalDriver, RemoteConfig, RemoteDriver, SandboxDriver,
    SandboxExecutor,
};
use anvil::store::VersionStore;
use anvil::Pipeline;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("anvil")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("anvil.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Drivers in configured priority order
fn build_sandbox(config: &Config) -> Result<SandboxExecutor> {
    let mut drivers: Vec<Arc<dyn SandboxDriver>> = Vec::new();
    for name in &config.sandbox.priority {
        let driver: Arc<dyn SandboxDriver> = match name.as_str() {
            "remote" => Arc::new(RemoteDriver::new(
                RemoteConfig::default()
                    .with_base_url(&config.sandbox.remote_url)
                    .with_api_key_env(&config.sandbox.remote_api_key_env),
            )),
            "docker" => Arc::new(DockerDriver::new(
                DockerConfig::default().with_image(&config.sandbox.docker_image),
            )),
            "local" => Arc::new(LocalDriver::new(LocalConfig::default().with_python(&config.sandbox.python))),
            other => return Err(eyre!("Unknown sandbox driver in config: {}", other)),
        };
        drivers.push(driver);
    }
    Ok(SandboxExecutor::new(drivers))
}

/// Wire the pipeline from config
///
/// Read-only commands never reach the oracle, so they get an offline client
/// and do not require an API key.
fn build_pipeline(config: &Config, needs_oracle: bool) -> Result<Arc<Pipeline>> {
    let store = VersionStore::open(&config.storage.data_dir)
        .context(format!("Failed to open store at {}", config.storage.data_dir.display()))?;

    let llm: Arc<dyn LlmClient> = if needs_oracle {
        Arc::new(AnthropicClient::new(config.llm.to_anthropic()).context("Failed to create LLM client")?)
    } else {
        Arc::new(MockLlmClient::default())
    };

    let generator = OracleGenerator::new(Arc::clone(&llm)).with_max_tokens(config.llm.max_tokens);
    let audit = LlmAuditGate::new(llm).with_allowed_hosts(config.audit.allowed_hosts.clone());

    Ok(Arc::new(Pipeline::with_config(
        Arc::new(store),
        Arc::new(generator),
        Arc::new(build_sandbox(config)?),
        Arc::new(audit),
        config.pipeline.to_pipeline_config(),
    )))
}

fn colored_status(status: ToolStatus) -> ColoredString {
    match status {
        ToolStatus::Healthy => status.as_str().green(),
        ToolStatus::Degraded => status.as_str().yellow(),
        ToolStatus::Repairing => status.as_str().cyan(),
        ToolStatus::Failed => status.as_str().red(),
    }
}

fn colored_state(state: VersionState) -> ColoredString {
    match state {
        VersionState::Active => state.as_str().green().bold(),
        VersionState::Rejected => state.as_str().red(),
        VersionState::Superseded => state.as_str().dimmed(),
        _ => state.as_str().normal(),
    }
}

fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn print_run(run: &PipelineRun) {
    let outcome = match run.outcome {
        Some(RunOutcome::Deployed) => "deployed".green(),
        Some(RunOutcome::RolledBack) => "rolled_back".yellow(),
        Some(RunOutcome::Aborted) => "aborted".red(),
        None => "in flight".cyan(),
    };
    let stages: Vec<String> = run
        .stages_completed
        .iter()
        .map(|s| format!("{:?}", s).to_lowercase())
        .collect();
    println!(
        "{} {} {} [{}] {}",
        run.id.bold(),
        run.mode,
        outcome,
        stages.join(" > "),
        format_ms(run.started_at).dimmed()
    );
    if let Some(detail) = &run.detail {
        println!("    {}", detail);
    }
    if run.coalesced > 0 {
        println!("    {} signal(s) coalesced", run.coalesced);
    }
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Build { tool, intent, signature } => handle_build(tool, intent, signature, config).await,
        Commands::Report { tool, trace } => handle_report(tool, trace, config).await,
        Commands::Status { tool } => handle_status(tool, config),
        Commands::History { tool } => handle_history(tool, config),
        Commands::Show { tool, seq } => handle_show(tool, *seq, config),
        Commands::List => handle_list(config),
        Commands::Runs { tool } => handle_runs(tool, config),
        Commands::Check { tool } => handle_check(tool, config).await,
        Commands::Rollback { tool, seq } => handle_rollback(tool, *seq, config),
        Commands::Deactivate { tool } => handle_deactivate(tool, config),
        Commands::Doctor => handle_doctor(config).await,
    }
}

async fn handle_build(tool: &str, intent: &str, signature: &str, config: &Config) -> Result<()> {
    let signature = Signature::parse(signature)?;
    let pipeline = build_pipeline(config, true)?;

    println!("{} {} {}", "Building:".green(), tool.bold(), signature);
    let run_id = pipeline.request_build(tool, intent, &signature)?;
    let run = pipeline.wait(&run_id).await?;
    print_run(&run);
    Ok(())
}

async fn handle_report(tool: &str, trace: &str, config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config, true)?;

    println!("{} {}", "Repairing:".yellow(), tool.bold());
    let run_id = pipeline.report_failure(tool, trace)?;
    let run = pipeline.wait(&run_id).await?;
    print_run(&run);
    Ok(())
}

fn handle_status(tool: &str, config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config, false)?;
    let report = pipeline.tool_status(tool)?;

    println!("{} {}", report.tool.bold(), colored_status(report.status));
    match report.active_sequence {
        Some(seq) => println!("  active version: {}", seq),
        None => println!("  active version: {}", "none".dimmed()),
    }
    if let Some(outcome) = report.last_run_outcome {
        println!("  last run: {}", outcome);
    }
    if let Some(ts) = report.last_run_timestamp {
        println!("  last run at: {}", format_ms(ts));
    }
    Ok(())
}

fn handle_history(tool: &str, config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config, false)?;
    for version in pipeline.history(tool)? {
        println!(
            "{:>4}  {:<10} {:<6} {}  {}",
            version.sequence,
            colored_state(version.state),
            version.generated_by,
            &version.digest[..12.min(version.digest.len())],
            format_ms(version.created_at).dimmed()
        );
        if let Some(verification) = &version.verification {
            println!("        verify: {}", verification);
        }
        for finding in &version.audit_findings {
            println!("        audit: {}", finding);
        }
    }
    Ok(())
}

fn handle_show(tool: &str, seq: Option<u64>, config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config, false)?;
    let version = match seq {
        Some(seq) => pipeline.store().get_version_by_sequence(tool, seq)?,
        None => pipeline.store().get_active(tool)?,
    };
    println!("# {} ({})", version.id, version.state);
    println!("{}", version.source);
    Ok(())
}

fn handle_list(config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config, false)?;
    let tools = pipeline.store().list_tools()?;
    if tools.is_empty() {
        println!("{}", "No tools registered".dimmed());
        return Ok(());
    }

    for tool in &tools {
        let active = pipeline
            .store()
            .active_sequence(&tool.name)?
            .map(|s| format!("v{}", s))
            .unwrap_or_else(|| "-".to_string());
        let name = if tool.deactivated {
            tool.name.dimmed()
        } else {
            tool.name.bold()
        };
        println!("{:<20} {:<10} {:<5} {}", name, colored_status(tool.status), active, tool.signature);
    }

    let stats = pipeline.stats()?;
    let summary: Vec<String> = [
        ToolStatus::Healthy,
        ToolStatus::Degraded,
        ToolStatus::Repairing,
        ToolStatus::Failed,
    ]
    .iter()
    .map(|s| format!("{} {}", stats.get(s).copied().unwrap_or(0), s))
    .collect();
    println!("\n{}", summary.join(", "));
    Ok(())
}

fn handle_runs(tool: &str, config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config, false)?;
    let runs = pipeline.runs(tool)?;
    if runs.is_empty() {
        println!("{}", "No runs recorded".dimmed());
    }
    for run in &runs {
        print_run(run);
    }
    Ok(())
}

async fn handle_check(tool: &str, config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config, true)?;
    let check = pipeline.check(tool).await?;

    if check.result.is_success() {
        println!("{} {} ({})", "Healthy:".green(), tool.bold(), check.result.summary());
        return Ok(());
    }

    println!("{} {} {}", "Broken:".red(), tool.bold(), check.result.summary());
    if let Some(run_id) = check.repair_run {
        let run = pipeline.wait(&run_id).await?;
        print_run(&run);
    }
    Ok(())
}

fn handle_rollback(tool: &str, seq: u64, config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config, false)?;
    let restored = pipeline.restore(tool, seq)?;
    println!("{} {} is now active", "Restored:".green(), restored.id.bold());
    Ok(())
}

fn handle_deactivate(tool: &str, config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config, false)?;
    pipeline.store().deactivate(tool)?;
    println!("{} {}", "Deactivated:".yellow(), tool.bold());
    Ok(())
}

async fn handle_doctor(config: &Config) -> Result<()> {
    let sandbox = build_sandbox(config)?;
    println!("{}", "Sandbox drivers (priority order):".bold());
    let statuses = sandbox.probe().await;
    for status in &statuses {
        let mark = if status.available { "ok".green() } else { "unavailable".red() };
        println!("  {:<8} {}", status.name, mark);
    }
    if !statuses.iter().any(|s| s.available) {
        println!("{}", "No sandbox driver is usable; candidates cannot be verified".red());
    }

    let key = if std::env::var("ANTHROPIC_API_KEY").is_ok() {
        "set".green()
    } else {
        "missing".red()
    };
    println!("{} ANTHROPIC_API_KEY {}", "Oracle:".bold(), key);
    println!("{} {}", "Store:".bold(), config.storage.data_dir.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
