use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anvil::PipelineConfig;
use anvil::llm::AnthropicConfig;
use anvil::sandbox::{DockerConfig, LocalConfig, RemoteConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub llm: LlmConfig,
    pub pipeline: PipelineSection,
    pub sandbox: SandboxConfig,
    pub audit: AuditConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            timeout_ms: 120000,
        }
    }
}

impl LlmConfig {
    pub fn to_anthropic(&self) -> AnthropicConfig {
        AnthropicConfig::with_model(&self.model)
            .with_max_tokens(self.max_tokens)
            .with_timeout(Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub max_generation_attempts: u32,
    pub backoff_base_ms: u64,
    pub generation_timeout_ms: u64,
    pub audit_timeout_ms: u64,
    pub sandbox_timeout_ms: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            max_generation_attempts: defaults.max_generation_attempts,
            backoff_base_ms: defaults.backoff_base_ms,
            generation_timeout_ms: defaults.generation_timeout_ms,
            audit_timeout_ms: defaults.audit_timeout_ms,
            sandbox_timeout_ms: defaults.sandbox_timeout_ms,
        }
    }
}

impl PipelineSection {
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_max_generation_attempts(self.max_generation_attempts)
            .with_backoff_base_ms(self.backoff_base_ms)
            .with_generation_timeout_ms(self.generation_timeout_ms)
            .with_audit_timeout_ms(self.audit_timeout_ms)
            .with_sandbox_timeout_ms(self.sandbox_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Driver names, most isolated first
    pub priority: Vec<String>,
    pub python: String,
    pub docker_image: String,
    pub remote_url: String,
    pub remote_api_key_env: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let remote = RemoteConfig::default();
        Self {
            priority: vec!["remote".to_string(), "docker".to_string(), "local".to_string()],
            python: LocalConfig::default().python,
            docker_image: DockerConfig::default().image,
            remote_url: remote.base_url,
            remote_api_key_env: remote.api_key_env,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Hosts generated code may contact; empty disables the host check
    pub allowed_hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("anvil")
                .join("store"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            llm: LlmConfig::default(),
            pipeline: PipelineSection::default(),
            sandbox: SandboxConfig::default(),
            audit: AuditConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
