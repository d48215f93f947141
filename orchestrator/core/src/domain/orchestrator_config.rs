// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Orchestrator Configuration Types
//
// Defines the configuration schema for a Keel orchestrator, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Approval timeout
// - Retry/backoff policy for every external call
// - Rollout policy (apply concurrency, readiness, inconclusive handling)
// - SLO Guard sampling policy
// - Storage backend and catalog sources

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::repository::{PostgresConfig, StorageBackend};

pub const API_VERSION: &str = "keel.dev/v1";
pub const KIND: &str = "OrchestratorConfig";

/// Top-level Kubernetes-style orchestrator configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfigManifest {
    /// API version (must be "keel.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "OrchestratorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: OrchestratorConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfigSpec {
    #[serde(default)]
    pub approval: ApprovalPolicy,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub rollout: RolloutPolicy,

    #[serde(default)]
    pub guard: GuardPolicy,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub catalog: CatalogSources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Undecided records expire after this long
    #[serde(with = "humantime_serde", default = "default_approval_timeout")]
    pub timeout: Duration,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            timeout: default_approval_timeout(),
        }
    }
}

/// Bounded exponential backoff applied to every external call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub initial_backoff: Duration,

    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max_backoff: Duration,

    /// Deadline of a single call; a timeout counts as a transient failure
    #[serde(with = "humantime_serde", default = "default_call_timeout")]
    pub call_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `initial * 2^attempt`,
    /// capped at `max_backoff`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            call_timeout: default_call_timeout(),
        }
    }
}

/// What the controller does when the observation window ends without enough samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InconclusivePolicy {
    #[default]
    Abort,
    Proceed,
}

impl std::str::FromStr for InconclusivePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(InconclusivePolicy::Abort),
            "proceed" => Ok(InconclusivePolicy::Proceed),
            other => Err(format!("expected 'abort' or 'proceed', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutPolicy {
    /// Independent components applied concurrently within one dependency wave
    #[serde(default = "default_apply_concurrency")]
    pub apply_concurrency: usize,

    #[serde(default)]
    pub inconclusive: InconclusivePolicy,

    #[serde(with = "humantime_serde", default = "default_readiness_timeout")]
    pub readiness_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_health_poll_interval")]
    pub health_poll_interval: Duration,

    /// Used when a plan carries no objectives
    #[serde(with = "humantime_serde", default = "default_observation_window")]
    pub default_observation_window: Duration,
}

impl Default for RolloutPolicy {
    fn default() -> Self {
        Self {
            apply_concurrency: default_apply_concurrency(),
            inconclusive: InconclusivePolicy::default(),
            readiness_timeout: default_readiness_timeout(),
            health_poll_interval: default_health_poll_interval(),
            default_observation_window: default_observation_window(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardPolicy {
    #[serde(with = "humantime_serde", default = "default_sample_interval")]
    pub sample_interval: Duration,

    /// Fewer samples than this inside an objective's window is inconclusive
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            sample_interval: default_sample_interval(),
            min_samples: default_min_samples(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageKind,

    /// Supports "env:VAR_NAME" indirection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
}

impl StorageConfig {
    /// Resolve the configured backend, reading `env:` connection strings
    pub fn backend(&self) -> anyhow::Result<StorageBackend> {
        match self.backend {
            StorageKind::InMemory => Ok(StorageBackend::InMemory),
            StorageKind::Postgres => {
                let raw = self
                    .connection_string
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("spec.storage.connection_string is required for postgres"))?;
                let connection_string = match raw.strip_prefix("env:") {
                    Some(var) => std::env::var(var)
                        .map_err(|_| anyhow::anyhow!("Environment variable '{}' is not set", var))?,
                    None => raw.to_string(),
                };
                Ok(StorageBackend::PostgreSQL(PostgresConfig { connection_string }))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSources {
    /// Register the stock templates before any custom ones
    #[serde(default = "default_true")]
    pub include_builtin: bool,

    /// YAML files of additional template definitions
    #[serde(default)]
    pub template_files: Vec<PathBuf>,
}

impl Default for CatalogSources {
    fn default() -> Self {
        Self {
            include_builtin: true,
            template_files: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_approval_timeout() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(500)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_apply_concurrency() -> usize {
    4
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_health_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_observation_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_min_samples() -> u32 {
    5
}

impl Default for OrchestratorConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "keel".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: OrchestratorConfigSpec::default(),
        }
    }
}

impl OrchestratorConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. KEEL_CONFIG_PATH environment variable
    /// 2. ./keel-config.yaml (working directory)
    /// 3. ~/.keel/config.yaml (user home)
    /// 4. /etc/keel/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("KEEL_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./keel-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".keel").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/keel/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("KEEL_APPROVAL_TIMEOUT") {
            match humantime_serde::re::humantime::parse_duration(&val) {
                Ok(timeout) => {
                    tracing::info!("Environment override: KEEL_APPROVAL_TIMEOUT={}", val);
                    self.spec.approval.timeout = timeout;
                }
                Err(e) => tracing::warn!(
                    "Invalid value for KEEL_APPROVAL_TIMEOUT: '{}' ({}). Ignoring.",
                    val,
                    e
                ),
            }
        }

        if let Ok(val) = std::env::var("KEEL_APPLY_CONCURRENCY") {
            match val.parse::<usize>() {
                Ok(n) => {
                    tracing::info!("Environment override: KEEL_APPLY_CONCURRENCY={}", n);
                    self.spec.rollout.apply_concurrency = n;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for KEEL_APPLY_CONCURRENCY: '{}'. Expected a positive integer. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("KEEL_INCONCLUSIVE_POLICY") {
            match val.parse::<InconclusivePolicy>() {
                Ok(policy) => {
                    tracing::info!("Environment override: KEEL_INCONCLUSIVE_POLICY={:?}", policy);
                    self.spec.rollout.inconclusive = policy;
                }
                Err(e) => tracing::warn!("Invalid value for KEEL_INCONCLUSIVE_POLICY: {}. Ignoring.", e),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;
        if spec.approval.timeout.is_zero() {
            anyhow::bail!("spec.approval.timeout must be greater than zero");
        }

        if spec.retry.max_attempts == 0 {
            anyhow::bail!("spec.retry.max_attempts must be at least 1");
        }
        if spec.retry.initial_backoff > spec.retry.max_backoff {
            anyhow::bail!(
                "spec.retry.initial_backoff ({:?}) exceeds max_backoff ({:?})",
                spec.retry.initial_backoff,
                spec.retry.max_backoff
            );
        }
        if spec.retry.call_timeout.is_zero() {
            anyhow::bail!("spec.retry.call_timeout must be greater than zero");
        }

        if spec.rollout.apply_concurrency == 0 {
            anyhow::bail!("spec.rollout.apply_concurrency must be at least 1");
        }
        if spec.rollout.health_poll_interval.is_zero() {
            anyhow::bail!("spec.rollout.health_poll_interval must be greater than zero");
        }

        if spec.guard.sample_interval.is_zero() {
            anyhow::bail!("spec.guard.sample_interval must be greater than zero");
        }
        if spec.guard.min_samples == 0 {
            anyhow::bail!("spec.guard.min_samples must be at least 1");
        }

        if spec.storage.backend == StorageKind::Postgres
            && spec
                .storage
                .connection_string
                .as_deref()
                .map_or(true, str::is_empty)
        {
            anyhow::bail!("spec.storage.connection_string is required for the postgres backend");
        }

        Ok(())
    }
}
