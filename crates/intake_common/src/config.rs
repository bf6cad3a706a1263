//! Configuration management for Intake.
//!
//! Loads settings from a TOML file or uses defaults. Lookup order:
//! explicit path, `$INTAKE_CONFIG`, `/etc/intake/config.toml`, defaults.

use crate::error::{IntakeError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// System config file path
pub const CONFIG_PATH: &str = "/etc/intake/config.toml";

/// Environment variable that points at an alternate config file
pub const CONFIG_ENV: &str = "INTAKE_CONFIG";

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Hard limit for one HTTP request, including the whole analysis run
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:7870".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

/// Headroom the request timeout must leave after the run deadline for report synthesis
pub const REQUEST_TIMEOUT_MARGIN_SECS: u64 = 10;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Where ingestion snapshots and CVs live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_cv_dir")]
    pub cv_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/intake/data")
}

fn default_cv_dir() -> PathBuf {
    PathBuf::from("/var/lib/intake/data/datasource_cvs")
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cv_dir: default_cv_dir(),
        }
    }
}

/// Chat backend flavour for the reasoning oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleBackend {
    Ollama,
    Openai,
    /// No oracle: every run uses the deterministic pipeline
    Disabled,
}

/// Reasoning oracle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_backend")]
    pub backend: OracleBackend,

    #[serde(default = "default_oracle_url")]
    pub url: String,

    #[serde(default = "default_oracle_model")]
    pub model: String,

    /// Name of the environment variable holding the API key (never the key itself)
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,

    /// Retries for transient failures before the focused source is marked inconclusive
    #[serde(default = "default_oracle_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    #[serde(default)]
    pub temperature: f32,

    /// USD per million prompt tokens
    #[serde(default = "default_input_price")]
    pub input_price_per_mtok: f64,

    /// USD per million completion tokens
    #[serde(default = "default_output_price")]
    pub output_price_per_mtok: f64,
}

fn default_backend() -> OracleBackend {
    OracleBackend::Ollama
}

fn default_oracle_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_oracle_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_oracle_timeout() -> u64 {
    30
}

fn default_oracle_retries() -> u32 {
    2
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_input_price() -> f64 {
    0.15
}

fn default_output_price() -> f64 {
    0.60
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_oracle_url(),
            model: default_oracle_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_oracle_timeout(),
            max_retries: default_oracle_retries(),
            retry_backoff_ms: default_retry_backoff(),
            temperature: 0.0,
            input_price_per_mtok: default_input_price(),
            output_price_per_mtok: default_output_price(),
        }
    }
}

impl OracleConfig {
    /// Cost in USD for the given token counts
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1_000_000.0) * self.input_price_per_mtok
            + (completion_tokens as f64 / 1_000_000.0) * self.output_price_per_mtok
    }
}

/// Reasoning loop budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Oracle proposals allowed across the whole run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Oracle proposals allowed while focused on a single source
    #[serde(default = "default_max_steps_per_source")]
    pub max_steps_per_source: usize,

    /// Overall deadline for one run
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

fn default_max_iterations() -> usize {
    24
}

fn default_max_steps_per_source() -> usize {
    6
}

fn default_run_timeout() -> u64 {
    120
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_steps_per_source: default_max_steps_per_source(),
            run_timeout_secs: default_run_timeout(),
        }
    }
}

/// Defaults for CV-scoped detector thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold_pct: f64,

    #[serde(default = "default_late_tolerance")]
    pub late_tolerance_minutes: i64,
}

fn default_volume_threshold() -> f64 {
    crate::cv::DEFAULT_VOLUME_THRESHOLD_PCT
}

fn default_late_tolerance() -> i64 {
    crate::cv::DEFAULT_LATE_TOLERANCE_MINUTES
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            volume_threshold_pct: default_volume_threshold(),
            late_tolerance_minutes: default_late_tolerance(),
        }
    }
}

/// Holidays applied as approved exceptions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Dates that are holidays for every source
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,

    /// Extra holidays per source id
    #[serde(default)]
    pub sources: BTreeMap<String, SourceCalendar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceCalendar {
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntakeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
}

impl IntakeConfig {
    /// Load configuration, falling back to defaults when no file exists.
    /// An explicit path that does not exist is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }

        if let Ok(from_env) = std::env::var(CONFIG_ENV) {
            return Self::load_file(Path::new(&from_env));
        }

        let system = Path::new(CONFIG_PATH);
        if system.exists() {
            return Self::load_file(system);
        }

        warn!("[!]  No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IntakeError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| IntakeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.agent.max_iterations == 0 {
            return Err(IntakeError::Config(
                "agent.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.detection.volume_threshold_pct < 0.0 {
            return Err(IntakeError::Config(
                "detection.volume_threshold_pct must not be negative".to_string(),
            ));
        }
        let needed = self.agent.run_timeout_secs.saturating_add(REQUEST_TIMEOUT_MARGIN_SECS);
        if self.server.request_timeout_secs < needed {
            return Err(IntakeError::Config(format!(
                "server.request_timeout_secs ({}) must be at least agent.run_timeout_secs + {} ({})",
                self.server.request_timeout_secs, REQUEST_TIMEOUT_MARGIN_SECS, needed
            )));
        }
        Ok(())
    }
}
