use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

pub const DEFAULT_CONFIG_FILE: &str = "/app/config/config.yaml";

const ENV_KEYS: [&str; 14] = [
    "GEMINI_API_KEY",
    "GEMINI_MODEL",
    "GEMINI_BASE_URL",
    "GEMINI_TEMPERATURE",
    "GEMINI_TOP_P",
    "GEMINI_TOP_K",
    "GEMINI_MAX_TOKENS",
    "LOG_LEVEL",
    "HEALTH_CHECK_INTERVAL",
    "DATA_ROOT",
    "LOGS_DIR",
    "POLL_INTERVAL_MS",
    "ERROR_BACKOFF_MS",
    "DISK_USAGE_WARN_PERCENT",
];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub gemini_temperature: f64,
    pub gemini_top_p: f64,
    pub gemini_top_k: u32,
    pub gemini_max_tokens: u32,
    pub request_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub log_level: String,
    /// Seconds between health checks of the remote API and the disk.
    pub health_check_interval: u64,
    pub poll_interval_ms: u64,
    pub error_backoff_ms: u64,
    pub data_root: PathBuf,
    pub logs_dir: PathBuf,
    pub disk_usage_warn_percent: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.0-flash-lite".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            gemini_temperature: 0.7,
            gemini_top_p: 0.8,
            gemini_top_k: 40,
            gemini_max_tokens: 2048,
            request_timeout_secs: 60,
            retry_attempts: 3,
            retry_base_delay_ms: 4_000,
            retry_max_delay_ms: 10_000,
            log_level: "info".to_string(),
            health_check_interval: 30,
            poll_interval_ms: 5_000,
            error_backoff_ms: 10_000,
            data_root: PathBuf::from("/app/data"),
            logs_dir: PathBuf::from("/app/logs"),
            disk_usage_warn_percent: 90.0,
        }
    }
}

impl AgentConfig {
    /// Loads defaults, then the YAML file (if present), then the environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self, AgentError> {
        let config: Self = Self::figment(config_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(config_file: Option<&Path>) -> Figment {
        let path = config_file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Yaml::file(path))
            .merge(Env::raw().only(&ENV_KEYS))
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if !(0.0..=1.0).contains(&self.gemini_temperature) {
            return Err(invalid("gemini_temperature", "must be between 0.0 and 1.0"));
        }
        if !(0.0..=1.0).contains(&self.gemini_top_p) {
            return Err(invalid("gemini_top_p", "must be between 0.0 and 1.0"));
        }
        if self.gemini_max_tokens == 0 {
            return Err(invalid("gemini_max_tokens", "must be greater than 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be greater than 0"));
        }
        if self.retry_attempts == 0 {
            return Err(invalid("retry_attempts", "must be at least 1"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Time between health checks, never shorter than one base tick.
    pub fn health_check_period(&self) -> Duration {
        Duration::from_secs(self.health_check_interval).max(self.poll_interval())
    }
}

fn invalid(field: &str, reason: &str) -> AgentError {
    AgentError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
