//! Readiness checks behind the `task-agent-health` binary.

use std::fmt;

use tracing::error;

use crate::config::AgentConfig;
use crate::helpers::load_gemini_keys;
use crate::llm::GenerationClient;
use crate::task::TaskStore;

#[derive(Clone, Debug, PartialEq)]
pub struct HealthReport {
    pub checks: Vec<(&'static str, bool)>,
}

impl HealthReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|(_, passed)| *passed)
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all_passed() {
            return write!(f, "All health checks passed");
        }
        write!(f, "Health checks failed:")?;
        for (name, passed) in &self.checks {
            let mark = if *passed { "ok" } else { "FAILED" };
            write!(f, "\n  [{}] {}", mark, name)?;
        }
        Ok(())
    }
}

pub fn check_directories(store: &TaskStore) -> bool {
    let missing = store.missing_dirs();
    for dir in &missing {
        error!(directory = %dir.display(), "required directory missing");
    }
    missing.is_empty()
}

pub fn check_environment(config: &AgentConfig) -> bool {
    let configured = !load_gemini_keys(&config.gemini_api_key).is_empty();
    if !configured {
        error!("no Gemini API key configured");
    }
    configured
}

pub async fn check_remote_api(client: Option<&dyn GenerationClient>) -> bool {
    match client {
        Some(client) => {
            let healthy = client.health_check().await;
            client.close().await;
            healthy
        }
        None => false,
    }
}

/// Runs every check; the remote check fails outright without a client.
pub async fn run_checks(config: &AgentConfig, client: Option<&dyn GenerationClient>) -> HealthReport {
    let store = TaskStore::new(&config.data_root, &config.logs_dir);
    HealthReport {
        checks: vec![
            ("directories", check_directories(&store)),
            ("environment", check_environment(config)),
            ("gemini_api", check_remote_api(client).await),
        ],
    }
}
