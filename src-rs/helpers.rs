use std::env;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::agent::ShutdownHandle;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::llm::{GeminiAdapter, GeminiClient, GeminiConfig, RetryPolicy};

const EXTRA_KEY_PREFIX: &str = "GEMINI_API_KEY";

/// Splits the configured key list and appends `GEMINI_API_KEY_2`..`_10`.
pub fn load_gemini_keys(primary: &str) -> Vec<String> {
    let mut keys: Vec<String> = primary
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect();
    for idx in 2..=10 {
        let name = format!("{}_{}", EXTRA_KEY_PREFIX, idx);
        if let Ok(value) = env::var(&name) {
            let trimmed = value.trim();
            if !trimmed.is_empty() && !keys.iter().any(|k| k == trimmed) {
                keys.push(trimmed.to_string());
            }
        }
    }
    keys
}

pub fn retry_policy(cfg: &AgentConfig) -> RetryPolicy {
    RetryPolicy {
        max_attempts: cfg.retry_attempts,
        base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
        max_delay: Duration::from_millis(cfg.retry_max_delay_ms),
    }
}

/// Builds the Gemini-backed client. A missing API key is fatal.
pub fn build_gemini_client(cfg: &AgentConfig) -> Result<GeminiClient, AgentError> {
    let api_keys = load_gemini_keys(&cfg.gemini_api_key);
    if api_keys.is_empty() {
        return Err(AgentError::MissingCredential);
    }
    let adapter = GeminiAdapter::new(GeminiConfig {
        api_keys,
        base_url: cfg.gemini_base_url.clone(),
        model: cfg.gemini_model.clone(),
        temperature: cfg.gemini_temperature,
        top_p: cfg.gemini_top_p,
        top_k: cfg.gemini_top_k,
        max_output_tokens: cfg.gemini_max_tokens,
        timeout: Duration::from_secs(cfg.request_timeout_secs),
    })?;
    let model = adapter.model().to_string();
    Ok(GeminiClient::new(Arc::new(adapter), &model, retry_policy(cfg)))
}

/// Installs the fmt subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(level: &str) -> Result<(), AgentError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.to_lowercase()))
        .map_err(|err| AgentError::InvalidConfig {
            field: "log_level".to_string(),
            reason: err.to_string(),
        })?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|err| AgentError::InvalidConfig {
            field: "log_level".to_string(),
            reason: err.to_string(),
        })
}

/// Requests shutdown on Ctrl-C, and on SIGTERM where available.
pub fn spawn_signal_listener(handle: ShutdownHandle) {
    tokio::spawn(async move {
        wait_for_signal().await;
        handle.shutdown();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(error = %err, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!(signal = "SIGINT", "received shutdown signal");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!(signal = "SIGINT", "received shutdown signal"),
        _ = terminate.recv() => tracing::info!(signal = "SIGTERM", "received shutdown signal"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!(signal = "ctrl-c", "received shutdown signal");
}
