use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use task_agent_rs::llm::{
    CompletionRequest, GeminiClient, LLMResponse, ProviderAdapter, ProviderError, RetryPolicy,
};
use task_agent_rs::{Agent, AgentConfig, AgentState};

/// Answers every request with the last user message, upper-cased.
/// With `refuse_health` set, the health-check greeting is rejected.
#[derive(Default)]
struct ShoutingAdapter {
    calls: AtomicUsize,
    health_probes: AtomicUsize,
    refuse_health: bool,
}

impl ShoutingAdapter {
    fn refusing_health() -> Self {
        Self {
            refuse_health: true,
            ..Self::default()
        }
    }

    fn health_probes(&self) -> usize {
        self.health_probes.load(Ordering::SeqCst)
    }
}

impl ProviderAdapter for ShoutingAdapter {
    fn complete(&self, request: CompletionRequest) -> Result<LLMResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let last = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if last == "Task: Hi" {
            self.health_probes.fetch_add(1, Ordering::SeqCst);
            if self.refuse_health {
                return Err(ProviderError::new("api_error", "service unavailable", false));
            }
        }
        Ok(LLMResponse {
            content: last.to_uppercase(),
            finish_reason: Some("STOP".to_string()),
            safety_ratings: Vec::new(),
            raw: None,
        })
    }
}

fn config(temp_dir: &TempDir) -> AgentConfig {
    AgentConfig {
        gemini_api_key: "test-key".to_string(),
        data_root: temp_dir.path().join("data"),
        logs_dir: temp_dir.path().join("logs"),
        poll_interval_ms: 50,
        error_backoff_ms: 100,
        health_check_interval: 3600,
        ..AgentConfig::default()
    }
}

fn build_agent(temp_dir: &TempDir, adapter: Arc<ShoutingAdapter>) -> Arc<Agent> {
    build_agent_with(config(temp_dir), adapter)
}

fn build_agent_with(config: AgentConfig, adapter: Arc<ShoutingAdapter>) -> Arc<Agent> {
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    };
    let client = GeminiClient::new(adapter, "gemini-test", retry);
    Arc::new(Agent::new("it-agent", config, Arc::new(client)))
}

async fn wait_for(path: &Path) -> bool {
    for _ in 0..200 {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn backlog_and_live_files_are_processed_then_shutdown_is_clean() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("data/input");
    let output = temp_dir.path().join("data/output");
    let processed = temp_dir.path().join("data/processed");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::write(
        input.join("t1.json"),
        r#"{"id":"t1","task":"hello","type":"general"}"#,
    )
    .unwrap();
    std::fs::write(input.join("broken.json"), "{ nope").unwrap();

    let adapter = Arc::new(ShoutingAdapter::default());
    let agent = build_agent(&temp_dir, adapter.clone());
    let runner = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.run().await })
    };

    assert!(wait_for(&output.join("t1_result.json")).await, "backlog task not processed");
    let envelope = read_json(&output.join("t1_result.json"));
    assert_eq!(envelope["status"], "completed");
    assert_eq!(envelope["result"]["model"], "gemini-test");
    assert!(envelope["result"]["response"].as_str().unwrap().contains("TASK: HELLO"));
    assert!(processed.join("t1.json").exists());
    assert!(!input.join("t1.json").exists());

    // A file written while the loop is running arrives through the watcher.
    let staging = temp_dir.path().join("t2.json");
    std::fs::write(
        &staging,
        r#"{"id":"t2","task":"weekly numbers","type":"analysis","priority":"high"}"#,
    )
    .unwrap();
    std::fs::rename(&staging, input.join("t2.json")).unwrap();

    assert!(wait_for(&output.join("t2_result.json")).await, "live task not processed");
    let envelope = read_json(&output.join("t2_result.json"));
    let response = envelope["result"]["response"].as_str().unwrap();
    assert!(response.contains("- PRIORITY: HIGH"));
    assert!(response.contains("ANALYSIS TASK: WEEKLY NUMBERS"));

    agent.shutdown_handle().shutdown();
    runner.await.unwrap().unwrap();

    assert_eq!(agent.state(), AgentState::Stopped);
    assert!(input.join("broken.json").exists());
    assert!(!output.join("broken_result.json").exists());
    assert_eq!(std::fs::read_dir(&output).unwrap().count(), 2);
}

#[tokio::test]
async fn startup_creates_the_directory_layout() {
    let temp_dir = TempDir::new().unwrap();
    let agent = build_agent(&temp_dir, Arc::new(ShoutingAdapter::default()));
    agent.shutdown_handle().shutdown();
    agent.run().await.unwrap();

    for dir in ["data/input", "data/output", "data/processed", "data/temp", "logs"] {
        assert!(temp_dir.path().join(dir).is_dir(), "{dir} missing");
    }
}

#[tokio::test]
async fn file_written_after_creation_is_processed_once_complete() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("data/input");
    let output = temp_dir.path().join("data/output");
    let processed = temp_dir.path().join("data/processed");

    let agent = build_agent(&temp_dir, Arc::new(ShoutingAdapter::default()));
    let runner = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.run().await })
    };
    assert!(wait_until(|| agent.state() == AgentState::Running).await);

    // The empty file is seen first and cannot be parsed yet.
    let path = input.join("slow.json");
    std::fs::File::create(&path).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    std::fs::write(&path, r#"{"id":"slow","task":"hi","type":"general"}"#).unwrap();

    assert!(wait_for(&output.join("slow_result.json")).await, "completed file left in input/");
    assert_eq!(read_json(&output.join("slow_result.json"))["status"], "completed");
    assert!(wait_for(&processed.join("slow.json")).await);
    assert!(!path.exists());

    agent.shutdown_handle().shutdown();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn loop_survives_failed_health_and_disk_checks() {
    let temp_dir = TempDir::new().unwrap();
    let data = temp_dir.path().join("data");
    let config = AgentConfig {
        health_check_interval: 0,
        ..config(&temp_dir)
    };
    let adapter = Arc::new(ShoutingAdapter::refusing_health());
    let agent = build_agent_with(config, adapter.clone());
    let runner = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.run().await })
    };

    // An unhealthy API only warns; the loop keeps checking.
    assert!(wait_until(|| adapter.health_probes() >= 3).await, "health checks stopped");
    assert_eq!(agent.state(), AgentState::Running);

    // Without the data root the disk check errors and the loop backs off.
    std::fs::remove_dir_all(&data).unwrap();
    let probes = adapter.health_probes();
    assert!(
        wait_until(|| adapter.health_probes() >= probes + 3).await,
        "loop stopped after a failed iteration"
    );
    assert!(!runner.is_finished());
    assert_eq!(agent.state(), AgentState::Running);

    // Work queued after the failures is still handled.
    for dir in ["input", "output", "processed"] {
        std::fs::create_dir_all(data.join(dir)).unwrap();
    }
    let path = data.join("input/late.json");
    std::fs::write(&path, r#"{"id":"late","task":"still here","type":"general"}"#).unwrap();
    agent.bridge().submit(path.clone());

    let result = data.join("output/late_result.json");
    assert!(wait_for(&result).await, "task after failed iterations not processed");
    assert_eq!(read_json(&result)["status"], "completed");
    assert!(data.join("processed/late.json").exists());

    agent.shutdown_handle().shutdown();
    runner.await.unwrap().unwrap();
    assert_eq!(agent.state(), AgentState::Stopped);
}
