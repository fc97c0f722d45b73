use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::bridge::DispatchBridge;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::llm::GenerationClient;
use crate::task::{ResultEnvelope, TaskDispatcher, TaskStore};
use crate::watcher::TaskWatcher;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentState {
    Stopped,
    Starting,
    Running,
    ShuttingDown,
}

/// Cloneable request to stop the agent loop, usable from signal handlers.
#[derive(Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    async fn notified(&self) {
        self.wake.notified().await;
    }
}

/// What happened to one task file.
#[derive(Clone, Debug, PartialEq)]
pub enum ProcessOutcome {
    /// Result written to the given path and the source archived.
    Completed(PathBuf),
    /// The file was gone by the time it was picked up.
    Skipped,
    /// Unreadable, malformed or failed mid-way; the source stays in `input/`.
    Abandoned,
}

enum Wake {
    Tick,
    Work,
    Shutdown,
}

pub struct Agent {
    pub name: String,
    pub config: AgentConfig,
    store: Arc<TaskStore>,
    client: Arc<dyn GenerationClient>,
    dispatcher: TaskDispatcher,
    bridge: Arc<DispatchBridge>,
    shutdown: ShutdownHandle,
    state: Mutex<AgentState>,
    watcher: Mutex<Option<TaskWatcher>>,
}

impl Agent {
    pub fn new(name: &str, config: AgentConfig, client: Arc<dyn GenerationClient>) -> Self {
        let resolved_name = if name.is_empty() { "agent" } else { name };
        let store = Arc::new(TaskStore::new(&config.data_root, &config.logs_dir));
        let dispatcher = TaskDispatcher::new(Arc::clone(&client), Arc::clone(&store));
        Self {
            name: resolved_name.to_string(),
            config,
            store,
            client,
            dispatcher,
            bridge: Arc::new(DispatchBridge::new()),
            shutdown: ShutdownHandle::default(),
            state: Mutex::new(AgentState::Stopped),
            watcher: Mutex::new(None),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn bridge(&self) -> Arc<DispatchBridge> {
        Arc::clone(&self.bridge)
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn state(&self) -> AgentState {
        self.state.lock().map(|state| *state).unwrap_or(AgentState::Stopped)
    }

    fn set_state(&self, next: AgentState) {
        if let Ok(mut state) = self.state.lock() {
            debug!(from = ?*state, to = ?next, "agent state change");
            *state = next;
        }
    }

    /// Runs the agent until shutdown is requested.
    ///
    /// Shutdown (watcher stop, client release) runs on every exit path,
    /// including a failed start.
    pub async fn run(&self) -> Result<(), AgentError> {
        let span = info_span!("agent", name = %self.name);
        async {
            let outcome = self.serve().await;
            if let Err(err) = &outcome {
                error!(error = %err, "agent failed");
            }
            self.shut_down().await;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn serve(&self) -> Result<(), AgentError> {
        self.start().await?;
        self.main_loop().await;
        Ok(())
    }

    async fn start(&self) -> Result<(), AgentError> {
        self.set_state(AgentState::Starting);
        info!("starting agent");

        self.store.ensure_layout().await?;
        let watcher = TaskWatcher::start(&self.store.input_dir(), Arc::clone(&self.bridge))?;
        if let Ok(mut slot) = self.watcher.lock() {
            *slot = Some(watcher);
        }
        self.bridge.set_live(true);

        let backlog = self.store.pending_files().await?;
        if !backlog.is_empty() {
            info!(count = backlog.len(), "replaying existing task files");
        }
        for path in backlog {
            self.bridge.submit(path);
        }
        self.drain().await;

        self.set_state(AgentState::Running);
        Ok(())
    }

    async fn main_loop(&self) {
        info!("agent main loop started");
        let health_period = self.config.health_check_period();
        let mut next_health = Instant::now();

        while !self.shutdown.is_requested() {
            let pause = match self.iteration(&mut next_health, health_period).await {
                Ok(()) => self.config.poll_interval(),
                Err(err) => {
                    error!(error = %err, "error in main loop");
                    self.config.error_backoff()
                }
            };
            match self.pause(pause).await {
                Wake::Tick | Wake::Work => {}
                Wake::Shutdown => debug!("shutdown requested"),
            }
        }
    }

    async fn iteration(&self, next_health: &mut Instant, period: Duration) -> Result<(), AgentError> {
        self.drain().await;
        if Instant::now() >= *next_health {
            *next_health = Instant::now() + period;
            self.health_check().await?;
        }
        Ok(())
    }

    async fn pause(&self, duration: Duration) -> Wake {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Wake::Tick,
            _ = self.bridge.notified() => Wake::Work,
            _ = self.shutdown.notified() => Wake::Shutdown,
        }
    }

    /// Processes every queued path, oldest first. Stops early on shutdown.
    pub async fn drain(&self) -> usize {
        let mut handled = 0;
        while !self.shutdown.is_requested() {
            let Some(path) = self.bridge.take() else {
                break;
            };
            self.process_task_file(&path).await;
            handled += 1;
        }
        handled
    }

    /// Remote API reachability plus disk capacity. Failures only warn.
    pub async fn health_check(&self) -> Result<(), AgentError> {
        if !self.client.health_check().await {
            warn!("remote API health check failed");
        }

        let usage = self.store.disk_usage()?;
        let percent = usage.used_percent();
        if percent > self.config.disk_usage_warn_percent {
            warn!(usage_percent = percent, "low disk space");
        }
        Ok(())
    }

    /// Loads, dispatches, records and archives one task file. Never fails.
    pub async fn process_task_file(&self, path: &Path) -> ProcessOutcome {
        let span = info_span!("task", path = %path.display());
        async {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                debug!("task file no longer present, skipping");
                return ProcessOutcome::Skipped;
            }
            match self.try_process(path).await {
                Ok(output) => ProcessOutcome::Completed(output),
                Err(err) => {
                    error!(error = %err, "error processing task file");
                    ProcessOutcome::Abandoned
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn try_process(&self, path: &Path) -> Result<PathBuf, AgentError> {
        info!("processing task file");
        let task = self.store.load_task(path).await?;
        let result = self.dispatcher.execute(&task).await;

        let envelope = ResultEnvelope::new(task, result);
        let output = self.store.write_result(&envelope).await?;
        info!(output_file = %output.display(), "task result saved");

        self.store.archive(path).await?;
        info!(task_id = %envelope.task_id, status = ?envelope.status, "task completed");
        Ok(output)
    }

    async fn shut_down(&self) {
        self.set_state(AgentState::ShuttingDown);
        info!("shutting down agent");
        self.bridge.set_live(false);

        let watcher = self.watcher.lock().ok().and_then(|mut slot| slot.take());
        if let Some(mut watcher) = watcher {
            watcher.stop();
        }
        self.client.close().await;

        self.set_state(AgentState::Stopped);
        info!("agent shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::PromptContext;
    use crate::result::TaskResult;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    #[derive(Default)]
    struct StubClient {
        healthy: bool,
        generations: AtomicUsize,
        health_checks: AtomicUsize,
        closed: AtomicBool,
    }

    #[async_trait]
    impl GenerationClient for StubClient {
        async fn generate_response(&self, prompt: &str, _context: Option<PromptContext>) -> TaskResult {
            self.generations.fetch_add(1, Ordering::SeqCst);
            TaskResult {
                success: true,
                response: Some(format!("echo: {prompt}")),
                model: Some("stub".to_string()),
                ..TaskResult::default()
            }
        }

        async fn analyze_file(&self, _path: &Path, _analysis_type: &str) -> TaskResult {
            TaskResult::failure("not supported")
        }

        async fn process_data_task(&self, _description: &str, _file_names: &[String]) -> TaskResult {
            TaskResult::failure("not supported")
        }

        async fn health_check(&self) -> bool {
            self.health_checks.fetch_add(1, Ordering::SeqCst);
            self.healthy
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn agent(temp_dir: &TempDir, client: Arc<StubClient>) -> Agent {
        let config = AgentConfig {
            data_root: temp_dir.path().join("data"),
            logs_dir: temp_dir.path().join("logs"),
            ..AgentConfig::default()
        };
        Agent::new("test-agent", config, client)
    }

    async fn ready(temp_dir: &TempDir, client: Arc<StubClient>) -> Agent {
        let agent = agent(temp_dir, client);
        agent.store().ensure_layout().await.unwrap();
        agent
    }

    #[tokio::test]
    async fn well_formed_file_is_processed_and_archived() {
        let temp_dir = TempDir::new().unwrap();
        let agent = ready(&temp_dir, Arc::new(StubClient::default())).await;
        let source = agent.store().input_dir().join("t1.json");
        std::fs::write(&source, r#"{"id":"t1","task":"hello","type":"general"}"#).unwrap();

        let outcome = agent.process_task_file(&source).await;

        let output = agent.store().output_dir().join("t1_result.json");
        assert_eq!(outcome, ProcessOutcome::Completed(output.clone()));
        assert!(!source.exists());
        assert!(agent.store().processed_dir().join("t1.json").exists());

        let envelope: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(output).unwrap()).unwrap();
        assert_eq!(envelope["status"], "completed");
        assert_eq!(envelope["result"]["response"], "echo: hello");
        assert_eq!(envelope["original_task"]["id"], "t1");
    }

    #[tokio::test]
    async fn malformed_file_is_left_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let client = Arc::new(StubClient::default());
        let agent = ready(&temp_dir, client.clone()).await;
        let source = agent.store().input_dir().join("bad.json");
        std::fs::write(&source, "{ not json").unwrap();

        assert_eq!(agent.process_task_file(&source).await, ProcessOutcome::Abandoned);
        assert_eq!(std::fs::read_to_string(&source).unwrap(), "{ not json");
        assert_eq!(std::fs::read_dir(agent.store().output_dir()).unwrap().count(), 0);
        assert_eq!(client.generations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_required_fields_produce_no_result() {
        let temp_dir = TempDir::new().unwrap();
        let agent = ready(&temp_dir, Arc::new(StubClient::default())).await;
        let source = agent.store().input_dir().join("partial.json");
        std::fs::write(&source, r#"{"id":"p1","task":"hello"}"#).unwrap();

        assert_eq!(agent.process_task_file(&source).await, ProcessOutcome::Abandoned);
        assert!(source.exists());
        assert!(!agent.store().result_path("p1").exists());
    }

    #[tokio::test]
    async fn local_validation_failure_still_archives() {
        let temp_dir = TempDir::new().unwrap();
        let agent = ready(&temp_dir, Arc::new(StubClient::default())).await;
        let source = agent.store().input_dir().join("f1.json");
        std::fs::write(&source, r#"{"id":"f1","task":"inspect","type":"file_analysis"}"#).unwrap();

        let outcome = agent.process_task_file(&source).await;
        assert!(matches!(outcome, ProcessOutcome::Completed(_)));
        assert!(!source.exists());

        let body = std::fs::read_to_string(agent.store().result_path("f1")).unwrap();
        let envelope: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(envelope["status"], "failed");
        assert_eq!(envelope["result"]["success"], false);
    }

    #[tokio::test]
    async fn duplicate_deliveries_produce_one_result() {
        let temp_dir = TempDir::new().unwrap();
        let client = Arc::new(StubClient::default());
        let agent = ready(&temp_dir, client.clone()).await;
        let source = agent.store().input_dir().join("t1.json");
        std::fs::write(&source, r#"{"id":"t1","task":"hello","type":"general"}"#).unwrap();

        // Backlog scan and a late watcher event for the same file.
        let bridge = agent.bridge();
        bridge.submit(source.clone());
        assert_eq!(agent.drain().await, 1);
        bridge.submit(source.clone());
        assert_eq!(agent.drain().await, 1);

        assert_eq!(client.generations.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_dir(agent.store().output_dir()).unwrap().count(), 1);
        assert_eq!(agent.process_task_file(&source).await, ProcessOutcome::Skipped);
    }

    #[tokio::test]
    async fn draining_an_empty_queue_is_a_no_op() {
        let temp_dir = TempDir::new().unwrap();
        let agent = ready(&temp_dir, Arc::new(StubClient::default())).await;
        assert_eq!(agent.drain().await, 0);
        assert_eq!(agent.drain().await, 0);
    }

    #[tokio::test]
    async fn failed_health_check_only_warns() {
        let temp_dir = TempDir::new().unwrap();
        let client = Arc::new(StubClient {
            healthy: false,
            ..StubClient::default()
        });
        let agent = ready(&temp_dir, client.clone()).await;

        assert!(agent.health_check().await.is_ok());
        assert_eq!(client.health_checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_start_still_shuts_down() {
        let temp_dir = TempDir::new().unwrap();
        // A regular file where the data root should be makes layout creation fail.
        std::fs::write(temp_dir.path().join("data"), "occupied").unwrap();
        let client = Arc::new(StubClient::default());
        let agent = agent(&temp_dir, client.clone());

        assert!(agent.run().await.is_err());
        assert_eq!(agent.state(), AgentState::Stopped);
        assert!(client.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn shutdown_before_run_exits_after_startup() {
        let temp_dir = TempDir::new().unwrap();
        let client = Arc::new(StubClient::default());
        let agent = agent(&temp_dir, client.clone());
        std::fs::create_dir_all(temp_dir.path().join("data/input")).unwrap();
        std::fs::write(
            temp_dir.path().join("data/input/t1.json"),
            r#"{"id":"t1","task":"hello","type":"general"}"#,
        )
        .unwrap();

        agent.shutdown_handle().shutdown();
        agent.run().await.unwrap();

        assert_eq!(agent.state(), AgentState::Stopped);
        assert!(client.closed.load(Ordering::SeqCst));
        // Backlog replay stops on shutdown, leaving the file for the next start.
        assert!(temp_dir.path().join("data/input/t1.json").exists());
    }
}
