use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tracing::debug;

use super::types::{ResultEnvelope, TaskDescriptor};
use crate::error::AgentError;

/// True for paths whose file name ends in `.json`.
pub fn is_task_file(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "json")
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DiskUsage {
    pub total: u64,
    pub available: u64,
}

impl DiskUsage {
    pub fn used_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let used = self.total.saturating_sub(self.available);
        used as f64 * 100.0 / self.total as f64
    }
}

/// Flat-file task storage rooted at the agent's data directory.
pub struct TaskStore {
    root: PathBuf,
    logs_dir: PathBuf,
}

impl TaskStore {
    pub fn new(root: impl Into<PathBuf>, logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            logs_dir: logs_dir.into(),
        }
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    fn layout(&self) -> [PathBuf; 5] {
        [
            self.input_dir(),
            self.output_dir(),
            self.processed_dir(),
            self.temp_dir(),
            self.logs_dir.clone(),
        ]
    }

    pub async fn ensure_layout(&self) -> Result<(), AgentError> {
        for dir in self.layout() {
            fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Directories the agent needs that do not exist yet. `temp/` is optional.
    pub fn missing_dirs(&self) -> Vec<PathBuf> {
        [
            self.input_dir(),
            self.output_dir(),
            self.processed_dir(),
            self.logs_dir.clone(),
        ]
        .into_iter()
        .filter(|dir| !dir.is_dir())
        .collect()
    }

    /// Task files waiting in `input/`, oldest first (ties broken by name).
    pub async fn pending_files(&self) -> Result<Vec<PathBuf>, AgentError> {
        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        let mut entries = fs::read_dir(self.input_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = entry.metadata().await?;
            if meta.is_file() && is_task_file(&path) {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                found.push((modified, path));
            }
        }
        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    /// Names of the regular files in `input/`, sorted.
    pub async fn input_file_names(&self) -> Result<Vec<String>, AgentError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(self.input_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn load_task(&self, path: &Path) -> Result<TaskDescriptor, AgentError> {
        let bytes = fs::read(path).await?;
        TaskDescriptor::from_json(path, &bytes)
    }

    pub fn result_path(&self, task_id: &str) -> PathBuf {
        self.output_dir().join(format!("{}_result.json", task_id))
    }

    pub async fn write_result(&self, envelope: &ResultEnvelope) -> Result<PathBuf, AgentError> {
        let path = self.result_path(&envelope.task_id);
        let serialized = serde_json::to_string_pretty(envelope)?;
        fs::write(&path, serialized).await?;
        debug!(path = %path.display(), "result written");
        Ok(path)
    }

    /// Moves a task file from `input/` into `processed/`.
    pub async fn archive(&self, path: &Path) -> Result<PathBuf, AgentError> {
        let name = path.file_name().ok_or_else(|| AgentError::InvalidTask {
            path: path.to_path_buf(),
            reason: "task path has no file name".to_string(),
        })?;
        let destination = self.processed_dir().join(name);
        fs::rename(path, &destination).await?;
        Ok(destination)
    }

    pub fn disk_usage(&self) -> Result<DiskUsage, AgentError> {
        Ok(DiskUsage {
            total: fs2::total_space(&self.root)?,
            available: fs2::available_space(&self.root)?,
        })
    }
}
