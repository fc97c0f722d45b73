use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;
use crate::result::TaskResult;

const REQUIRED_FIELDS: [&str; 3] = ["id", "task", "type"];

/// Routing tag of a task. Tags outside the known set are general tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Analysis,
    DataProcessing,
    FileAnalysis,
    General,
}

impl TaskKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "analysis" => Self::Analysis,
            "data_processing" => Self::DataProcessing,
            "file_analysis" => Self::FileAnalysis,
            _ => Self::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::DataProcessing => "data_processing",
            Self::FileAnalysis => "file_analysis",
            Self::General => "general",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: String,
    pub task: String,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
}

impl TaskDescriptor {
    /// Parses and validates a task file body.
    ///
    /// Unparseable JSON surfaces as [`AgentError::Json`]; a document missing
    /// `id`, `task` or `type`, or with an id that cannot name a result file,
    /// surfaces as [`AgentError::InvalidTask`]. Unknown fields are ignored.
    pub fn from_json(path: &Path, bytes: &[u8]) -> Result<Self, AgentError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let invalid = |reason: String| AgentError::InvalidTask {
            path: path.to_path_buf(),
            reason,
        };

        let object = value
            .as_object()
            .ok_or_else(|| invalid("task file must contain a JSON object".to_string()))?;
        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| !object.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            return Err(invalid(format!("missing required fields: {}", missing.join(", "))));
        }

        let descriptor: Self = serde_json::from_value(value).map_err(|err| invalid(err.to_string()))?;
        if !is_safe_id(&descriptor.id) {
            return Err(invalid(format!("task id {:?} cannot be used as a file name", descriptor.id)));
        }
        Ok(descriptor)
    }

    pub fn kind(&self) -> TaskKind {
        TaskKind::from_tag(&self.task_type)
    }
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\', '\0'])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

/// The record written to `output/{id}_result.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub task_id: String,
    pub original_task: TaskDescriptor,
    pub result: TaskResult,
    pub timestamp: DateTime<Utc>,
    pub status: TaskStatus,
}

impl ResultEnvelope {
    pub fn new(task: TaskDescriptor, result: TaskResult) -> Self {
        let status = if result.success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        Self {
            task_id: task.id.clone(),
            original_task: task,
            result,
            timestamp: Utc::now(),
            status,
        }
    }
}
