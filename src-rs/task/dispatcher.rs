use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use super::store::TaskStore;
use super::types::{TaskDescriptor, TaskKind};
use crate::error::AgentError;
use crate::llm::{GenerationClient, PromptContext};
use crate::result::TaskResult;

/// Routes a task to the handler for its kind and normalizes the outcome.
pub struct TaskDispatcher {
    client: Arc<dyn GenerationClient>,
    store: Arc<TaskStore>,
}

impl TaskDispatcher {
    pub fn new(client: Arc<dyn GenerationClient>, store: Arc<TaskStore>) -> Self {
        Self { client, store }
    }

    /// Always yields a result; handler errors come back as `success == false`.
    pub async fn execute(&self, task: &TaskDescriptor) -> TaskResult {
        let kind = task.kind();
        info!(task_id = %task.id, task_type = kind.as_str(), "executing task");

        let result = match self.handle(kind, task).await {
            Ok(result) => result,
            Err(err) => {
                error!(task_id = %task.id, error = %err, "task execution failed");
                TaskResult::failure(err.to_string()).with_task_id(&task.id)
            }
        };

        info!(task_id = %task.id, success = result.success, "task execution completed");
        result
    }

    async fn handle(&self, kind: TaskKind, task: &TaskDescriptor) -> Result<TaskResult, AgentError> {
        match kind {
            TaskKind::Analysis => Ok(self.handle_analysis(task).await),
            TaskKind::DataProcessing => self.handle_data_processing(task).await,
            TaskKind::FileAnalysis => Ok(self.handle_file_analysis(task).await),
            TaskKind::General => Ok(self.client.generate_response(&task.task, None).await),
        }
    }

    async fn handle_analysis(&self, task: &TaskDescriptor) -> TaskResult {
        let prompt = format!("Analysis Task: {}", task.task);
        let context = PromptContext::new()
            .with("task_type", TaskKind::Analysis.as_str())
            .with("priority", task.priority.as_deref().unwrap_or("normal"))
            .with("deadline", task.deadline.as_deref().unwrap_or("None"));
        self.client.generate_response(&prompt, Some(context)).await
    }

    async fn handle_data_processing(&self, task: &TaskDescriptor) -> Result<TaskResult, AgentError> {
        let file_names = self.store.input_file_names().await?;
        Ok(self.client.process_data_task(&task.task, &file_names).await)
    }

    async fn handle_file_analysis(&self, task: &TaskDescriptor) -> TaskResult {
        let Some(file_path) = task.file_path.as_deref() else {
            return TaskResult::failure("No file path specified for file analysis task");
        };
        let analysis_type = task.analysis_type.as_deref().unwrap_or("general");
        self.client.analyze_file(Path::new(file_path), analysis_type).await
    }
}
