use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::types::{CompletionRequest, LLMResponse, Message, PromptContext, ProviderAdapter, ProviderError};
use crate::result::TaskResult;

const SYSTEM_PROMPT: &str = "You are an autonomous AI agent processing tasks dropped into a watched directory.
Your role is to complete tasks efficiently and accurately. You have access to:
- The task files and data files in the agent's data directory
- Various data processing capabilities
- The ability to generate reports and analysis

Always provide detailed, actionable responses. When working with files or data,
be explicit about your actions and results.";

const FILE_EXCERPT_CHARS: usize = 2000;
const HEALTH_PROMPT: &str = "Hi";

/// The text-generation operations the task pipeline depends on.
///
/// Implementations never fail: every error is reported as a
/// [`TaskResult`] with `success == false`.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate_response(&self, prompt: &str, context: Option<PromptContext>) -> TaskResult;

    async fn analyze_file(&self, path: &Path, analysis_type: &str) -> TaskResult;

    async fn process_data_task(&self, description: &str, file_names: &[String]) -> TaskResult;

    async fn health_check(&self) -> bool;

    async fn close(&self);
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Back-off after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub struct GeminiClient {
    adapter: Arc<dyn ProviderAdapter>,
    model: String,
    retry: RetryPolicy,
}

impl GeminiClient {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, model: &str, retry: RetryPolicy) -> Self {
        info!(model, "gemini client initialized");
        Self {
            adapter,
            model: model.to_string(),
            retry,
        }
    }

    async fn complete_with_retry(&self, request: CompletionRequest) -> Result<LLMResponse, ProviderError> {
        let mut attempt = 1;
        loop {
            let adapter = Arc::clone(&self.adapter);
            let req = request.clone();
            let outcome = tokio::task::spawn_blocking(move || adapter.complete(req))
                .await
                .unwrap_or_else(|err| Err(ProviderError::new("worker_error", &err.to_string(), false)));

            match outcome {
                Ok(resp) => return Ok(resp),
                Err(err) if err.retryable && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        attempt,
                        code = %err.code,
                        delay_ms = delay.as_millis() as u64,
                        "generation request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate_response(&self, prompt: &str, context: Option<PromptContext>) -> TaskResult {
        let full_prompt = prepare_prompt(prompt, context.as_ref());
        info!(prompt_length = full_prompt.len(), "generating response");

        let request = CompletionRequest {
            messages: vec![Message::system(SYSTEM_PROMPT), Message::user(&full_prompt)],
            model: Some(self.model.clone()),
            temperature: None,
        };

        match self.complete_with_retry(request).await {
            Ok(resp) if resp.content.is_empty() => {
                let reason = resp.finish_reason.as_deref().unwrap_or("unknown");
                warn!(finish_reason = reason, "model returned no text");
                TaskResult {
                    finish_reason: resp.finish_reason.clone(),
                    safety_ratings: Some(resp.safety_ratings),
                    ..TaskResult::failure(format!("empty response (finish_reason: {})", reason))
                }
                .with_model(&self.model)
            }
            Ok(resp) => {
                info!(response_length = resp.content.len(), "response generated");
                TaskResult {
                    success: true,
                    response: Some(resp.content),
                    model: Some(self.model.clone()),
                    finish_reason: resp.finish_reason,
                    safety_ratings: Some(resp.safety_ratings),
                    ..TaskResult::default()
                }
            }
            Err(err) => {
                error!(error = %err, "error generating response");
                TaskResult::failure(err.to_string()).with_model(&self.model)
            }
        }
    }

    async fn analyze_file(&self, path: &Path, analysis_type: &str) -> TaskResult {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) => return TaskResult::failure(format!("Failed to analyze file: {}", err)),
        };

        let context = PromptContext::new()
            .with("task_type", "file_analysis")
            .with("analysis_type", analysis_type)
            .with("file_path", path.display())
            .with("content_length", content.chars().count());
        let prompt = file_analysis_prompt(path, analysis_type, &content);
        self.generate_response(&prompt, Some(context)).await
    }

    async fn process_data_task(&self, description: &str, file_names: &[String]) -> TaskResult {
        let context = PromptContext::new()
            .with("task_type", "data_processing")
            .with("available_files", file_names.join(", "))
            .with("file_count", file_names.len());
        let prompt = data_task_prompt(description, file_names);
        self.generate_response(&prompt, Some(context)).await
    }

    async fn health_check(&self) -> bool {
        let result = self.generate_response(HEALTH_PROMPT, None).await;
        if result.success {
            info!(model = %self.model, "health check passed");
        } else {
            warn!(error = result.error.as_deref().unwrap_or(""), "health check failed");
        }
        result.success
    }

    async fn close(&self) {
        info!("gemini client cleanup complete");
    }
}

pub fn prepare_prompt(prompt: &str, context: Option<&PromptContext>) -> String {
    match context {
        Some(ctx) if !ctx.is_empty() => format!("Context:\n{}\n\nTask: {}", ctx.render(), prompt),
        _ => format!("Task: {}", prompt),
    }
}

fn file_analysis_prompt(path: &Path, analysis_type: &str, content: &str) -> String {
    let total = content.chars().count();
    let excerpt: String = content.chars().take(FILE_EXCERPT_CHARS).collect();
    let marker = if total > FILE_EXCERPT_CHARS { "\n[truncated]" } else { "" };
    format!(
        "File Analysis Task ({analysis_type}):\n\n\
         File: {path}\n\
         Content:\n{excerpt}{marker}\n\n\
         Please provide a comprehensive analysis including:\n\
         1. Content summary\n\
         2. Key insights\n\
         3. Data patterns\n\
         4. Recommendations",
        path = path.display(),
    )
}

fn data_task_prompt(description: &str, file_names: &[String]) -> String {
    format!(
        "Data Processing Task: {description}\n\n\
         Available data files: {files}\n\n\
         Please provide:\n\
         1. Analysis approach\n\
         2. Expected insights\n\
         3. Processing steps\n\
         4. Output format recommendations",
        files = file_names.join(", "),
    )
}
