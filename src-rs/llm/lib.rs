pub mod client;
pub mod gemini_adapter;
pub mod rotation;
pub mod types;

pub use client::{GeminiClient, GenerationClient, RetryPolicy};
pub use gemini_adapter::{GeminiAdapter, GeminiConfig};
pub use rotation::Rotator;
pub use types::{CompletionRequest, LLMResponse, Message, PromptContext, ProviderAdapter, ProviderError, SafetyRating};
