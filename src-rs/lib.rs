pub mod agent;
pub mod bridge;
pub mod config;
pub mod error;
pub mod health;
pub mod helpers;
pub mod result;
pub mod watcher;

#[path = "llm/lib.rs"]
pub mod llm;
#[path = "task/lib.rs"]
pub mod task;

pub use agent::{Agent, AgentState, ProcessOutcome, ShutdownHandle};
pub use config::AgentConfig;
pub use error::AgentError;
pub use result::TaskResult;
