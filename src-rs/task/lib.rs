pub mod dispatcher;
pub mod store;
pub mod types;

pub use dispatcher::TaskDispatcher;
pub use store::{is_task_file, DiskUsage, TaskStore};
pub use types::{ResultEnvelope, TaskDescriptor, TaskKind, TaskStatus};
