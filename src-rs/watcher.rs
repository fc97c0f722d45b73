use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use crate::bridge::DispatchBridge;
use crate::error::AgentError;
use crate::task::is_task_file;

/// Watches one directory (non-recursively) and forwards `*.json` files that
/// appear in it or finish being written.
///
/// Events are delivered on the notifier's own thread; dropping the watcher
/// stops and joins it.
pub struct TaskWatcher {
    dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl TaskWatcher {
    pub fn start(dir: &Path, bridge: Arc<DispatchBridge>) -> Result<Self, AgentError> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path in ready_task_files(&event) {
                    bridge.submit(path);
                }
            }
            Err(err) => warn!(error = %err, "file watch error"),
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "file monitoring started");

        Ok(Self {
            dir: dir.to_path_buf(),
            watcher: Some(watcher),
        })
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(err) = watcher.unwatch(&self.dir) {
                warn!(error = %err, "failed to unwatch input directory");
            }
            drop(watcher);
            info!(dir = %self.dir.display(), "file monitoring stopped");
        }
    }
}

impl Drop for TaskWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Task files an event announces as new or freshly written.
///
/// A creation can be seen before the writer has flushed anything, so writes
/// re-announce the path. The bridge folds repeats of a queued path.
fn ready_task_files(event: &Event) -> Vec<PathBuf> {
    let ready = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    );
    if !ready {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|path| is_task_file(path) && !path.is_dir())
        .cloned()
        .collect()
}
