//! Hand-off of discovered task paths from the watcher thread to the agent loop.
//!
//! Both delivery paths (live watcher events and the startup backlog) feed one
//! FIFO queue. A path already waiting in the queue is not queued twice.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Default)]
struct Pending {
    queue: VecDeque<PathBuf>,
    queued: HashSet<PathBuf>,
}

#[derive(Default)]
pub struct DispatchBridge {
    pending: Mutex<Pending>,
    wake: Notify,
    live: AtomicBool,
}

impl DispatchBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `path` and wakes the consumer. Callable from any thread.
    ///
    /// Returns `false` when the path was already waiting.
    pub fn submit(&self, path: PathBuf) -> bool {
        let accepted = match self.pending.lock() {
            Ok(mut pending) => {
                if pending.queued.insert(path.clone()) {
                    pending.queue.push_back(path.clone());
                    true
                } else {
                    false
                }
            }
            Err(_) => {
                warn!(path = %path.display(), "pending queue lock poisoned, dropping path");
                return false;
            }
        };

        if !accepted {
            debug!(path = %path.display(), "path already queued");
            return false;
        }
        if self.is_live() {
            debug!(path = %path.display(), "task file queued");
        } else {
            warn!(path = %path.display(), "agent loop not running yet, buffering task file");
        }
        self.wake.notify_one();
        true
    }

    /// Removes and returns the oldest queued path.
    pub fn take(&self) -> Option<PathBuf> {
        let mut pending = self.pending.lock().ok()?;
        let path = pending.queue.pop_front()?;
        pending.queued.remove(&path);
        Some(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        match self.pending.lock() {
            Ok(pending) => pending.queued.contains(path),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        match self.pending.lock() {
            Ok(pending) => pending.queue.len(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks whether the consumer loop is draining the queue.
    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Resolves once a path has been submitted since the last wake-up.
    pub async fn notified(&self) {
        self.wake.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fifo_order_and_dedup() {
        let bridge = DispatchBridge::new();
        assert!(bridge.submit(PathBuf::from("a.json")));
        assert!(bridge.submit(PathBuf::from("b.json")));
        assert!(!bridge.submit(PathBuf::from("a.json")));
        assert_eq!(bridge.len(), 2);

        assert_eq!(bridge.take(), Some(PathBuf::from("a.json")));
        assert!(!bridge.contains(Path::new("a.json")));
        // Once taken, the same path may be queued again.
        assert!(bridge.submit(PathBuf::from("a.json")));
        assert_eq!(bridge.take(), Some(PathBuf::from("b.json")));
        assert_eq!(bridge.take(), Some(PathBuf::from("a.json")));
        assert_eq!(bridge.take(), None);
        assert!(bridge.is_empty());
    }

    #[test]
    fn submissions_from_other_threads_are_kept() {
        let bridge = Arc::new(DispatchBridge::new());
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let bridge = Arc::clone(&bridge);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        bridge.submit(PathBuf::from(format!("{n}-{i}.json")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(bridge.len(), 100);
    }

    #[tokio::test]
    async fn submit_wakes_a_waiting_consumer() {
        let bridge = Arc::new(DispatchBridge::new());
        bridge.set_live(true);

        let producer = Arc::clone(&bridge);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.submit(PathBuf::from("late.json"));
        });

        tokio::time::timeout(Duration::from_secs(5), bridge.notified())
            .await
            .expect("consumer was not woken");
        assert_eq!(bridge.take(), Some(PathBuf::from("late.json")));
    }
}
