use fleetops_core::domain::NamespacedName;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

#[derive(Default)]
struct State {
    queue: VecDeque<NamespacedName>,
    /// Keys waiting to be processed
    dirty: HashSet<NamespacedName>,
    /// Keys handed out and not yet marked done
    processing: HashSet<NamespacedName>,
    shutdown: bool,
}

/// Deduplicating key queue
///
/// A key is queued at most once, and a key being processed is never handed
/// out again until `done` is called; adds in the meantime are deferred to
/// that point.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, key: NamespacedName) {
        let mut state = self.state.lock().await;
        if state.shutdown || state.dirty.contains(&key) {
            return;
        }

        state.dirty.insert(key.clone());
        if !state.processing.contains(&key) {
            state.queue.push_back(key);
            self.notify.notify_one();
        }
    }

    /// Adds `key` once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, key: NamespacedName, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Waits for the next key; `None` once the queue is shut down
    pub async fn get(&self) -> Option<NamespacedName> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutdown {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks `key` processed, requeueing it if it was added meanwhile
    pub async fn done(&self, key: &NamespacedName) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            self.notify.notify_one();
        }
    }

    pub async fn shutdown(&self) {
        self.state.lock().await.shutdown = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }
}
