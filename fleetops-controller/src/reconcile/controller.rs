use fleetops_core::domain::NamespacedName;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::queue::WorkQueue;
use super::{Action, Reconciler};

const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 300_000;

/// Drains one kind's queue with at most `concurrency` reconciles in flight
pub struct Controller {
    reconciler: Arc<dyn Reconciler>,
    queue: Arc<WorkQueue>,
    concurrency: usize,
    failures: Mutex<HashMap<NamespacedName, u32>>,
}

impl Controller {
    pub fn new(reconciler: Arc<dyn Reconciler>, concurrency: usize) -> Self {
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            concurrency: concurrency.max(1),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Runs until `token` is cancelled
    ///
    /// In-flight reconciles are aborted on shutdown.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let kind = self.reconciler.kind();
        info!("Starting {} controller (concurrency: {})", kind, self.concurrency);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = token.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let key = tokio::select! {
                _ = token.cancelled() => break,
                key = self.queue.get() => match key {
                    Some(key) => key,
                    None => break,
                },
            };

            let this = Arc::clone(&self);
            workers.spawn(async move {
                this.process(key).await;
                drop(permit);
            });

            while let Some(joined) = workers.try_join_next() {
                if let Err(e) = joined {
                    error!("{} reconcile task panicked: {}", kind, e);
                }
            }
        }

        self.queue.shutdown().await;
        workers.shutdown().await;
        info!("{} controller stopped", kind);
    }

    async fn process(&self, key: NamespacedName) {
        let kind = self.reconciler.kind();
        debug!("Reconciling {} {}", kind, key);

        match self.reconciler.reconcile(&key).await {
            Ok(Action::Done) => {
                self.failures.lock().await.remove(&key);
            }
            Ok(Action::RequeueAfter(delay)) => {
                self.failures.lock().await.remove(&key);
                self.queue.add_after(key.clone(), delay);
            }
            Err(e) => {
                let attempt = {
                    let mut failures = self.failures.lock().await;
                    let count = failures.entry(key.clone()).or_insert(0);
                    *count += 1;
                    *count
                };
                let delay = backoff(attempt);
                error!(
                    "Failed to reconcile {} {} (attempt {}), retrying in {:?}: {}",
                    kind, key, attempt, delay, e
                );
                self.queue.add_after(key.clone(), delay);
            }
        }

        self.queue.done(&key).await;
    }
}

/// Exponential backoff starting at 500ms, capped at five minutes
fn backoff(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    let ms = INITIAL_BACKOFF_MS
        .saturating_mul(1u64 << exp)
        .min(MAX_BACKOFF_MS);
    Duration::from_millis(ms)
}
