//! Crontab schedules owned by Task and Pipeline reconcilers
//!
//! Each scheduled definition gets one background loop that sleeps until the
//! next fire time and runs its job. Loops are tracked by object identity in
//! a single map; replacing or removing an entry cancels its loop while the
//! lock is held, so a concurrent `schedule` cannot resurrect it.

use chrono::Utc;
use cron::Schedule;
use fleetops_core::domain::{Kind, NamespacedName};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Work run on every fire time
pub type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Wraps an async closure as a [`Job`]
pub fn job<F, Fut>(f: F) -> Job
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || -> JobFuture { Box::pin(f()) })
}

#[derive(Debug, Error)]
pub enum CronError {
    #[error("invalid crontab '{expression}': {message}")]
    Invalid { expression: String, message: String },
}

/// Parses a crontab expression
///
/// Five-field expressions (minute hour day month weekday) get a leading
/// seconds field of `0`; six and seven field forms are passed through.
pub fn parse_crontab(expression: &str) -> Result<Schedule, CronError> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| CronError::Invalid {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

struct Entry {
    expression: String,
    token: CancellationToken,
}

pub struct CronRegistry {
    entries: Mutex<HashMap<(Kind, NamespacedName), Entry>>,
    token: CancellationToken,
}

impl CronRegistry {
    /// Every schedule stops when `parent` is cancelled
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            token: parent.child_token(),
        }
    }

    /// Schedules `job` for the object, replacing a schedule with another expression
    ///
    /// # Returns
    /// `true` when a new loop was started, `false` when the same expression
    /// was already scheduled
    pub async fn schedule(
        &self,
        kind: Kind,
        key: NamespacedName,
        expression: &str,
        job: Job,
    ) -> Result<bool, CronError> {
        let schedule = parse_crontab(expression)?;

        let mut entries = self.entries.lock().await;
        let id = (kind, key);

        if entries
            .get(&id)
            .is_some_and(|e| e.expression == expression)
        {
            return Ok(false);
        }

        if let Some(old) = entries.remove(&id) {
            old.token.cancel();
        }

        let token = self.token.child_token();
        info!("Scheduling {} {} with '{}'", id.0, id.1, expression);
        tokio::spawn(run_schedule(
            schedule,
            token.clone(),
            job,
            format!("{} {}", id.0, id.1),
        ));

        entries.insert(
            id,
            Entry {
                expression: expression.to_string(),
                token,
            },
        );
        Ok(true)
    }

    /// Cancels and forgets the object's schedule, if any
    pub async fn remove(&self, kind: Kind, key: &NamespacedName) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.remove(&(kind, key.clone())) {
            Some(entry) => {
                entry.token.cancel();
                info!("Unscheduled {} {}", kind, key);
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, kind: Kind, key: &NamespacedName) -> bool {
        self.entries.lock().await.contains_key(&(kind, key.clone()))
    }
}

async fn run_schedule(schedule: Schedule, token: CancellationToken, job: Job, label: String) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            debug!("Schedule for {} has no further fire times", label);
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(wait) => {
                debug!("Schedule fired for {}", label);
                job().await;
            }
        }
    }
}
