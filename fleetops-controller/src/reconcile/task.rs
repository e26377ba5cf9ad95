use async_trait::async_trait;
use fleetops_core::domain::task::Task;
use fleetops_core::domain::taskrun::TaskRun;
use fleetops_core::domain::{Kind, NamespacedName};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::service::RunService;
use crate::store::{ObjectStore, Objects};

use super::schedule::{self, CronRegistry};
use super::{Action, ReconcileError, Reconciler, delete_owned};

/// Keeps each Task's crontab schedule in step with its definition
pub struct TaskReconciler {
    tasks: Objects<Task>,
    taskruns: Objects<TaskRun>,
    cron: Arc<CronRegistry>,
    runs: RunService,
}

impl TaskReconciler {
    pub fn new(store: Arc<dyn ObjectStore>, cron: Arc<CronRegistry>, runs: RunService) -> Self {
        Self {
            tasks: Objects::new(store.clone()),
            taskruns: Objects::new(store),
            cron,
            runs,
        }
    }
}

#[async_trait]
impl Reconciler for TaskReconciler {
    fn kind(&self) -> Kind {
        Kind::Task
    }

    async fn reconcile(&self, key: &NamespacedName) -> Result<Action, ReconcileError> {
        let Some(task) = self.tasks.get_opt(key).await? else {
            self.cron.remove(Kind::Task, key).await;
            delete_owned(&self.taskruns, Kind::Task, key).await?;
            return Ok(Action::Done);
        };

        if task.spec.crontab.trim().is_empty() {
            self.cron.remove(Kind::Task, key).await;
            return Ok(Action::Done);
        }

        let runs = self.runs.clone();
        let target = key.clone();
        let job = schedule::job(move || {
            let runs = runs.clone();
            let target = target.clone();
            async move {
                if let Err(e) = runs.trigger_task(&target).await {
                    warn!("Scheduled run of Task {} failed: {}", target, e);
                }
            }
        });

        match self
            .cron
            .schedule(Kind::Task, key.clone(), &task.spec.crontab, job)
            .await
        {
            Ok(started) => debug!("Task {} schedule checked (new: {})", key, started),
            Err(e) => {
                warn!("Task {} not scheduled: {}", key, e);
                self.cron.remove(Kind::Task, key).await;
            }
        }

        Ok(Action::Done)
    }
}
