use async_trait::async_trait;
use fleetops_core::domain::taskrun::TaskRun;
use fleetops_core::domain::{Kind, NamespacedName, RunStatus};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::{EngineSettings, TaskRunEngine, commit_status, history};
use crate::store::{ObjectStore, Objects};

use super::{Action, ReconcileError, Reconciler};

/// Runs each TaskRun at most once
///
/// - empty status: execute, then prune the Task's history
/// - `Init`/`Running`: left over from a previous controller process, marked
///   `Aborted` instead of being executed again
/// - terminal: nothing to do
pub struct TaskRunReconciler {
    taskruns: Objects<TaskRun>,
    engine: Arc<TaskRunEngine>,
    settings: EngineSettings,
    history_limit: usize,
}

impl TaskRunReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        engine: Arc<TaskRunEngine>,
        settings: EngineSettings,
        history_limit: usize,
    ) -> Self {
        Self {
            taskruns: Objects::new(store),
            engine,
            settings,
            history_limit,
        }
    }

    async fn prune(&self, run: &TaskRun) {
        if run.metadata.owner.as_ref().is_some_and(|o| o.kind == Kind::PipelineRun) {
            return;
        }
        history::prune_task_runs(
            &self.taskruns,
            &run.metadata.namespace,
            &run.spec.task_ref,
            self.history_limit,
        )
        .await;
    }
}

#[async_trait]
impl Reconciler for TaskRunReconciler {
    fn kind(&self) -> Kind {
        Kind::TaskRun
    }

    async fn reconcile(&self, key: &NamespacedName) -> Result<Action, ReconcileError> {
        let Some(mut run) = self.taskruns.get_opt(key).await? else {
            debug!("TaskRun {} is gone", key);
            return Ok(Action::Done);
        };

        match run.status.run_status {
            RunStatus::Empty => match self.engine.run(run).await {
                Ok(done) => self.prune(&done).await,
                Err(e) if e.is_not_found() => debug!("TaskRun {} deleted while running", key),
                Err(e) => return Err(e.into()),
            },
            RunStatus::Init | RunStatus::Running => {
                warn!("TaskRun {} was {} when the controller restarted, aborting", key, run.status.run_status);
                run.status.set_run_status(RunStatus::Aborted);
                run.status.message = "interrupted by controller restart".to_string();
                match commit_status(&self.taskruns, &run, &self.settings).await {
                    Ok(()) => self.prune(&run).await,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            _ => {}
        }

        Ok(Action::Done)
    }
}
