use async_trait::async_trait;
use fleetops_core::domain::pipelinerun::PipelineRun;
use fleetops_core::domain::taskrun::TaskRun;
use fleetops_core::domain::{Kind, NamespacedName};
use std::sync::Arc;
use tracing::debug;

use crate::engine::{PipelineRunOrchestrator, history};
use crate::store::{ObjectStore, Objects};

use super::{Action, ReconcileError, Reconciler, delete_owned};

pub struct PipelineRunReconciler {
    pipelineruns: Objects<PipelineRun>,
    taskruns: Objects<TaskRun>,
    orchestrator: Arc<PipelineRunOrchestrator>,
    /// No pruning when unset
    history_limit: Option<usize>,
}

impl PipelineRunReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        orchestrator: Arc<PipelineRunOrchestrator>,
        history_limit: Option<usize>,
    ) -> Self {
        Self {
            pipelineruns: Objects::new(store.clone()),
            taskruns: Objects::new(store),
            orchestrator,
            history_limit,
        }
    }
}

#[async_trait]
impl Reconciler for PipelineRunReconciler {
    fn kind(&self) -> Kind {
        Kind::PipelineRun
    }

    async fn reconcile(&self, key: &NamespacedName) -> Result<Action, ReconcileError> {
        let Some(pr) = self.pipelineruns.get_opt(key).await? else {
            delete_owned(&self.taskruns, Kind::PipelineRun, key).await?;
            return Ok(Action::Done);
        };

        if pr.status.run_status.is_finished() {
            return Ok(Action::Done);
        }

        let done = match self.orchestrator.run(pr).await {
            Ok(done) => done,
            Err(e) if e.is_not_found() => {
                debug!("PipelineRun {} deleted while running", key);
                return Ok(Action::Done);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(limit) = self.history_limit {
            history::prune_pipeline_runs(
                &self.pipelineruns,
                &key.namespace,
                &done.spec.pipeline_ref,
                limit,
            )
            .await;
        }

        Ok(Action::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ListFilter;
    use crate::testing::{FakeExecutor, Harness};
    use fleetops_core::domain::{Resource, RunStatus};
    use fleetops_core::domain::pipeline::PipelineTask;
    use fleetops_core::domain::task::Step;

    #[tokio::test]
    async fn test_runs_pipeline_and_cascades_on_delete() {
        let h = Harness::new(FakeExecutor::new()).await;
        let _worker = h.spawn_taskrun_worker();
        h.create_task("t", vec![Step::command("s", "echo ok")]).await;
        h.create_pipeline("p", vec![PipelineTask::new("a", "t"), PipelineTask::new("b", "t")])
            .await;
        let pr = h.create_pipeline_run("p-1", "p").await;
        let r = PipelineRunReconciler::new(h.store.clone(), h.orchestrator(), None);

        r.reconcile(&pr.key()).await.unwrap();
        let stored = h.pipelineruns.get(&pr.key()).await.unwrap();
        assert_eq!(stored.status.run_status, RunStatus::Successed);
        assert_eq!(h.taskruns.list(&ListFilter::all()).await.unwrap().len(), 2);

        r.reconcile(&pr.key()).await.unwrap();
        assert_eq!(h.executor.call_count(), 2);

        h.pipelineruns.delete(&pr.key()).await.unwrap();
        r.reconcile(&pr.key()).await.unwrap();
        assert!(h.taskruns.list(&ListFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prunes_finished_pipeline_runs() {
        let h = Harness::new(FakeExecutor::new()).await;
        h.create_pipeline("p", vec![]).await;
        let r = PipelineRunReconciler::new(h.store.clone(), h.orchestrator(), Some(1));

        for i in 0..3 {
            let pr = h.create_pipeline_run(&format!("p-{}", i), "p").await;
            r.reconcile(&pr.key()).await.unwrap();
        }

        let left = h.pipelineruns.list(&ListFilter::all()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].metadata.name, "p-2");
    }
}
