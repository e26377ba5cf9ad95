use async_trait::async_trait;
use fleetops_core::domain::pipeline::Pipeline;
use fleetops_core::domain::pipelinerun::PipelineRun;
use fleetops_core::domain::{Kind, NamespacedName};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::service::RunService;
use crate::store::{ObjectStore, Objects};

use super::schedule::{self, CronRegistry};
use super::{Action, ReconcileError, Reconciler, delete_owned};

/// Keeps each Pipeline's crontab schedule in step with its definition
pub struct PipelineReconciler {
    pipelines: Objects<Pipeline>,
    pipelineruns: Objects<PipelineRun>,
    cron: Arc<CronRegistry>,
    runs: RunService,
}

impl PipelineReconciler {
    pub fn new(store: Arc<dyn ObjectStore>, cron: Arc<CronRegistry>, runs: RunService) -> Self {
        Self {
            pipelines: Objects::new(store.clone()),
            pipelineruns: Objects::new(store),
            cron,
            runs,
        }
    }
}

#[async_trait]
impl Reconciler for PipelineReconciler {
    fn kind(&self) -> Kind {
        Kind::Pipeline
    }

    async fn reconcile(&self, key: &NamespacedName) -> Result<Action, ReconcileError> {
        let Some(pipeline) = self.pipelines.get_opt(key).await? else {
            self.cron.remove(Kind::Pipeline, key).await;
            delete_owned(&self.pipelineruns, Kind::Pipeline, key).await?;
            return Ok(Action::Done);
        };

        if pipeline.spec.crontab.trim().is_empty() {
            self.cron.remove(Kind::Pipeline, key).await;
            return Ok(Action::Done);
        }

        let runs = self.runs.clone();
        let target = key.clone();
        let job = schedule::job(move || {
            let runs = runs.clone();
            let target = target.clone();
            async move {
                if let Err(e) = runs.trigger_pipeline(&target).await {
                    warn!("Scheduled run of Pipeline {} failed: {}", target, e);
                }
            }
        });

        match self
            .cron
            .schedule(Kind::Pipeline, key.clone(), &pipeline.spec.crontab, job)
            .await
        {
            Ok(started) => debug!("Pipeline {} schedule checked (new: {})", key, started),
            Err(e) => {
                warn!("Pipeline {} not scheduled: {}", key, e);
                self.cron.remove(Kind::Pipeline, key).await;
            }
        }

        Ok(Action::Done)
    }
}
