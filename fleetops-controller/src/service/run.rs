use chrono::Utc;
use fleetops_core::domain::meta::LABEL_SCHEDULED;
use fleetops_core::domain::pipeline::Pipeline;
use fleetops_core::domain::pipelinerun::{PipelineRun, PipelineRunSpec, PipelineRunStatus};
use fleetops_core::domain::target::TargetKind;
use fleetops_core::domain::task::Task;
use fleetops_core::domain::taskrun::{TaskRun, TaskRunSpec, TaskRunStatus};
use fleetops_core::domain::{Kind, NamespacedName, ObjectMeta, OwnerRef, Resource};
use fleetops_core::dto::{CreatePipelineRun, CreateTaskRun};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::engine::TargetFields;
use crate::store::{ListFilter, ObjectStore, Objects, StoreError};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("pipeline {0} not found")]
    PipelineNotFound(String),

    /// The run kept going past the wait deadline; it is not a failed run
    #[error("timed out after {after:?} waiting for {kind} {key}")]
    Timeout {
        kind: Kind,
        key: NamespacedName,
        after: Duration,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates runs and waits for them
#[derive(Clone)]
pub struct RunService {
    tasks: Objects<Task>,
    taskruns: Objects<TaskRun>,
    pipelines: Objects<Pipeline>,
    pipelineruns: Objects<PipelineRun>,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl RunService {
    pub fn new(store: Arc<dyn ObjectStore>, poll_interval: Duration, wait_timeout: Duration) -> Self {
        Self {
            tasks: Objects::new(store.clone()),
            taskruns: Objects::new(store.clone()),
            pipelines: Objects::new(store.clone()),
            pipelineruns: Objects::new(store),
            poll_interval,
            wait_timeout,
        }
    }

    /// Creates a TaskRun holding a snapshot of the referenced Task
    ///
    /// # Arguments
    /// * `namespace` - Namespace of both the Task and the new run
    /// * `req` - Overrides; empty fields fall back to the Task
    pub async fn create_task_run(
        &self,
        namespace: &str,
        req: CreateTaskRun,
    ) -> Result<TaskRun, RunError> {
        req.validate().map_err(RunError::Invalid)?;

        let task = self
            .tasks
            .get_opt(&NamespacedName::new(namespace, &req.task_ref))
            .await?
            .ok_or_else(|| RunError::TaskNotFound(req.task_ref.clone()))?;

        let fields = TargetFields::merge(&task.spec, req.type_ref, &req.name_ref, &req.node_name);
        if fields.type_ref == TargetKind::Host
            && fields.name_ref.is_empty()
            && task.spec.host_selector.is_empty()
        {
            return Err(RunError::Invalid("nameRef is required".to_string()));
        }

        let name = if req.name.is_empty() {
            run_name(&req.task_ref)
        } else {
            req.name
        };

        let run = TaskRun {
            metadata: ObjectMeta::new(namespace, name),
            spec: TaskRunSpec {
                task_ref: req.task_ref,
                type_ref: req.type_ref,
                name_ref: req.name_ref,
                node_name: req.node_name,
                variables: req.variables,
                task: Some(task.spec),
            },
            status: TaskRunStatus::default(),
        };

        let created = self.taskruns.create(&run).await?;
        info!("Created TaskRun {}", created.key());
        Ok(created)
    }

    pub async fn create_pipeline_run(
        &self,
        namespace: &str,
        req: CreatePipelineRun,
    ) -> Result<PipelineRun, RunError> {
        req.validate().map_err(RunError::Invalid)?;

        if self
            .pipelines
            .get_opt(&NamespacedName::new(namespace, &req.pipeline_ref))
            .await?
            .is_none()
        {
            return Err(RunError::PipelineNotFound(req.pipeline_ref));
        }

        let name = if req.name.is_empty() {
            run_name(&req.pipeline_ref)
        } else {
            req.name
        };

        let run = PipelineRun {
            metadata: ObjectMeta::new(namespace, name),
            spec: PipelineRunSpec {
                pipeline_ref: req.pipeline_ref,
                type_ref: req.type_ref,
                name_ref: req.name_ref,
                node_name: req.node_name,
                variables: req.variables,
            },
            status: PipelineRunStatus::default(),
        };

        let created = self.pipelineruns.create(&run).await?;
        info!("Created PipelineRun {}", created.key());
        Ok(created)
    }

    /// Polls until the TaskRun finishes or the wait timeout elapses
    pub async fn wait_for_task_run(&self, key: &NamespacedName) -> Result<TaskRun, RunError> {
        let poll = async {
            loop {
                let run = self.taskruns.get(key).await?;
                if run.status.run_status.is_finished() {
                    return Ok::<_, RunError>(run);
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        tokio::time::timeout(self.wait_timeout, poll)
            .await
            .map_err(|_| RunError::Timeout {
                kind: Kind::TaskRun,
                key: key.clone(),
                after: self.wait_timeout,
            })?
    }

    pub async fn wait_for_pipeline_run(
        &self,
        key: &NamespacedName,
    ) -> Result<PipelineRun, RunError> {
        let poll = async {
            loop {
                let run = self.pipelineruns.get(key).await?;
                if run.status.run_status.is_finished() {
                    return Ok::<_, RunError>(run);
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        tokio::time::timeout(self.wait_timeout, poll)
            .await
            .map_err(|_| RunError::Timeout {
                kind: Kind::PipelineRun,
                key: key.clone(),
                after: self.wait_timeout,
            })?
    }

    /// Starts a scheduled TaskRun unless one is still in progress
    ///
    /// # Returns
    /// The new run, or `None` when skipped
    pub async fn trigger_task(&self, key: &NamespacedName) -> Result<Option<TaskRun>, RunError> {
        let task = self
            .tasks
            .get_opt(key)
            .await?
            .ok_or_else(|| RunError::TaskNotFound(key.name.clone()))?;

        let owned = ListFilter::namespace(&key.namespace).owned_by(Kind::Task, &key.name);
        if self
            .taskruns
            .list(&owned)
            .await?
            .iter()
            .any(|r| !r.status.run_status.is_finished())
        {
            info!("Scheduled run of Task {} skipped, previous run still active", key);
            return Ok(None);
        }

        let run = TaskRun {
            metadata: scheduled_meta(key, Kind::Task, &task.metadata),
            spec: TaskRunSpec {
                task_ref: key.name.clone(),
                task: Some(task.spec),
                ..Default::default()
            },
            status: TaskRunStatus::default(),
        };

        let created = self.taskruns.create(&run).await?;
        info!("Scheduled TaskRun {}", created.key());
        Ok(Some(created))
    }

    /// Starts a scheduled PipelineRun unless one is still in progress
    pub async fn trigger_pipeline(
        &self,
        key: &NamespacedName,
    ) -> Result<Option<PipelineRun>, RunError> {
        let pipeline = self
            .pipelines
            .get_opt(key)
            .await?
            .ok_or_else(|| RunError::PipelineNotFound(key.name.clone()))?;

        let owned = ListFilter::namespace(&key.namespace).owned_by(Kind::Pipeline, &key.name);
        if self
            .pipelineruns
            .list(&owned)
            .await?
            .iter()
            .any(|r| !r.status.run_status.is_finished())
        {
            info!("Scheduled run of Pipeline {} skipped, previous run still active", key);
            return Ok(None);
        }

        let run = PipelineRun {
            metadata: scheduled_meta(key, Kind::Pipeline, &pipeline.metadata),
            spec: PipelineRunSpec {
                pipeline_ref: key.name.clone(),
                ..Default::default()
            },
            status: PipelineRunStatus::default(),
        };

        let created = self.pipelineruns.create(&run).await?;
        info!("Scheduled PipelineRun {}", created.key());
        Ok(Some(created))
    }
}

fn scheduled_meta(key: &NamespacedName, kind: Kind, parent: &ObjectMeta) -> ObjectMeta {
    ObjectMeta::new(&key.namespace, run_name(&key.name))
        .with_label(LABEL_SCHEDULED, "true")
        .with_owner(OwnerRef {
            kind,
            name: key.name.clone(),
            uid: parent.uid,
        })
}

/// `<base>-<timestamp>-<suffix>`, unique enough for repeated runs
fn run_name(base: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        base,
        Utc::now().format("%Y%m%d%H%M%S"),
        &suffix[..5]
    )
}
