use fleetops_core::domain::meta::{LABEL_PIPELINE_RUN, LABEL_TASK_NAME};
use fleetops_core::domain::pipeline::{Pipeline, PipelineTask};
use fleetops_core::domain::pipelinerun::{PipelineRun, PipelineRunTaskStatus};
use fleetops_core::domain::task::{Task, TaskSpec};
use fleetops_core::domain::taskrun::{TaskRun, TaskRunSpec, TaskRunStatus};
use fleetops_core::domain::{
    Kind, NamespacedName, ObjectMeta, OwnerRef, Resource, RunStatus, VariableError, Variables,
};
use fleetops_core::render::{self, RenderContext, logic_expression};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::store::{ObjectStore, Objects, StoreError};

use super::targets::TargetFields;
use super::{EngineSettings, commit_status};

/// Sequences the TaskRuns of a PipelineRun
///
/// Tasks run in declared order. The first task that ends in anything but
/// `Successed` (and does not allow failure) switches the run into
/// always-only mode: from then on only `runAlways` tasks are started.
pub struct PipelineRunOrchestrator {
    pipelineruns: Objects<PipelineRun>,
    pipelines: Objects<Pipeline>,
    tasks: Objects<Task>,
    taskruns: Objects<TaskRun>,
    settings: EngineSettings,
}

impl PipelineRunOrchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, settings: EngineSettings) -> Self {
        Self {
            pipelineruns: Objects::new(store.clone()),
            pipelines: Objects::new(store.clone()),
            tasks: Objects::new(store.clone()),
            taskruns: Objects::new(store),
            settings,
        }
    }

    /// Drives a PipelineRun to a terminal status
    ///
    /// A run that is already `Running` resumes, reusing the child TaskRuns it
    /// created earlier. Finished runs are returned untouched.
    pub async fn run(&self, mut pr: PipelineRun) -> Result<PipelineRun, StoreError> {
        if pr.status.run_status.is_finished() {
            debug!("PipelineRun {} already {}, skipping", pr.key(), pr.status.run_status);
            return Ok(pr);
        }

        let key = pr.key();
        let pipeline_key = NamespacedName::new(&key.namespace, &pr.spec.pipeline_ref);
        let Some(pipeline) = self.pipelines.get_opt(&pipeline_key).await? else {
            let message = format!("pipeline {} not found", pr.spec.pipeline_ref);
            return self.finish(pr, RunStatus::DataInValid, message).await;
        };
        if let Err(e) = pipeline.spec.validate() {
            let message = format!("pipeline {}: {}", pr.spec.pipeline_ref, e);
            return self.finish(pr, RunStatus::DataInValid, message).await;
        }

        pr.status.start();
        self.commit(&pr).await?;
        info!(
            "PipelineRun {} running {} task(s)",
            key,
            pipeline.spec.tasks.len()
        );

        let mut always_only = false;
        let mut invalid = None;
        for (index, slot) in pipeline.spec.tasks.iter().enumerate() {
            if always_only && !slot.run_always {
                info!("PipelineRun {} skipping task {} after failure", key, slot.name);
                continue;
            }

            let task_key = NamespacedName::new(&key.namespace, &slot.task_ref);
            let Some(task) = self.tasks.get_opt(&task_key).await? else {
                warn!("PipelineRun {} task {} not found", key, slot.task_ref);
                let message = format!("task {} not found", slot.task_ref);
                self.record_failed_slot(&mut pr, slot, RunStatus::Failed, &message)
                    .await?;
                always_only = true;
                continue;
            };

            let (vars, declared) = match slot_variables(&pr, &pipeline.spec.variables, slot) {
                Ok(resolved) => resolved,
                Err(e) => {
                    let message = format!("task {}: {}", slot.name, e);
                    warn!("PipelineRun {} {}", key, message);
                    self.record_failed_slot(&mut pr, slot, RunStatus::DataInValid, &message)
                        .await?;
                    invalid.get_or_insert(message);
                    always_only = true;
                    continue;
                }
            };

            let mut task = task.spec;
            task.variables.merge_low_priority(&declared);

            let Some(child) = self.ensure_child(&pr, index, slot, task, &vars).await? else {
                let message = format!(
                    "taskrun {} belongs to another owner",
                    child_name(&pr, index, slot)
                );
                self.record_failed_slot(&mut pr, slot, RunStatus::Failed, &message)
                    .await?;
                always_only = true;
                continue;
            };
            let status = self.wait_for_child(&mut pr, slot, child).await?;

            if status == RunStatus::Successed {
                continue;
            }

            let expression = render::render(&slot.allow_failure.expression(), &vars);
            match logic_expression(&expression, false) {
                Ok(true) => info!("PipelineRun {} tolerating {} task {}", key, status, slot.name),
                Ok(false) => {
                    info!("PipelineRun {} task {} ended {}, only runAlways tasks remain", key, slot.name, status);
                    always_only = true;
                }
                Err(e) => {
                    let message = format!("task {}: {}", slot.name, e);
                    return self.finish(pr, RunStatus::Failed, message).await;
                }
            }
        }

        match invalid {
            Some(message) => self.finish(pr, RunStatus::DataInValid, message).await,
            None => {
                let status = pr.status.aggregate();
                self.finish(pr, status, String::new()).await
            }
        }
    }

    /// Records a slot that never got a TaskRun
    async fn record_failed_slot(
        &self,
        pr: &mut PipelineRun,
        slot: &PipelineTask,
        status: RunStatus,
        message: &str,
    ) -> Result<(), StoreError> {
        pr.status.record_task(PipelineRunTaskStatus::new(
            &slot.name,
            &slot.task_ref,
            TaskRunStatus {
                run_status: status,
                message: message.to_string(),
                ..Default::default()
            },
        ));
        self.commit(pr).await
    }

    /// Returns the slot's TaskRun, creating it unless this run already did
    ///
    /// `None` when a TaskRun with the slot's name exists but is held by
    /// another owner; that TaskRun is left alone.
    async fn ensure_child(
        &self,
        pr: &PipelineRun,
        index: usize,
        slot: &PipelineTask,
        task: TaskSpec,
        vars: &BTreeMap<String, String>,
    ) -> Result<Option<TaskRun>, StoreError> {
        let key = NamespacedName::new(&pr.metadata.namespace, child_name(pr, index, slot));

        if let Some(existing) = self.taskruns.get_opt(&key).await? {
            let child = owned_child(pr, existing);
            if child.is_some() {
                debug!("PipelineRun {} reusing TaskRun {}", pr.key(), key);
            }
            return Ok(child);
        }

        let fields = TargetFields::merge(
            &task,
            pr.spec.type_ref,
            &pr.spec.name_ref,
            &pr.spec.node_name,
        );

        let metadata = ObjectMeta::new(&key.namespace, &key.name)
            .with_label(LABEL_PIPELINE_RUN, &pr.metadata.name)
            .with_label(LABEL_TASK_NAME, &slot.name)
            .with_owner(OwnerRef {
                kind: Kind::PipelineRun,
                name: pr.metadata.name.clone(),
                uid: pr.metadata.uid,
            });

        let child = TaskRun {
            metadata,
            spec: TaskRunSpec {
                task_ref: slot.task_ref.clone(),
                type_ref: Some(fields.type_ref),
                name_ref: fields.name_ref,
                node_name: fields.node_name,
                variables: vars.clone(),
                task: Some(task),
            },
            status: TaskRunStatus::default(),
        };

        match self.taskruns.create(&child).await {
            Ok(created) => {
                info!("PipelineRun {} created TaskRun {}", pr.key(), key);
                Ok(Some(created))
            }
            Err(e) if e.is_already_exists() => {
                let existing = self.taskruns.get(&key).await?;
                Ok(owned_child(pr, existing))
            }
            Err(e) => Err(e),
        }
    }

    /// Polls the child until it finishes, mirroring its status into `pr`
    async fn wait_for_child(
        &self,
        pr: &mut PipelineRun,
        slot: &PipelineTask,
        mut child: TaskRun,
    ) -> Result<RunStatus, StoreError> {
        loop {
            let mut entry =
                PipelineRunTaskStatus::new(&slot.name, &slot.task_ref, child.status.clone());
            entry.task_run = child.metadata.name.clone();

            let changed = !pr.status.tasks.contains(&entry);
            pr.status.record_task(entry);
            if changed {
                self.commit(pr).await?;
            }

            if child.status.run_status.is_finished() {
                return Ok(child.status.run_status);
            }

            tokio::time::sleep(self.settings.poll_interval).await;

            child = match self.taskruns.get_opt(&child.key()).await? {
                Some(latest) => latest,
                None => {
                    warn!("PipelineRun {} lost TaskRun {}", pr.key(), child.key());
                    let mut entry = PipelineRunTaskStatus::new(
                        &slot.name,
                        &slot.task_ref,
                        TaskRunStatus {
                            run_status: RunStatus::Aborted,
                            message: format!("taskrun {} was deleted", child.metadata.name),
                            ..child.status
                        },
                    );
                    entry.task_run = child.metadata.name;
                    pr.status.record_task(entry);
                    self.commit(pr).await?;
                    return Ok(RunStatus::Aborted);
                }
            };
        }
    }

    async fn finish(
        &self,
        mut pr: PipelineRun,
        status: RunStatus,
        message: String,
    ) -> Result<PipelineRun, StoreError> {
        if message.is_empty() {
            info!("PipelineRun {} finished: {}", pr.key(), status);
        } else {
            warn!("PipelineRun {} finished: {} ({})", pr.key(), status, message);
        }

        pr.status.run_status = status;
        pr.status.message = message;
        self.commit(&pr).await?;
        Ok(pr)
    }

    async fn commit(&self, pr: &PipelineRun) -> Result<(), StoreError> {
        commit_status(&self.pipelineruns, pr, &self.settings).await
    }
}

/// Child TaskRun name: `{run}-{slot index}-{slot}-{run uid prefix}`
///
/// The index keeps slots sharing a name apart and the uid prefix keeps
/// PipelineRuns whose names concatenate alike apart.
fn child_name(pr: &PipelineRun, index: usize, slot: &PipelineTask) -> String {
    let uid = pr.metadata.uid.simple().to_string();
    format!("{}-{}-{}-{}", pr.metadata.name, index, slot.name, &uid[..8])
}

fn owned_child(pr: &PipelineRun, child: TaskRun) -> Option<TaskRun> {
    let owned = child
        .metadata
        .owner
        .as_ref()
        .is_some_and(|o| o.kind == Kind::PipelineRun && o.uid == pr.metadata.uid);
    if owned {
        Some(child)
    } else {
        warn!(
            "PipelineRun {} found TaskRun {} held by another owner",
            pr.key(),
            child.key()
        );
        None
    }
}

/// Values for a slot's TaskRun plus the Pipeline's declared variables
///
/// Values come from the run, then the slot, then the Pipeline's defaults.
/// The declared variables carry those values (rendered against the results
/// of finished slots) and must pass their constraints.
fn slot_variables(
    pr: &PipelineRun,
    declared: &Variables,
    slot: &PipelineTask,
) -> Result<(BTreeMap<String, String>, Variables), VariableError> {
    let defaults = declared.effective_values();
    let values = render::resolve(&[&pr.spec.variables, &slot.variables, &defaults]);

    let results = pr.status.task_results();
    let rendered = RenderContext::new(&values)
        .with_results(&results)
        .render_values();

    let mut declared = declared.clone();
    declared.apply_values(&rendered);
    declared.check()?;
    Ok((values, declared))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeExecutor, Harness};
    use fleetops_core::domain::Variable;
    use fleetops_core::domain::task::Step;

    #[tokio::test]
    async fn test_failure_skips_normal_tasks_but_runs_always() {
        let h = Harness::new(FakeExecutor::new().fail("broken", "boom")).await;
        let _worker = h.spawn_taskrun_worker();
        h.create_task("t1", vec![Step::command("s", "broken")]).await;
        h.create_task("t2", vec![Step::command("s", "echo two")]).await;
        h.create_task("t3", vec![Step::command("s", "echo three")]).await;
        h.create_pipeline(
            "p",
            vec![
                PipelineTask::new("first", "t1"),
                PipelineTask::new("second", "t2"),
                PipelineTask::new("third", "t3").run_always(),
            ],
        )
        .await;
        let pr = h.create_pipeline_run("p-1", "p").await;

        let done = h.orchestrator().run(pr).await.unwrap();

        assert_eq!(done.status.run_status, RunStatus::Failed);
        let names: Vec<&str> = done.status.tasks.iter().map(|t| t.task_name.as_str()).collect();
        assert_eq!(names, vec!["first", "third"]);
        assert_eq!(done.status.tasks[0].task_run_status.run_status, RunStatus::Failed);
        assert_eq!(done.status.tasks[1].task_run_status.run_status, RunStatus::Successed);

        let contents: Vec<String> = h.executor.calls().into_iter().map(|c| c.content).collect();
        assert_eq!(contents, vec!["broken", "echo three"]);
    }

    #[tokio::test]
    async fn test_allowed_failure_keeps_going() {
        let h = Harness::new(FakeExecutor::new().fail("broken", "boom")).await;
        let _worker = h.spawn_taskrun_worker();
        h.create_task("t1", vec![Step::command("s", "broken")]).await;
        h.create_task("t2", vec![Step::command("s", "echo two")]).await;

        let mut first = PipelineTask::new("first", "t1");
        first.allow_failure = true.into();
        h.create_pipeline("p", vec![first, PipelineTask::new("second", "t2")])
            .await;
        let pr = h.create_pipeline_run("p-1", "p").await;

        let done = h.orchestrator().run(pr).await.unwrap();

        assert_eq!(done.status.tasks.len(), 2);
        assert_eq!(done.status.run_status, RunStatus::Failed);
        assert_eq!(h.executor.call_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_task_enters_always_only() {
        let h = Harness::new(FakeExecutor::new()).await;
        let _worker = h.spawn_taskrun_worker();
        h.create_task("t2", vec![Step::command("s", "echo two")]).await;
        h.create_pipeline(
            "p",
            vec![
                PipelineTask::new("first", "ghost"),
                PipelineTask::new("second", "t2"),
            ],
        )
        .await;
        let pr = h.create_pipeline_run("p-1", "p").await;

        let done = h.orchestrator().run(pr).await.unwrap();

        assert_eq!(done.status.run_status, RunStatus::Failed);
        assert_eq!(done.status.tasks.len(), 1);
        assert!(done.status.tasks[0].task_run_status.message.contains("ghost"));
        assert_eq!(h.executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_results_and_variables_flow_between_tasks() {
        let h = Harness::new(FakeExecutor::new()).await;
        let _worker = h.spawn_taskrun_worker();
        h.create_task("lookup", vec![Step::command("ip", "echo 10.0.0.1")])
            .await;
        h.create_task("use", vec![Step::command("s", "echo ${env} ${region} ${tasks.find.results.ip}")])
            .await;

        let mut use_slot = PipelineTask::new("apply", "use");
        use_slot
            .variables
            .insert("env".to_string(), "from-slot".to_string());
        use_slot
            .variables
            .insert("region".to_string(), "from-slot".to_string());
        let mut pipeline = h.pipeline("p", vec![PipelineTask::new("find", "lookup"), use_slot]);
        pipeline
            .spec
            .variables
            .insert("region", Variable::with_default("from-pipeline"));
        h.pipelines.create(&pipeline).await.unwrap();

        let mut pr = h.pipeline_run("p-1", "p");
        pr.spec.variables.insert("env".to_string(), "from-run".to_string());
        let pr = h.pipelineruns.create(&pr).await.unwrap();

        let done = h.orchestrator().run(pr).await.unwrap();

        assert_eq!(done.status.run_status, RunStatus::Successed);
        let calls = h.executor.calls();
        assert_eq!(calls[1].content, "echo from-run from-slot 10.0.0.1");

        let child = h
            .taskruns
            .get(&NamespacedName::new("default", &done.status.tasks[1].task_run))
            .await
            .unwrap();
        assert_eq!(child.metadata.labels[LABEL_PIPELINE_RUN], "p-1");
        assert!(child.metadata.is_owned_by(Kind::PipelineRun, "p-1"));
        assert!(child.spec.task.is_some());
    }

    #[tokio::test]
    async fn test_resume_reuses_existing_children() {
        let h = Harness::new(FakeExecutor::new()).await;
        let _worker = h.spawn_taskrun_worker();
        h.create_task("t1", vec![Step::command("s", "echo one")]).await;
        h.create_pipeline("p", vec![PipelineTask::new("first", "t1")])
            .await;
        let pr = h.create_pipeline_run("p-1", "p").await;

        let done = h.orchestrator().run(pr).await.unwrap();
        assert_eq!(h.executor.call_count(), 1);

        // Pretend the controller died before the final status landed
        let mut replay = done.clone();
        replay.status.run_status = RunStatus::Running;
        let again = h.orchestrator().run(replay).await.unwrap();

        assert_eq!(again.status.run_status, RunStatus::Successed);
        assert_eq!(again.status.start_time, done.status.start_time);
        assert_eq!(again.status.tasks.len(), 1);
        assert_eq!(h.executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_finished_pipeline_run_makes_no_calls() {
        let h = Harness::new(FakeExecutor::new()).await;
        h.create_pipeline("p", vec![]).await;
        let mut pr = h.pipeline_run("p-1", "p");
        pr.status.run_status = RunStatus::Failed;

        let again = h.orchestrator().run(pr.clone()).await.unwrap();
        assert_eq!(again, pr);
        assert_eq!(h.executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_pipeline_is_data_invalid() {
        let h = Harness::new(FakeExecutor::new()).await;
        let pr = h.create_pipeline_run("p-1", "ghost").await;

        let done = h.orchestrator().run(pr).await.unwrap();
        assert_eq!(done.status.run_status, RunStatus::DataInValid);
    }

    #[tokio::test]
    async fn test_slots_sharing_a_name_get_their_own_runs() {
        let h = Harness::new(FakeExecutor::new()).await;
        let _worker = h.spawn_taskrun_worker();
        h.create_task("a", vec![Step::command("s", "echo A")]).await;
        h.create_task("b", vec![Step::command("s", "echo B")]).await;
        h.create_pipeline(
            "p",
            vec![PipelineTask::new("deploy", "a"), PipelineTask::new("deploy", "b")],
        )
        .await;
        let pr = h.create_pipeline_run("p-1", "p").await;

        let done = h.orchestrator().run(pr).await.unwrap();

        assert_eq!(done.status.run_status, RunStatus::Successed);
        assert_eq!(done.status.tasks.len(), 2);
        assert_ne!(done.status.tasks[0].task_run, done.status.tasks[1].task_run);
        let contents: Vec<String> = h.executor.calls().into_iter().map(|c| c.content).collect();
        assert_eq!(contents, vec!["echo A", "echo B"]);
    }

    #[tokio::test]
    async fn test_child_names_stay_apart_across_runs() {
        let h = Harness::new(FakeExecutor::new()).await;
        let _worker = h.spawn_taskrun_worker();
        h.create_task("t", vec![Step::command("s", "echo hi")]).await;
        h.create_pipeline("one", vec![PipelineTask::new("1-x", "t")]).await;
        h.create_pipeline("two", vec![PipelineTask::new("x", "t")]).await;

        let first = h.create_pipeline_run("p", "one").await;
        let first = h.orchestrator().run(first).await.unwrap();
        let second = h.create_pipeline_run("p-1", "two").await;
        let second = h.orchestrator().run(second).await.unwrap();

        assert_eq!(first.status.run_status, RunStatus::Successed);
        assert_eq!(second.status.run_status, RunStatus::Successed);
        assert_eq!(h.executor.call_count(), 2);

        let child = h
            .taskruns
            .get(&NamespacedName::new("default", &first.status.tasks[0].task_run))
            .await
            .unwrap();
        assert!(child.metadata.is_owned_by(Kind::PipelineRun, "p"));
        assert_ne!(first.status.tasks[0].task_run, second.status.tasks[0].task_run);
    }

    #[tokio::test]
    async fn test_taskrun_held_by_another_owner_is_left_alone() {
        let h = Harness::new(FakeExecutor::new()).await;
        h.create_task("t", vec![Step::command("s", "echo hi")]).await;
        h.create_pipeline("p", vec![PipelineTask::new("first", "t")]).await;
        let pr = h.create_pipeline_run("p-1", "p").await;

        let slot = PipelineTask::new("first", "t");
        let mut foreign = h.task_run(&child_name(&pr, 0, &slot), "t");
        foreign.metadata.owner = Some(OwnerRef {
            kind: Kind::PipelineRun,
            name: "other".to_string(),
            uid: uuid::Uuid::new_v4(),
        });
        let foreign = h.taskruns.create(&foreign).await.unwrap();

        let done = h.orchestrator().run(pr).await.unwrap();

        assert_eq!(done.status.run_status, RunStatus::Failed);
        assert!(done.status.tasks[0].task_run_status.message.contains("another owner"));
        let kept = h.taskruns.get(&foreign.key()).await.unwrap();
        assert_eq!(kept.metadata.uid, foreign.metadata.uid);
        assert!(kept.metadata.is_owned_by(Kind::PipelineRun, "other"));
        assert_eq!(h.executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_repeated_slot_is_data_invalid() {
        let h = Harness::new(FakeExecutor::new()).await;
        h.create_task("t", vec![Step::command("s", "echo hi")]).await;
        h.create_pipeline(
            "p",
            vec![PipelineTask::new("deploy", "t"), PipelineTask::new("deploy", "t")],
        )
        .await;
        let pr = h.create_pipeline_run("p-1", "p").await;

        let done = h.orchestrator().run(pr).await.unwrap();

        assert_eq!(done.status.run_status, RunStatus::DataInValid);
        assert!(done.status.message.contains("listed twice"));
        assert_eq!(h.executor.call_count(), 0);
    }

    fn versioned_pipeline(h: &Harness) -> Pipeline {
        let mut pipeline = h.pipeline(
            "release",
            vec![
                PipelineTask::new("deploy", "deploy"),
                PipelineTask::new("cleanup", "cleanup").run_always(),
            ],
        );
        pipeline.spec.variables.insert(
            "version",
            Variable {
                required: true,
                regex: "^[0-9.]+$".to_string(),
                ..Default::default()
            },
        );
        pipeline
    }

    #[tokio::test]
    async fn test_pipeline_variable_constraints_are_enforced() {
        let h = Harness::new(FakeExecutor::new()).await;
        let _worker = h.spawn_taskrun_worker();
        h.create_task("deploy", vec![Step::command("s", "deploy ${version}")])
            .await;
        h.create_task("cleanup", vec![Step::command("s", "echo clean")])
            .await;
        h.pipelines.create(&versioned_pipeline(&h)).await.unwrap();
        let pr = h.create_pipeline_run("r-1", "release").await;

        let done = h.orchestrator().run(pr).await.unwrap();

        assert_eq!(done.status.run_status, RunStatus::DataInValid);
        assert!(done.status.message.contains("version"));
        assert_eq!(done.status.tasks.len(), 2);
        for entry in &done.status.tasks {
            assert_eq!(entry.task_run_status.run_status, RunStatus::DataInValid);
            assert!(entry.task_run.is_empty());
        }
        assert_eq!(h.executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_pipeline_variable_satisfied_by_run() {
        let h = Harness::new(FakeExecutor::new()).await;
        let _worker = h.spawn_taskrun_worker();
        h.create_task("deploy", vec![Step::command("s", "deploy ${version}")])
            .await;
        h.create_task("cleanup", vec![Step::command("s", "echo clean")])
            .await;
        h.pipelines.create(&versioned_pipeline(&h)).await.unwrap();

        let mut pr = h.pipeline_run("r-1", "release");
        pr.spec.variables.insert("version".to_string(), "1.2.3".to_string());
        let pr = h.pipelineruns.create(&pr).await.unwrap();

        let done = h.orchestrator().run(pr).await.unwrap();

        assert_eq!(done.status.run_status, RunStatus::Successed);
        let contents: Vec<String> = h.executor.calls().into_iter().map(|c| c.content).collect();
        assert_eq!(contents, vec!["deploy 1.2.3", "echo clean"]);
    }

    #[tokio::test]
    async fn test_pipeline_variables_enrich_task_snapshot() {
        let h = Harness::new(FakeExecutor::new()).await;
        let _worker = h.spawn_taskrun_worker();
        let mut task = h.task("show", vec![Step::command("s", "echo ${region}")]);
        task.spec.variables.insert("region", Variable::default());
        h.tasks.create(&task).await.unwrap();

        let mut pipeline = h.pipeline("p", vec![PipelineTask::new("show", "show")]);
        pipeline.spec.variables.insert(
            "region",
            Variable {
                default: "eu".to_string(),
                desc: "deployment region".to_string(),
                ..Default::default()
            },
        );
        h.pipelines.create(&pipeline).await.unwrap();
        let pr = h.create_pipeline_run("p-1", "p").await;

        let done = h.orchestrator().run(pr).await.unwrap();

        assert_eq!(done.status.run_status, RunStatus::Successed);
        assert_eq!(h.executor.calls()[0].content, "echo eu");
        let child = h
            .taskruns
            .get(&NamespacedName::new("default", &done.status.tasks[0].task_run))
            .await
            .unwrap();
        let snapshot = child.spec.task.unwrap();
        let region = snapshot.variables.get("region").unwrap();
        assert_eq!(region.default, "eu");
        assert_eq!(region.desc, "deployment region");
    }
}
