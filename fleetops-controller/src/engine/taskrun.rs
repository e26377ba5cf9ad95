use fleetops_core::domain::pipelinerun::PipelineRun;
use fleetops_core::domain::target::{Cluster, Host};
use fleetops_core::domain::task::{StepAction, Task, TaskSpec};
use fleetops_core::domain::taskrun::{RESULT_OUTPUT, StepStatus, TaskRun};
use fleetops_core::domain::{Kind, NamespacedName, Resource, RunStatus};
use fleetops_core::render::{self, RenderContext, StepOutputs, TaskResults, logic_expression};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::executor::{Executor, NodeInventory, Target};
use crate::store::{ObjectStore, Objects, StoreError};

use super::targets::{TargetError, TargetFields, resolve_targets};
use super::{EngineSettings, commit_status};

/// How a target's step loop ended
enum Outcome {
    Completed,
    /// A `when` or `allowFailure` expression could not be evaluated
    Halted(String),
}

/// Executes the steps of one TaskRun
pub struct TaskRunEngine {
    taskruns: Objects<TaskRun>,
    tasks: Objects<Task>,
    pipelineruns: Objects<PipelineRun>,
    hosts: Objects<Host>,
    clusters: Objects<Cluster>,
    executor: Arc<dyn Executor>,
    inventory: Arc<dyn NodeInventory>,
    settings: EngineSettings,
}

impl TaskRunEngine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        executor: Arc<dyn Executor>,
        inventory: Arc<dyn NodeInventory>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            taskruns: Objects::new(store.clone()),
            tasks: Objects::new(store.clone()),
            pipelineruns: Objects::new(store.clone()),
            hosts: Objects::new(store.clone()),
            clusters: Objects::new(store),
            executor,
            inventory,
            settings,
        }
    }

    /// Drives an unstarted TaskRun to a terminal status
    ///
    /// Runs that have already left the empty status are returned untouched,
    /// so replaying a notification never executes a step twice.
    ///
    /// # Returns
    /// The run with its final status, or a store error when a status commit
    /// failed (NotFound when the run was deleted meanwhile)
    pub async fn run(&self, mut run: TaskRun) -> Result<TaskRun, StoreError> {
        if !run.status.run_status.is_empty() {
            debug!("TaskRun {} already {}, skipping", run.key(), run.status.run_status);
            return Ok(run);
        }

        let key = run.key();
        let task = match self.snapshot(&run).await? {
            Some(task) => task,
            None => {
                let message = format!("task {} not found", run.spec.task_ref);
                return self.finish(run, RunStatus::DataInValid, message).await;
            }
        };

        run.status.set_run_status(RunStatus::Init);
        self.commit(&run).await?;

        let results = self.sibling_results(&run).await?;

        let vars = match self.resolve_variables(&run, &task, &results) {
            Ok(vars) => vars,
            Err(message) => return self.finish(run, RunStatus::DataInValid, message).await,
        };

        let fields = TargetFields::merge(
            &task,
            run.spec.type_ref,
            &run.spec.name_ref,
            &run.spec.node_name,
        );
        let targets = match resolve_targets(
            &self.hosts,
            &self.clusters,
            self.inventory.as_ref(),
            &key.namespace,
            &task,
            &fields,
            &self.settings.default_runtime_image,
        )
        .await
        {
            Ok(targets) => targets,
            Err(TargetError::Store(e)) if !e.is_not_found() => return Err(e),
            Err(e) => return self.finish(run, RunStatus::Failed, e.to_string()).await,
        };

        info!("TaskRun {} running on {} target(s)", key, targets.len());
        run.status.set_run_status(RunStatus::Running);
        self.commit(&run).await?;

        let mut last_results = BTreeMap::new();
        for target in &targets {
            let (outputs, outcome) = self
                .run_target(&mut run, &task, target, &vars, &results)
                .await?;
            last_results = outputs;

            if let Outcome::Halted(message) = outcome {
                return self.finish(run, RunStatus::Failed, message).await;
            }
        }

        run.status.results = last_results;
        let status = if run.status.any_node_failed() {
            RunStatus::Failed
        } else {
            RunStatus::Successed
        };
        self.finish(run, status, String::new()).await
    }

    /// Task captured at creation time, or the stored Task for older runs
    async fn snapshot(&self, run: &TaskRun) -> Result<Option<TaskSpec>, StoreError> {
        if let Some(task) = &run.spec.task {
            return Ok(Some(task.clone()));
        }

        let key = NamespacedName::new(&run.metadata.namespace, &run.spec.task_ref);
        Ok(self.tasks.get_opt(&key).await?.map(|t| t.spec))
    }

    /// Results of finished siblings when the run belongs to a PipelineRun
    async fn sibling_results(&self, run: &TaskRun) -> Result<TaskResults, StoreError> {
        let Some(owner) = run
            .metadata
            .owner
            .as_ref()
            .filter(|o| o.kind == Kind::PipelineRun)
        else {
            return Ok(TaskResults::new());
        };

        let key = NamespacedName::new(&run.metadata.namespace, &owner.name);
        Ok(self
            .pipelineruns
            .get_opt(&key)
            .await?
            .map(|pr| pr.status.task_results())
            .unwrap_or_default())
    }

    /// Caller values, then the environment, then declared defaults
    fn resolve_variables(
        &self,
        run: &TaskRun,
        task: &TaskSpec,
        results: &TaskResults,
    ) -> Result<BTreeMap<String, String>, String> {
        let env = if self.settings.env_variables {
            environment_values(task)
        } else {
            BTreeMap::new()
        };
        let defaults = task.variables.effective_values();
        let merged = render::resolve(&[&run.spec.variables, &env, &defaults]);

        let rendered = RenderContext::new(&merged)
            .with_results(results)
            .render_values();

        let mut declared = task.variables.clone();
        declared.apply_values(&rendered);
        declared.check().map_err(|e| e.to_string())?;

        Ok(rendered)
    }

    /// Runs every step on one target, committing after each record
    async fn run_target(
        &self,
        run: &mut TaskRun,
        task: &TaskSpec,
        target: &Target,
        base_vars: &BTreeMap<String, String>,
        results: &TaskResults,
    ) -> Result<(BTreeMap<String, String>, Outcome), StoreError> {
        let node = target.identity().to_string();
        run.status.start_node(&node);
        self.commit(run).await?;

        let mut vars = base_vars.clone();
        match target {
            Target::Host { .. } => vars.insert("hostname".to_string(), node.clone()),
            Target::Node { .. } => vars.insert("nodename".to_string(), node.clone()),
        };

        let mut outputs = StepOutputs::new();
        let mut last_output = None;

        for step in &task.steps {
            let ctx = RenderContext::new(&vars)
                .with_results(results)
                .with_step_outputs(&outputs);

            match logic_expression(&ctx.render(&step.when), true) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("TaskRun {} step {} skipped on {}", run.key(), step.name, node);
                    continue;
                }
                Err(e) => {
                    run.status.set_node_status(&node, RunStatus::Failed);
                    return Ok((outputs, Outcome::Halted(format!("step {}: {}", step.name, e))));
                }
            }

            let (step_cmd, result) = match &step.action {
                StepAction::Command { content } => {
                    let content = ctx.render(content);
                    let result = self.executor.run_command(target, &content, task.sudo).await;
                    (content, result)
                }
                StepAction::Transfer {
                    local_file,
                    remote_file,
                    direction,
                } => {
                    let local = ctx.render(local_file);
                    let remote = ctx.render(remote_file);
                    let result = self
                        .executor
                        .transfer_file(target, *direction, &local, &remote, task.sudo)
                        .await
                        .map(|()| String::new());
                    (format!("{} {} {}", direction, local, remote), result)
                }
            };

            let (step_status, step_output) = match result {
                Ok(output) => (RunStatus::Successed, output),
                Err(e) => {
                    warn!("TaskRun {} step {} failed on {}: {}", run.key(), step.name, node, e);
                    (RunStatus::Failed, e.output())
                }
            };
            debug!("TaskRun {} step {} output: {}", run.key(), step.name, step_output);

            let cleaned = clean_output(&step_output);
            run.status.record_step(
                &node,
                StepStatus {
                    step_name: step.name.clone(),
                    step_cmd,
                    step_output,
                    step_status,
                },
            );
            self.commit(run).await?;

            outputs.insert(step.name.clone(), cleaned.clone());
            vars.insert("result".to_string(), cleaned.clone());
            vars.insert(RESULT_OUTPUT.to_string(), cleaned.clone());
            vars.insert("status".to_string(), step_status.to_string());
            last_output = Some(cleaned);

            if step_status == RunStatus::Failed {
                let allow = {
                    let ctx = RenderContext::new(&vars)
                        .with_results(results)
                        .with_step_outputs(&outputs);
                    logic_expression(&ctx.render(&step.allow_failure.expression()), false)
                };

                match allow {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        return Ok((outputs, Outcome::Halted(format!("step {}: {}", step.name, e))));
                    }
                }
            }
        }

        // No step ran at all
        if run
            .status
            .node_status
            .get(&node)
            .is_some_and(|n| n.run_status == RunStatus::Running)
        {
            run.status.set_node_status(&node, RunStatus::Successed);
        }

        if let Some(output) = last_output {
            outputs.insert(RESULT_OUTPUT.to_string(), output);
        }
        Ok((outputs, Outcome::Completed))
    }

    async fn finish(
        &self,
        mut run: TaskRun,
        status: RunStatus,
        message: String,
    ) -> Result<TaskRun, StoreError> {
        if message.is_empty() {
            info!("TaskRun {} finished: {}", run.key(), status);
        } else {
            warn!("TaskRun {} finished: {} ({})", run.key(), status, message);
        }

        run.status.set_run_status(status);
        run.status.message = message;
        self.commit(&run).await?;
        Ok(run)
    }

    async fn commit(&self, run: &TaskRun) -> Result<(), StoreError> {
        commit_status(&self.taskruns, run, &self.settings).await
    }
}

/// Values of declared variables found in the process environment
///
/// The exact name is tried first, then its upper-case form.
fn environment_values(task: &TaskSpec) -> BTreeMap<String, String> {
    task.variables
        .iter()
        .filter_map(|(name, _)| {
            std::env::var(name)
                .or_else(|_| std::env::var(name.to_uppercase()))
                .ok()
                .map(|value| (name.clone(), value))
        })
        .collect()
}

/// Output as exposed to later templates: no trailing whitespace or quotes
fn clean_output(output: &str) -> String {
    output.trim_end().replace('"', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::NodeInfo;
    use crate::testing::{FakeExecutor, Harness, node};
    use fleetops_core::domain::Variable;
    use fleetops_core::domain::target::TargetKind;
    use fleetops_core::domain::task::Step;

    #[tokio::test]
    async fn test_echo_ok_succeeds() {
        let h = Harness::new(FakeExecutor::new()).await;
        h.create_task("list-clusters", vec![Step::command("list", "echo ok")])
            .await;
        let run = h.create_task_run("list-clusters-1", "list-clusters").await;

        let done = h.engine().run(run).await.unwrap();

        assert_eq!(done.status.run_status, RunStatus::Successed);
        let node = &done.status.node_status["web-1"];
        assert_eq!(node.steps.len(), 1);
        assert_eq!(node.steps[0].step_status, RunStatus::Successed);
        assert_eq!(node.steps[0].step_output, "ok\n");
        assert_eq!(done.status.results["list"], "ok");
        assert_eq!(done.status.results[RESULT_OUTPUT], "ok");

        let stored = h.taskruns.get(&done.key()).await.unwrap();
        assert_eq!(stored.status, done.status);
    }

    #[tokio::test]
    async fn test_finished_run_makes_no_calls() {
        let executor = FakeExecutor::new();
        let h = Harness::new(executor).await;
        h.create_task("t", vec![Step::command("s", "echo hi")]).await;
        let run = h.create_task_run("t-1", "t").await;

        let done = h.engine().run(run).await.unwrap();
        assert_eq!(h.executor.call_count(), 1);

        let again = h.engine().run(done.clone()).await.unwrap();
        assert_eq!(again, done);
        assert_eq!(h.executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_when_false_is_skipped() {
        let h = Harness::new(FakeExecutor::new()).await;
        h.create_task(
            "t",
            vec![
                Step::command("skipped", "echo no").when("${mode} == fast"),
                Step::command("ran", "echo yes"),
            ],
        )
        .await;
        let run = h
            .create_task_run_with("t-1", "t", [("mode", "slow")])
            .await;

        let done = h.engine().run(run).await.unwrap();

        assert_eq!(done.status.run_status, RunStatus::Successed);
        let steps = &done.status.node_status["web-1"].steps;
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].step_name, "ran");
        assert_eq!(h.executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_halts_unless_allowed() {
        let h = Harness::new(FakeExecutor::new().fail("broken", "boom")).await;
        h.create_task(
            "tolerant",
            vec![
                Step::command("a", "broken").allow_failure(true),
                Step::command("b", "echo after"),
            ],
        )
        .await;
        h.create_task(
            "strict",
            vec![Step::command("a", "broken"), Step::command("b", "echo after")],
        )
        .await;

        let tolerant = h.create_task_run("tolerant-1", "tolerant").await;
        let done = h.engine().run(tolerant).await.unwrap();
        assert_eq!(done.status.run_status, RunStatus::Successed);
        assert_eq!(done.status.node_status["web-1"].steps.len(), 2);
        assert_eq!(done.status.node_status["web-1"].steps[0].step_output, "boom");

        let strict = h.create_task_run("strict-1", "strict").await;
        let done = h.engine().run(strict).await.unwrap();
        assert_eq!(done.status.run_status, RunStatus::Failed);
        assert_eq!(done.status.node_status["web-1"].steps.len(), 1);
    }

    #[tokio::test]
    async fn test_allow_failure_expression_uses_step_status() {
        let h = Harness::new(FakeExecutor::new().fail("broken", "")).await;
        h.create_task(
            "t",
            vec![
                Step::command("a", "broken").allow_failure("${tolerate}"),
                Step::command("b", "echo after"),
            ],
        )
        .await;
        let run = h.create_task_run_with("t-1", "t", [("tolerate", "true")]).await;

        let done = h.engine().run(run).await.unwrap();
        assert_eq!(done.status.node_status["web-1"].steps.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_when_is_hard_stop() {
        let h = Harness::new(FakeExecutor::new()).await;
        h.create_task("t", vec![Step::command("a", "echo a").when("1 == 2 == 3")])
            .await;
        let run = h.create_task_run("t-1", "t").await;

        let done = h.engine().run(run).await.unwrap();
        assert_eq!(done.status.run_status, RunStatus::Failed);
        assert!(done.status.message.contains("step a"));
        assert_eq!(h.executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_step_output_references() {
        let h = Harness::new(FakeExecutor::new()).await;
        h.create_task(
            "t",
            vec![
                Step::command("first", "echo \"10.0.0.1\""),
                Step::command("second", "echo ip=${steps.first.output} last=${result}"),
            ],
        )
        .await;
        let run = h.create_task_run("t-1", "t").await;

        let done = h.engine().run(run).await.unwrap();
        let steps = &done.status.node_status["web-1"].steps;
        assert_eq!(steps[1].step_cmd, "echo ip=10.0.0.1 last=10.0.0.1");
    }

    #[tokio::test]
    async fn test_missing_task_is_data_invalid() {
        let h = Harness::new(FakeExecutor::new()).await;
        let run = h.create_task_run("orphan-1", "nope").await;

        let done = h.engine().run(run).await.unwrap();
        assert_eq!(done.status.run_status, RunStatus::DataInValid);
        assert_eq!(h.executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_required_variable_is_data_invalid() {
        let h = Harness::new(FakeExecutor::new()).await;
        let mut task = h.task("t", vec![Step::command("a", "echo ${version}")]);
        task.spec.variables.insert(
            "version",
            Variable {
                required: true,
                ..Default::default()
            },
        );
        h.tasks.create(&task).await.unwrap();

        let run = h.create_task_run("t-1", "t").await;
        let done = h.engine().run(run).await.unwrap();
        assert_eq!(done.status.run_status, RunStatus::DataInValid);
        assert!(done.status.message.contains("version"));

        let run = h.create_task_run_with("t-2", "t", [("version", "1.2")]).await;
        let done = h.engine().run(run).await.unwrap();
        assert_eq!(done.status.run_status, RunStatus::Successed);
        assert_eq!(done.status.node_status["web-1"].steps[0].step_output, "1.2\n");
    }

    #[tokio::test]
    async fn test_missing_host_fails_run() {
        let h = Harness::new(FakeExecutor::new()).await;
        let mut task = h.task("t", vec![Step::command("a", "echo a")]);
        task.spec.name_ref = "ghost".to_string();
        h.tasks.create(&task).await.unwrap();

        let run = h.create_task_run("t-1", "t").await;
        let done = h.engine().run(run).await.unwrap();
        assert_eq!(done.status.run_status, RunStatus::Failed);
        assert!(done.status.message.contains("ghost"));
    }

    async fn create_fanout_task(h: &Harness) {
        let mut task = h.task(
            "fanout",
            vec![
                Step::command("first", "echo ${nodename}"),
                Step::command("check", "check-disk"),
                Step::command("last", "echo done"),
            ],
        );
        task.spec.type_ref = Some(TargetKind::Cluster);
        task.spec.name_ref.clear();
        task.spec.all = true;
        h.tasks.create(&task).await.unwrap();
    }

    fn cluster_nodes() -> Vec<NodeInfo> {
        vec![
            node("master-1", true, true),
            node("worker-1", false, true),
            node("worker-2", false, false),
        ]
    }

    #[tokio::test]
    async fn test_all_nodes_get_their_own_step_lists() {
        let h = Harness::new(FakeExecutor::new()).await;
        create_fanout_task(&h).await;
        let run = h.create_task_run("fanout-1", "fanout").await;

        let done = h.engine_with_nodes(cluster_nodes()).run(run).await.unwrap();

        assert_eq!(done.status.run_status, RunStatus::Successed);
        let nodes: Vec<&str> = done.status.node_status.keys().map(String::as_str).collect();
        assert_eq!(nodes, vec!["master-1", "worker-1"]);
        for (name, status) in &done.status.node_status {
            assert_eq!(status.run_status, RunStatus::Successed);
            let steps: Vec<&str> = status.steps.iter().map(|s| s.step_name.as_str()).collect();
            assert_eq!(steps, vec!["first", "check", "last"]);
            assert_eq!(status.steps[0].step_output, format!("{}\n", name));
        }

        let targets: Vec<String> = h.executor.calls().into_iter().map(|c| c.target).collect();
        assert_eq!(
            targets,
            vec!["master-1", "master-1", "master-1", "worker-1", "worker-1", "worker-1"]
        );
    }

    #[tokio::test]
    async fn test_one_failing_node_fails_the_run() {
        let h = Harness::new(FakeExecutor::new().fail_on("worker-1", "check-disk", "disk full")).await;
        create_fanout_task(&h).await;
        let run = h.create_task_run("fanout-1", "fanout").await;

        let done = h.engine_with_nodes(cluster_nodes()).run(run).await.unwrap();

        assert_eq!(done.status.run_status, RunStatus::Failed);

        let master = &done.status.node_status["master-1"];
        assert_eq!(master.run_status, RunStatus::Successed);
        assert_eq!(master.steps.len(), 3);

        let worker = &done.status.node_status["worker-1"];
        assert_eq!(worker.run_status, RunStatus::Failed);
        assert_eq!(worker.steps.len(), 2);
        assert_eq!(worker.steps[1].step_status, RunStatus::Failed);
        assert_eq!(worker.steps[1].step_output, "disk full");

        let stored = h.taskruns.get(&done.key()).await.unwrap();
        assert_eq!(stored.status.node_status, done.status.node_status);
    }

    #[test]
    fn test_clean_output() {
        assert_eq!(clean_output("\"abc\"\n\n"), "abc");
        assert_eq!(clean_output("  lead\n"), "  lead");
    }
}
