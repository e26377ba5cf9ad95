//! Test doubles and fixtures shared by controller tests

use async_trait::async_trait;
use fleetops_core::domain::pipeline::{Pipeline, PipelineSpec, PipelineTask};
use fleetops_core::domain::pipelinerun::{PipelineRun, PipelineRunSpec, PipelineRunStatus};
use fleetops_core::domain::target::{
    Cluster, ClusterSpec, ClusterStatus, Host, HostSpec, HostStatus, TargetKind,
};
use fleetops_core::domain::task::{Direction, Step, Task, TaskSpec};
use fleetops_core::domain::taskrun::{TaskRun, TaskRunSpec, TaskRunStatus};
use fleetops_core::domain::{Kind, ObjectMeta};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::engine::{EngineSettings, PipelineRunOrchestrator, TaskRunEngine};
use crate::executor::{ClusterRef, ExecError, Executor, NodeInfo, NodeInventory, Target};
use crate::store::{EventType, MemoryStore, ObjectStore, Objects};

pub const NAMESPACE: &str = "default";
pub const HOST: &str = "web-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target: String,
    pub content: String,
}

/// Executor that records calls instead of running them
///
/// Commands containing a `fail` pattern fail with its output and those
/// containing a `reply` pattern print its output. Otherwise `echo X` prints
/// `X\n` and anything else prints nothing.
#[derive(Default)]
pub struct FakeExecutor {
    calls: Mutex<Vec<Call>>,
    failures: Vec<Failure>,
    replies: Vec<(String, String)>,
}

struct Failure {
    /// Only this host or node fails when set
    target: Option<String>,
    pattern: String,
    output: String,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(mut self, pattern: &str, output: &str) -> Self {
        self.failures.push(Failure {
            target: None,
            pattern: pattern.to_string(),
            output: output.to_string(),
        });
        self
    }

    /// Like [`FakeExecutor::fail`] but only on one host or node
    pub fn fail_on(mut self, target: &str, pattern: &str, output: &str) -> Self {
        self.failures.push(Failure {
            target: Some(target.to_string()),
            pattern: pattern.to_string(),
            output: output.to_string(),
        });
        self
    }

    pub fn reply(mut self, pattern: &str, output: &str) -> Self {
        self.replies.push((pattern.to_string(), output.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    fn record(&self, target: &Target, content: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Call {
                target: target.identity().to_string(),
                content,
            });
        }
    }

    fn failure(&self, target: &Target, content: &str) -> Option<ExecError> {
        self.failures
            .iter()
            .filter(|f| f.target.as_deref().is_none_or(|t| t == target.identity()))
            .find(|f| content.contains(f.pattern.as_str()))
            .map(|f| ExecError::Command {
                code: Some(1),
                output: f.output.clone(),
            })
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn run_command(
        &self,
        target: &Target,
        content: &str,
        _sudo: bool,
    ) -> Result<String, ExecError> {
        self.record(target, content.to_string());

        if let Some(err) = self.failure(target, content) {
            return Err(err);
        }

        if let Some((_, output)) = self.replies.iter().find(|(p, _)| content.contains(p.as_str())) {
            return Ok(output.clone());
        }

        Ok(content
            .strip_prefix("echo ")
            .map(|rest| format!("{}\n", rest))
            .unwrap_or_default())
    }

    async fn transfer_file(
        &self,
        target: &Target,
        direction: Direction,
        local_path: &str,
        remote_path: &str,
        _sudo: bool,
    ) -> Result<(), ExecError> {
        let content = format!("{} {} {}", direction, local_path, remote_path);
        self.record(target, content.clone());

        match self.failure(target, &content) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct FakeInventory {
    nodes: Vec<NodeInfo>,
    unreachable: bool,
}

impl FakeInventory {
    pub fn with_nodes(nodes: Vec<NodeInfo>) -> Self {
        Self {
            nodes,
            unreachable: false,
        }
    }

    /// Inventory whose api server never answers
    pub fn unreachable() -> Self {
        Self {
            nodes: Vec::new(),
            unreachable: true,
        }
    }
}

#[async_trait]
impl NodeInventory for FakeInventory {
    async fn list_nodes(&self, cluster: &ClusterRef) -> Result<Vec<NodeInfo>, ExecError> {
        if self.unreachable {
            return Err(ExecError::Connection {
                target: cluster.name.clone(),
                message: "connection refused".to_string(),
            });
        }
        Ok(self.nodes.clone())
    }
}

pub fn node(name: &str, master: bool, ready: bool) -> NodeInfo {
    NodeInfo {
        name: name.to_string(),
        master,
        ready,
    }
}

pub fn host(namespace: &str, name: &str) -> Host {
    Host {
        metadata: ObjectMeta::new(namespace, name),
        spec: HostSpec {
            address: "10.0.0.10".to_string(),
            ..Default::default()
        },
        status: HostStatus::default(),
    }
}

pub fn cluster(namespace: &str, name: &str) -> Cluster {
    Cluster {
        metadata: ObjectMeta::new(namespace, name),
        spec: ClusterSpec {
            server: "https://10.0.0.1:6443".to_string(),
            ..Default::default()
        },
        status: ClusterStatus::default(),
    }
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        poll_interval: Duration::from_millis(10),
        commit_backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

/// A memory store with one host plus typed handles and the fake executor
pub struct Harness {
    pub store: Arc<dyn ObjectStore>,
    pub executor: Arc<FakeExecutor>,
    pub tasks: Objects<Task>,
    pub taskruns: Objects<TaskRun>,
    pub pipelines: Objects<Pipeline>,
    pub pipelineruns: Objects<PipelineRun>,
}

impl Harness {
    pub async fn new(executor: FakeExecutor) -> Self {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        Objects::<Host>::new(store.clone())
            .create(&host(NAMESPACE, HOST))
            .await
            .expect("create host");

        Self {
            executor: Arc::new(executor),
            tasks: Objects::new(store.clone()),
            taskruns: Objects::new(store.clone()),
            pipelines: Objects::new(store.clone()),
            pipelineruns: Objects::new(store.clone()),
            store,
        }
    }

    pub fn engine(&self) -> Arc<TaskRunEngine> {
        self.engine_with_nodes(Vec::new())
    }

    /// Engine whose ambient cluster has `nodes`
    pub fn engine_with_nodes(&self, nodes: Vec<NodeInfo>) -> Arc<TaskRunEngine> {
        Arc::new(TaskRunEngine::new(
            self.store.clone(),
            self.executor.clone(),
            Arc::new(FakeInventory::with_nodes(nodes)),
            settings(),
        ))
    }

    pub fn orchestrator(&self) -> Arc<PipelineRunOrchestrator> {
        Arc::new(PipelineRunOrchestrator::new(self.store.clone(), settings()))
    }

    /// Host task targeting the fixture host
    pub fn task(&self, name: &str, steps: Vec<Step>) -> Task {
        Task {
            metadata: ObjectMeta::new(NAMESPACE, name),
            spec: TaskSpec {
                type_ref: Some(TargetKind::Host),
                name_ref: HOST.to_string(),
                steps,
                ..Default::default()
            },
        }
    }

    pub async fn create_task(&self, name: &str, steps: Vec<Step>) -> Task {
        self.tasks
            .create(&self.task(name, steps))
            .await
            .expect("create task")
    }

    pub fn task_run(&self, name: &str, task_ref: &str) -> TaskRun {
        TaskRun {
            metadata: ObjectMeta::new(NAMESPACE, name),
            spec: TaskRunSpec {
                task_ref: task_ref.to_string(),
                ..Default::default()
            },
            status: TaskRunStatus::default(),
        }
    }

    pub async fn create_task_run(&self, name: &str, task_ref: &str) -> TaskRun {
        self.create_task_run_with(name, task_ref, Vec::<(&str, &str)>::new())
            .await
    }

    pub async fn create_task_run_with<'a>(
        &self,
        name: &str,
        task_ref: &str,
        variables: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> TaskRun {
        let mut run = self.task_run(name, task_ref);
        run.spec.variables = variables
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.taskruns.create(&run).await.expect("create taskrun")
    }

    pub fn pipeline(&self, name: &str, tasks: Vec<PipelineTask>) -> Pipeline {
        Pipeline {
            metadata: ObjectMeta::new(NAMESPACE, name),
            spec: PipelineSpec {
                tasks,
                ..Default::default()
            },
        }
    }

    pub async fn create_pipeline(&self, name: &str, tasks: Vec<PipelineTask>) -> Pipeline {
        self.pipelines
            .create(&self.pipeline(name, tasks))
            .await
            .expect("create pipeline")
    }

    pub fn pipeline_run(&self, name: &str, pipeline_ref: &str) -> PipelineRun {
        PipelineRun {
            metadata: ObjectMeta::new(NAMESPACE, name),
            spec: PipelineRunSpec {
                pipeline_ref: pipeline_ref.to_string(),
                ..Default::default()
            },
            status: PipelineRunStatus::default(),
        }
    }

    pub async fn create_pipeline_run(&self, name: &str, pipeline_ref: &str) -> PipelineRun {
        self.pipelineruns
            .create(&self.pipeline_run(name, pipeline_ref))
            .await
            .expect("create pipelinerun")
    }

    /// Runs the engine on every TaskRun added to the store
    ///
    /// Stands in for the TaskRun reconciler in orchestrator tests. The
    /// worker stops when the returned guard is dropped.
    pub fn spawn_taskrun_worker(&self) -> WorkerGuard {
        let mut events = self.store.watch();
        let engine = self.engine();
        let taskruns = self.taskruns.clone();

        WorkerGuard(tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if event.kind != Kind::TaskRun || event.event != EventType::Added {
                    continue;
                }
                if let Ok(run) = taskruns.get(&event.key).await {
                    let _ = engine.run(run).await;
                }
            }
        }))
    }
}

pub struct WorkerGuard(JoinHandle<()>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}
