//! TaskRun: one execution of a Task against its resolved targets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::meta::{Kind, ObjectMeta};
use super::object::{Stateful, impl_resource};
use super::status::RunStatus;
use super::target::TargetKind;
use super::task::TaskSpec;

/// Result key holding the output of the last executed step
pub const RESULT_OUTPUT: &str = "output";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub metadata: ObjectMeta,
    pub spec: TaskRunSpec,
    #[serde(default)]
    pub status: TaskRunStatus,
}

impl_resource!(TaskRun, Kind::TaskRun);

impl Stateful for TaskRun {
    type Status = TaskRunStatus;

    fn status(&self) -> &TaskRunStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut TaskRunStatus {
        &mut self.status
    }
}

/// Desired execution
///
/// Target fields left empty fall back to the Task definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskRunSpec {
    pub task_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<TargetKind>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name_ref: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub node_name: String,
    /// Caller-supplied variable values
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    /// Task definition captured when the run was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskRunStatus {
    pub run_status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Step records keyed by host or node name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_status: BTreeMap<String, NodeStatus>,
    /// Step outputs keyed by step name, readable as `${tasks.<name>.results.<key>}`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub results: BTreeMap<String, String>,
}

impl TaskRunStatus {
    /// Moves the run to `status`, stamping the start time once
    pub fn set_run_status(&mut self, status: RunStatus) {
        if matches!(status, RunStatus::Init | RunStatus::Running) && self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
        self.run_status = status;
    }

    /// Drops earlier records for `node` and marks it running
    pub fn start_node(&mut self, node: &str) {
        self.node_status.insert(
            node.to_string(),
            NodeStatus {
                steps: Vec::new(),
                run_status: RunStatus::Running,
            },
        );
    }

    /// Appends a step record; the node takes the step's status
    pub fn record_step(&mut self, node: &str, step: StepStatus) {
        let entry = self.node_status.entry(node.to_string()).or_default();
        entry.run_status = step.step_status;
        entry.steps.push(step);
    }

    pub fn set_node_status(&mut self, node: &str, status: RunStatus) {
        self.node_status.entry(node.to_string()).or_default().run_status = status;
    }

    pub fn any_node_failed(&self) -> bool {
        self.node_status
            .values()
            .any(|n| n.run_status == RunStatus::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeStatus {
    pub steps: Vec<StepStatus>,
    pub run_status: RunStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StepStatus {
    pub step_name: String,
    pub step_cmd: String,
    pub step_output: String,
    pub step_status: RunStatus,
}
