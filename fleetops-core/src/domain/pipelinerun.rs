//! PipelineRun: one execution of a Pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::meta::{Kind, ObjectMeta};
use super::object::{Stateful, impl_resource};
use super::status::RunStatus;
use super::target::TargetKind;
use super::taskrun::TaskRunStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub metadata: ObjectMeta,
    pub spec: PipelineRunSpec,
    #[serde(default)]
    pub status: PipelineRunStatus,
}

impl_resource!(PipelineRun, Kind::PipelineRun);

impl Stateful for PipelineRun {
    type Status = PipelineRunStatus;

    fn status(&self) -> &PipelineRunStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut PipelineRunStatus {
        &mut self.status
    }
}

/// Target fields override those of each Task unless empty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineRunSpec {
    pub pipeline_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<TargetKind>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name_ref: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub node_name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineRunStatus {
    pub run_status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub tasks: Vec<PipelineRunTaskStatus>,
}

impl PipelineRunStatus {
    /// Marks the run as running without resetting an earlier start time
    pub fn start(&mut self) {
        self.run_status = RunStatus::Running;
        self.start_time.get_or_insert_with(Utc::now);
    }

    /// Replaces the entry for the same `(task_name, task_ref)` or appends
    ///
    /// Entries without a name or ref are ignored.
    pub fn record_task(&mut self, entry: PipelineRunTaskStatus) {
        if entry.task_name.is_empty() || entry.task_ref.is_empty() {
            return;
        }

        match self
            .tasks
            .iter_mut()
            .find(|t| t.task_name == entry.task_name && t.task_ref == entry.task_ref)
        {
            Some(existing) => *existing = entry,
            None => self.tasks.push(entry),
        }
    }

    /// `Successed` only when every recorded task succeeded
    pub fn aggregate(&self) -> RunStatus {
        if self
            .tasks
            .iter()
            .all(|t| t.task_run_status.run_status == RunStatus::Successed)
        {
            RunStatus::Successed
        } else {
            RunStatus::Failed
        }
    }

    /// Results of finished tasks, keyed by task slot name
    pub fn task_results(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.tasks
            .iter()
            .filter(|t| t.task_run_status.run_status.is_finished())
            .map(|t| (t.task_name.clone(), t.task_run_status.results.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineRunTaskStatus {
    pub task_name: String,
    pub task_ref: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub task_run: String,
    pub task_run_status: TaskRunStatus,
}

impl PipelineRunTaskStatus {
    pub fn new(task_name: &str, task_ref: &str, status: TaskRunStatus) -> Self {
        Self {
            task_name: task_name.to_string(),
            task_ref: task_ref.to_string(),
            task_run: String::new(),
            task_run_status: status,
        }
    }
}
