//! Run request DTOs
//!
//! Transport-agnostic requests for starting TaskRuns and PipelineRuns.
//! Optional fields override the referenced definition when non-empty.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::target::TargetKind;

/// Request to run a Task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateTaskRun {
    /// Generated from the task name when empty
    pub name: String,
    pub task_ref: String,
    pub name_ref: String,
    pub type_ref: Option<TargetKind>,
    pub node_name: String,
    pub variables: BTreeMap<String, String>,
}

impl CreateTaskRun {
    pub fn validate(&self) -> Result<(), String> {
        if self.task_ref.trim().is_empty() {
            return Err("taskRef is required".to_string());
        }
        Ok(())
    }
}

/// Request to run a Pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreatePipelineRun {
    pub name: String,
    pub pipeline_ref: String,
    pub name_ref: String,
    pub type_ref: Option<TargetKind>,
    pub node_name: String,
    pub variables: BTreeMap<String, String>,
}

impl CreatePipelineRun {
    pub fn validate(&self) -> Result<(), String> {
        if self.pipeline_ref.trim().is_empty() {
            return Err("pipelineRef is required".to_string());
        }
        Ok(())
    }
}
