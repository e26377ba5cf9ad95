//! Pipeline definitions

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::meta::{Kind, ObjectMeta};
use super::object::impl_resource;
use super::task::AllowFailure;
use super::variable::Variables;

/// Ordered list of Task references plus shared variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub metadata: ObjectMeta,
    pub spec: PipelineSpec,
}

impl_resource!(Pipeline, Kind::Pipeline);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSpec {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub desc: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub crontab: String,
    pub variables: Variables,
    pub tasks: Vec<PipelineTask>,
}

impl PipelineSpec {
    /// Every slot needs a name and a task ref, and `(name, taskRef)` must be
    /// unique since task status is keyed by that pair
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        for slot in &self.tasks {
            if slot.name.is_empty() || slot.task_ref.is_empty() {
                return Err("every task needs a name and a taskRef".to_string());
            }
            if !seen.insert((slot.name.as_str(), slot.task_ref.as_str())) {
                return Err(format!(
                    "task {} with taskRef {} is listed twice",
                    slot.name, slot.task_ref
                ));
            }
        }
        Ok(())
    }
}

/// One slot in a Pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTask {
    pub name: String,
    pub task_ref: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    /// A tolerated failure does not switch the run into always-only mode
    #[serde(default)]
    pub allow_failure: AllowFailure,
    /// Runs even after an earlier slot failed
    #[serde(default)]
    pub run_always: bool,
}

impl PipelineTask {
    pub fn new(name: impl Into<String>, task_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_ref: task_ref.into(),
            ..Default::default()
        }
    }

    pub fn run_always(mut self) -> Self {
        self.run_always = true;
        self
    }
}
