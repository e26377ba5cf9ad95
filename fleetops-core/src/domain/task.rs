//! Task definitions

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use super::meta::{Kind, ObjectMeta};
use super::object::impl_resource;
use super::target::TargetKind;
use super::variable::Variables;

/// Node name that selects any ready control-plane node
pub const ANY_MASTER: &str = "anymaster";

/// Reusable ordered list of steps plus declared variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub metadata: ObjectMeta,
    pub spec: TaskSpec,
}

impl_resource!(Task, Kind::Task);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskSpec {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub desc: String,
    /// Five-field crontab; empty means no schedule
    #[serde(skip_serializing_if = "String::is_empty")]
    pub crontab: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<TargetKind>,
    /// Host or Cluster object name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name_ref: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub node_name: String,
    /// Fan out over every ready node of the cluster
    pub all: bool,
    /// Selects every Host carrying these labels
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub host_selector: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub runtime_image: String,
    pub sudo: bool,
    pub variables: Variables,
    pub steps: Vec<Step>,
}

impl TaskSpec {
    /// Declared target kind, inferring cluster for node-addressed tasks
    pub fn target_kind(&self) -> TargetKind {
        match self.type_ref {
            Some(kind) => kind,
            None if self.all || !self.node_name.is_empty() => TargetKind::Cluster,
            None => TargetKind::Host,
        }
    }
}

/// One step of a Task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,
    /// Logic expression; empty means run
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub when: String,
    #[serde(default)]
    pub allow_failure: AllowFailure,
    #[serde(flatten)]
    pub action: StepAction,
}

impl Step {
    pub fn command(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            when: String::new(),
            allow_failure: AllowFailure::default(),
            action: StepAction::Command {
                content: content.into(),
            },
        }
    }

    pub fn when(mut self, expression: impl Into<String>) -> Self {
        self.when = expression.into();
        self
    }

    pub fn allow_failure(mut self, allow: impl Into<AllowFailure>) -> Self {
        self.allow_failure = allow.into();
        self
    }
}

/// A step either runs a command or copies a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepAction {
    Command {
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Transfer {
        local_file: String,
        remote_file: String,
        #[serde(default)]
        direction: Direction,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => f.write_str("upload"),
            Direction::Download => f.write_str("download"),
        }
    }
}

/// Failure policy of a step or pipeline task
///
/// Accepts a plain boolean or an expression string rendered and evaluated
/// when the decision is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllowFailure {
    Flag(bool),
    Expr(String),
}

impl AllowFailure {
    pub fn expression(&self) -> Cow<'_, str> {
        match self {
            AllowFailure::Flag(true) => Cow::Borrowed("true"),
            AllowFailure::Flag(false) => Cow::Borrowed("false"),
            AllowFailure::Expr(expr) => Cow::Borrowed(expr),
        }
    }
}

impl Default for AllowFailure {
    fn default() -> Self {
        AllowFailure::Flag(false)
    }
}

impl From<bool> for AllowFailure {
    fn from(value: bool) -> Self {
        AllowFailure::Flag(value)
    }
}

impl From<&str> for AllowFailure {
    fn from(value: &str) -> Self {
        AllowFailure::Expr(value.to_string())
    }
}
