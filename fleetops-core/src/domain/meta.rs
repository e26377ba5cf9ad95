//! Object identity and metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Label set on child TaskRuns naming the PipelineRun that created them
pub const LABEL_PIPELINE_RUN: &str = "fleetops.io/pipelinerun";
/// Label set on child TaskRuns naming the pipeline task slot they fill
pub const LABEL_TASK_NAME: &str = "fleetops.io/task-name";
/// Label set on runs created by a crontab schedule
pub const LABEL_SCHEDULED: &str = "fleetops.io/scheduled";

/// Kind of a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Task,
    TaskRun,
    Pipeline,
    PipelineRun,
    Host,
    Cluster,
}

impl Kind {
    pub const ALL: [Kind; 6] = [
        Kind::Task,
        Kind::TaskRun,
        Kind::Pipeline,
        Kind::PipelineRun,
        Kind::Host,
        Kind::Cluster,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Task => "Task",
            Kind::TaskRun => "TaskRun",
            Kind::Pipeline => "Pipeline",
            Kind::PipelineRun => "PipelineRun",
            Kind::Host => "Host",
            Kind::Cluster => "Cluster",
        }
    }

    /// Lowercase plural used in HTTP paths (e.g. `taskruns`)
    pub fn plural(&self) -> &'static str {
        match self {
            Kind::Task => "tasks",
            Kind::TaskRun => "taskruns",
            Kind::Pipeline => "pipelines",
            Kind::PipelineRun => "pipelineruns",
            Kind::Host => "hosts",
            Kind::Cluster => "clusters",
        }
    }

    pub fn from_plural(s: &str) -> Option<Kind> {
        Kind::ALL.into_iter().find(|k| k.plural() == s)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown kind: {}", s))
    }
}

/// Namespace-scoped object identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Explicit parent link used for cascading deletes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: Kind,
    pub name: String,
    pub uid: Uuid,
}

/// Metadata carried by every stored object
///
/// `uid`, `resource_version` and `created_at` are assigned by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub uid: Uuid,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_owner(mut self, owner: OwnerRef) -> Self {
        self.owner = Some(owner);
        self
    }

    /// True when this object's parent link points at `kind`/`name`
    pub fn is_owned_by(&self, kind: Kind, name: &str) -> bool {
        self.owner
            .as_ref()
            .is_some_and(|o| o.kind == kind && o.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_plural_roundtrip() {
        for kind in Kind::ALL {
            assert_eq!(Kind::from_plural(kind.plural()), Some(kind));
            assert_eq!(kind.as_str().parse::<Kind>(), Ok(kind));
        }
        assert_eq!(Kind::from_plural("widgets"), None);
    }

    #[test]
    fn test_is_owned_by() {
        let meta = ObjectMeta::new("default", "child").with_owner(OwnerRef {
            kind: Kind::PipelineRun,
            name: "parent".to_string(),
            uid: Uuid::new_v4(),
        });

        assert!(meta.is_owned_by(Kind::PipelineRun, "parent"));
        assert!(!meta.is_owned_by(Kind::Task, "parent"));
        assert!(!ObjectMeta::new("default", "orphan").is_owned_by(Kind::PipelineRun, "parent"));
    }
}
