//! Run status shared by TaskRuns, PipelineRuns and their step records

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a run
///
/// `Empty`, `Init` and `Running` are in flight; everything else is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    #[default]
    #[serde(rename = "")]
    Empty,
    Init,
    Running,
    Successed,
    Failed,
    Aborted,
    DataInValid,
}

impl RunStatus {
    /// True only for terminal states
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            RunStatus::Successed | RunStatus::Failed | RunStatus::Aborted | RunStatus::DataInValid
        )
    }

    pub fn is_empty(&self) -> bool {
        *self == RunStatus::Empty
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Empty => "",
            RunStatus::Init => "Init",
            RunStatus::Running => "Running",
            RunStatus::Successed => "Successed",
            RunStatus::Failed => "Failed",
            RunStatus::Aborted => "Aborted",
            RunStatus::DataInValid => "DataInValid",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
