//! Run engines
//!
//! - [`TaskRunEngine`] executes the steps of one TaskRun against its targets
//! - [`PipelineRunOrchestrator`] sequences TaskRuns for a PipelineRun
//! - [`history`] prunes old finished runs
//! - [`Heartbeat`] probes Hosts and Clusters and records their liveness
//!
//! Both run engines report progress only through the run's status, committed
//! with [`commit_status`] after every transition.

mod heartbeat;
pub mod history;
mod pipelinerun;
mod status;
mod targets;
mod taskrun;

pub use heartbeat::Heartbeat;
pub use pipelinerun::PipelineRunOrchestrator;
pub use status::commit_status;
pub use targets::TargetFields;
pub use taskrun::TaskRunEngine;

use std::time::Duration;

/// Knobs shared by the engines
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Image for node execution pods when the Task names none
    pub default_runtime_image: String,
    /// Read declared variables from the process environment
    pub env_variables: bool,
    /// Interval between polls of a child TaskRun
    pub poll_interval: Duration,
    /// Attempts for a status write that hits a version conflict
    pub commit_attempts: u32,
    pub commit_backoff: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_runtime_image: "docker.io/library/ubuntu:22.04".to_string(),
            env_variables: false,
            poll_interval: Duration::from_secs(3),
            commit_attempts: 5,
            commit_backoff: Duration::from_secs(1),
        }
    }
}
