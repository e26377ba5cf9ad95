//! Executor capability
//!
//! Runs a command or copies a file on a [`Target`]. Two backends:
//! - [`SshExecutor`]: remote hosts over ssh/scp
//! - [`NodeExecutor`]: cluster nodes through a short-lived privileged pod
//!
//! [`Dispatcher`] routes each call to the backend matching the target, so the
//! engines only ever see the two-method [`Executor`] contract.

mod cache;
mod node;
mod process;
mod ssh;

pub use node::NodeExecutor;
pub use ssh::SshExecutor;

use async_trait::async_trait;
use fleetops_core::domain::target::{ClusterSpec, HostSpec};
use fleetops_core::domain::task::Direction;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("cannot reach {target}: {message}")]
    Connection { target: String, message: String },

    #[error("command exited with status {code:?}")]
    Command { code: Option<i32>, output: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ExecError {
    /// Errors that mean the transport, not the command, failed
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout(_))
    }

    /// Text recorded as the step output for a failed step
    pub fn output(&self) -> String {
        match self {
            Self::Command { output, .. } if !output.is_empty() => output.clone(),
            other => other.to_string(),
        }
    }
}

/// A cluster as the executor sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRef {
    pub name: String,
    pub spec: ClusterSpec,
}

/// Where a step runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Host {
        name: String,
        spec: HostSpec,
    },
    Node {
        cluster: ClusterRef,
        node: String,
        image: String,
    },
}

impl Target {
    /// Host or node name used to key step records
    pub fn identity(&self) -> &str {
        match self {
            Target::Host { name, .. } => name,
            Target::Node { node, .. } => node,
        }
    }
}

/// Runs steps on targets
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs `content` with `sh` and returns its stdout
    async fn run_command(&self, target: &Target, content: &str, sudo: bool)
    -> Result<String, ExecError>;

    async fn transfer_file(
        &self,
        target: &Target,
        direction: Direction,
        local_path: &str,
        remote_path: &str,
        sudo: bool,
    ) -> Result<(), ExecError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub master: bool,
    pub ready: bool,
}

/// Lists the nodes of a cluster
#[async_trait]
pub trait NodeInventory: Send + Sync {
    async fn list_nodes(&self, cluster: &ClusterRef) -> Result<Vec<NodeInfo>, ExecError>;
}

/// Routes calls to the ssh or node backend
pub struct Dispatcher {
    ssh: SshExecutor,
    node: std::sync::Arc<NodeExecutor>,
}

impl Dispatcher {
    pub fn new(ssh: SshExecutor, node: std::sync::Arc<NodeExecutor>) -> Self {
        Self { ssh, node }
    }
}

#[async_trait]
impl Executor for Dispatcher {
    async fn run_command(
        &self,
        target: &Target,
        content: &str,
        sudo: bool,
    ) -> Result<String, ExecError> {
        match target {
            Target::Host { name, spec } => self.ssh.run_command(name, spec, content, sudo).await,
            Target::Node {
                cluster,
                node,
                image,
            } => self.node.run_command(cluster, node, image, content).await,
        }
    }

    async fn transfer_file(
        &self,
        target: &Target,
        direction: Direction,
        local_path: &str,
        remote_path: &str,
        sudo: bool,
    ) -> Result<(), ExecError> {
        match target {
            Target::Host { name, spec } => {
                self.ssh
                    .transfer_file(name, spec, direction, local_path, remote_path, sudo)
                    .await
            }
            Target::Node {
                cluster,
                node,
                image,
            } => {
                self.node
                    .transfer_file(cluster, node, image, direction, local_path, remote_path)
                    .await
            }
        }
    }
}
