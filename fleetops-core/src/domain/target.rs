//! Execution target objects
//!
//! A Host is reached over ssh; a Cluster is a kubeconfig-addressable cluster
//! whose nodes are reached through short-lived privileged pods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::meta::{Kind, ObjectMeta};
use super::object::{Stateful, impl_resource};
use super::status::RunStatus;

/// Cluster name meaning "the cluster the controller itself runs against"
pub const CURRENT_CLUSTER: &str = "current";

/// Which kind of target a Task runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Host,
    Cluster,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub metadata: ObjectMeta,
    pub spec: HostSpec,
    #[serde(default, skip_serializing_if = "HostStatus::is_unset")]
    pub status: HostStatus,
}

impl_resource!(Host, Kind::Host);

impl Stateful for Host {
    type Status = HostStatus;

    fn status(&self) -> &HostStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut HostStatus {
        &mut self.status
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostSpec {
    pub address: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub private_key_path: String,
    pub timeout_seconds: u64,
}

impl Default for HostSpec {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 22,
            username: "root".to_string(),
            password: String::new(),
            private_key_path: String::new(),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub metadata: ObjectMeta,
    pub spec: ClusterSpec,
    #[serde(default, skip_serializing_if = "ClusterStatus::is_unset")]
    pub status: ClusterStatus,
}

impl_resource!(Cluster, Kind::Cluster);

impl Stateful for Cluster {
    type Status = ClusterStatus;

    fn status(&self) -> &ClusterStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut ClusterStatus {
        &mut self.status
    }
}

/// Connection details for a cluster
///
/// `kubeconfig` holds the file content; when empty the ambient kubeconfig is
/// used, optionally narrowed with `server` and `token`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSpec {
    pub server: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kubeconfig: String,
}

/// Facts gathered by the last host heartbeat
///
/// The machine facts keep their previous values when a heartbeat fails; only
/// `heart_status` and `heart_time` move.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostStatus {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kernel_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub distribution: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub arch: String,
    pub cpu_total: u32,
    pub cpu_load1: f64,
    /// Bytes
    pub mem_total: u64,
    pub mem_usage_percent: f64,
    /// Bytes, root filesystem
    pub disk_total: u64,
    pub disk_usage_percent: f64,
    pub heart_status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_time: Option<DateTime<Utc>>,
}

impl HostStatus {
    pub fn is_unset(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterStatus {
    pub nodes: u32,
    pub ready_nodes: u32,
    pub heart_status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_time: Option<DateTime<Utc>>,
}

impl ClusterStatus {
    pub fn is_unset(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::object::Resource;

    #[test]
    fn test_host_status_survives_dyn_conversion() {
        let mut host = Host {
            metadata: ObjectMeta::new("default", "web-1"),
            spec: HostSpec::default(),
            status: HostStatus::default(),
        };
        host.status.hostname = "web-1".to_string();
        host.status.heart_status = RunStatus::Successed;

        let obj = host.to_dyn().unwrap();
        assert_eq!(obj.status["hostname"], "web-1");
        assert_eq!(obj.status["heartStatus"], "Successed");

        let back = Host::from_dyn(obj).unwrap();
        assert_eq!(back.status, host.status);
    }

    #[test]
    fn test_cluster_without_heartbeat_has_no_status() {
        let cluster = Cluster {
            metadata: ObjectMeta::new("default", "prod"),
            spec: ClusterSpec::default(),
            status: ClusterStatus::default(),
        };
        assert!(cluster.to_dyn().unwrap().status.is_null());
    }
}
