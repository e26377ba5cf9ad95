//! Cluster nodes through short-lived privileged pods
//!
//! Each command creates a pod pinned to the node with the host filesystem
//! mounted at `/host`, runs the script under `chroot /host`, streams its
//! output back and removes the pod (`kubectl run --rm`). File transfers use
//! the same pod shape with `cat` over stdin/stdout.

use async_trait::async_trait;
use fleetops_core::domain::task::Direction;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use super::cache::{ConnectionCache, Connector};
use super::process::{self, Finished, shell_quote};
use super::{ClusterRef, ExecError, NodeInfo, NodeInventory};

const CONTROL_PLANE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// How to reach one cluster with kubectl
pub struct KubeClient {
    kubectl: String,
    kubeconfig: Option<NamedTempFile>,
    server: String,
    token: String,
}

impl KubeClient {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.kubectl);
        if let Some(file) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(file.path());
        }
        if !self.server.is_empty() {
            cmd.arg("--server").arg(&self.server);
        }
        if !self.token.is_empty() {
            cmd.arg("--token").arg(&self.token);
        }
        cmd
    }
}

pub struct KubeConnector {
    kubectl: String,
}

#[async_trait]
impl Connector for KubeConnector {
    type Target = ClusterRef;
    type Conn = Arc<KubeClient>;

    async fn connect(&self, cluster: &ClusterRef) -> Result<Arc<KubeClient>, ExecError> {
        let kubeconfig = if cluster.spec.kubeconfig.is_empty() {
            None
        } else {
            let mut file = NamedTempFile::new()?;
            file.write_all(cluster.spec.kubeconfig.as_bytes())?;
            file.flush()?;
            Some(file)
        };

        let client = Arc::new(KubeClient {
            kubectl: self.kubectl.clone(),
            kubeconfig,
            server: cluster.spec.server.clone(),
            token: cluster.spec.token.clone(),
        });

        self.probe(&client).await?;
        info!("Connected to cluster {}", cluster.name);
        Ok(client)
    }

    async fn probe(&self, client: &Arc<KubeClient>) -> Result<(), ExecError> {
        let mut cmd = client.command();
        cmd.args(["get", "namespace", "default", "-o", "name", "--request-timeout=5s"]);

        let finished = process::run(cmd, None).await?;
        if finished.success() {
            return Ok(());
        }
        Err(classify("cluster", finished))
    }
}

pub struct NodeExecutor {
    namespace: String,
    clients: ConnectionCache<KubeConnector>,
}

impl NodeExecutor {
    /// # Arguments
    /// * `kubectl` - kubectl binary
    /// * `namespace` - Namespace the execution pods are created in
    pub fn new(kubectl: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            clients: ConnectionCache::new(KubeConnector {
                kubectl: kubectl.into(),
            }),
        }
    }

    pub async fn run_command(
        &self,
        cluster: &ClusterRef,
        node: &str,
        image: &str,
        content: &str,
    ) -> Result<String, ExecError> {
        let stdout = self.run_on_node(cluster, node, image, content, None).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    pub async fn transfer_file(
        &self,
        cluster: &ClusterRef,
        node: &str,
        image: &str,
        direction: Direction,
        local_path: &str,
        remote_path: &str,
    ) -> Result<(), ExecError> {
        match direction {
            Direction::Upload => {
                let data = tokio::fs::read(local_path).await?;
                let script = format!("cat > {}", shell_quote(remote_path));
                self.run_on_node(cluster, node, image, &script, Some(data))
                    .await?;
            }
            Direction::Download => {
                let script = format!("cat {}", shell_quote(remote_path));
                let data = self.run_on_node(cluster, node, image, &script, None).await?;
                tokio::fs::write(local_path, data).await?;
            }
        }
        Ok(())
    }

    async fn run_on_node(
        &self,
        cluster: &ClusterRef,
        node: &str,
        image: &str,
        script: &str,
        stdin: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, ExecError> {
        let client = self.clients.get(&cluster.name, cluster).await?;
        let pod = pod_name(node);
        debug!("Running pod {} on node {} of cluster {}", pod, node, cluster.name);

        let mut cmd = client.command();
        cmd.args(["run", pod.as_str(), "-n", self.namespace.as_str()])
            .arg(format!("--image={}", image))
            .args(["--restart=Never", "--rm", "--quiet", "--attach"])
            .arg("--pod-running-timeout=2m")
            .arg(format!(
                "--overrides={}",
                pod_overrides(&pod, node, image, script, stdin.is_some())
            ));
        if stdin.is_some() {
            cmd.arg("-i");
        }

        let finished = process::run(cmd, stdin).await?;
        if finished.success() {
            return Ok(finished.stdout);
        }

        let err = classify(&cluster.name, finished);
        if err.is_connectivity() {
            self.clients.invalidate(&cluster.name).await;
        }
        Err(err)
    }
}

#[async_trait]
impl NodeInventory for NodeExecutor {
    async fn list_nodes(&self, cluster: &ClusterRef) -> Result<Vec<NodeInfo>, ExecError> {
        let client = self.clients.get(&cluster.name, cluster).await?;
        let mut cmd = client.command();
        cmd.args(["get", "nodes", "-o", "json"]);

        let finished = process::run(cmd, None).await?;
        if !finished.success() {
            let err = classify(&cluster.name, finished);
            if err.is_connectivity() {
                self.clients.invalidate(&cluster.name).await;
            }
            return Err(err);
        }

        let list: NodeList = serde_json::from_slice(&finished.stdout).map_err(|e| {
            ExecError::Unsupported(format!("unexpected node list from {}: {}", cluster.name, e))
        })?;
        Ok(list.items.into_iter().map(NodeInfo::from).collect())
    }
}

fn pod_name(node: &str) -> String {
    let node: String = node
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(40)
        .collect();
    format!("fleetops-{}-{}", node.trim_matches('-'), &Uuid::new_v4().simple().to_string()[..8])
}

fn pod_overrides(pod: &str, node: &str, image: &str, script: &str, stdin: bool) -> String {
    json!({
        "apiVersion": "v1",
        "spec": {
            "nodeName": node,
            "hostPID": true,
            "hostNetwork": true,
            "restartPolicy": "Never",
            "tolerations": [{ "operator": "Exists" }],
            "containers": [{
                "name": pod,
                "image": image,
                "stdin": stdin,
                "stdinOnce": stdin,
                "command": ["chroot", "/host", "sh", "-c", script],
                "securityContext": { "privileged": true },
                "volumeMounts": [{ "name": "host", "mountPath": "/host" }]
            }],
            "volumes": [{ "name": "host", "hostPath": { "path": "/" } }]
        }
    })
    .to_string()
}

fn classify(target: &str, finished: Finished) -> ExecError {
    let unreachable = [
        "Unable to connect to the server",
        "connection refused",
        "i/o timeout",
        "no such host",
        "context deadline exceeded",
    ]
    .iter()
    .any(|needle| finished.stderr.contains(needle));

    if unreachable {
        ExecError::Connection {
            target: target.to_string(),
            message: finished.stderr.trim().to_string(),
        }
    } else {
        finished.into_command_error()
    }
}

#[derive(Deserialize)]
struct NodeList {
    items: Vec<NodeItem>,
}

#[derive(Deserialize)]
struct NodeItem {
    metadata: NodeMetadata,
    #[serde(default)]
    status: NodeItemStatus,
}

#[derive(Deserialize)]
struct NodeMetadata {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Deserialize, Default)]
struct NodeItemStatus {
    #[serde(default)]
    conditions: Vec<NodeCondition>,
}

#[derive(Deserialize)]
struct NodeCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

impl From<NodeItem> for NodeInfo {
    fn from(item: NodeItem) -> Self {
        let master = CONTROL_PLANE_LABELS
            .iter()
            .any(|l| item.metadata.labels.contains_key(*l));
        let ready = item
            .status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True");

        NodeInfo {
            name: item.metadata.name,
            master,
            ready,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_list() {
        let raw = r#"{
            "items": [
                {"metadata": {"name": "cp-1", "labels": {"node-role.kubernetes.io/control-plane": ""}},
                 "status": {"conditions": [{"type": "Ready", "status": "True"}]}},
                {"metadata": {"name": "worker-1"},
                 "status": {"conditions": [{"type": "Ready", "status": "False"}]}}
            ]
        }"#;

        let list: NodeList = serde_json::from_str(raw).unwrap();
        let nodes: Vec<NodeInfo> = list.items.into_iter().map(NodeInfo::from).collect();

        assert_eq!(
            nodes,
            vec![
                NodeInfo {
                    name: "cp-1".to_string(),
                    master: true,
                    ready: true
                },
                NodeInfo {
                    name: "worker-1".to_string(),
                    master: false,
                    ready: false
                },
            ]
        );
    }

    #[test]
    fn test_pod_name_is_dns_safe() {
        let name = pod_name("Node_1.example.COM");
        assert!(name.starts_with("fleetops-node-1-example-com-"));
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn test_overrides_pin_node_and_chroot() {
        let raw = pod_overrides("p", "node-a", "ubuntu", "uptime", false);
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(value["spec"]["nodeName"], "node-a");
        assert_eq!(
            value["spec"]["containers"][0]["command"],
            json!(["chroot", "/host", "sh", "-c", "uptime"])
        );
    }
}
