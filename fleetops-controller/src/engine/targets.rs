//! Target resolution
//!
//! Turns the merged `typeRef`/`nameRef`/`nodeName` of a run into the list of
//! concrete [`Target`]s its steps execute on.

use fleetops_core::domain::NamespacedName;
use fleetops_core::domain::target::{CURRENT_CLUSTER, Cluster, ClusterSpec, Host, TargetKind};
use fleetops_core::domain::task::{ANY_MASTER, TaskSpec};
use thiserror::Error;
use uuid::Uuid;

use crate::executor::{ClusterRef, ExecError, NodeInfo, NodeInventory, Target};
use crate::store::{ListFilter, Objects, StoreError};

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("host {0} not found")]
    HostNotFound(String),

    #[error("no host matches selector {0}")]
    NoHostMatches(String),

    #[error("cluster {0} not found")]
    ClusterNotFound(String),

    #[error("no ready node matches {node:?} in cluster {cluster}")]
    NoNode { cluster: String, node: String },

    #[error("host task has neither nameRef nor hostSelector")]
    Unspecified,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Target fields after merging a run's overrides onto its Task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFields {
    pub type_ref: TargetKind,
    pub name_ref: String,
    pub node_name: String,
}

impl TargetFields {
    /// Non-empty overrides win over the Task's own fields
    ///
    /// A Task pinned to `anymaster` keeps that node name whatever the caller
    /// asks for.
    pub fn merge(
        task: &TaskSpec,
        type_ref: Option<TargetKind>,
        name_ref: &str,
        node_name: &str,
    ) -> Self {
        let node_name = if task.node_name == ANY_MASTER {
            ANY_MASTER.to_string()
        } else {
            pick(node_name, &task.node_name)
        };

        let type_ref = match type_ref {
            Some(kind) => kind,
            None if task.type_ref.is_none() && !node_name.is_empty() => TargetKind::Cluster,
            None => task.target_kind(),
        };

        Self {
            type_ref,
            name_ref: pick(name_ref, &task.name_ref),
            node_name,
        }
    }
}

fn pick(preferred: &str, fallback: &str) -> String {
    if preferred.is_empty() {
        fallback.to_string()
    } else {
        preferred.to_string()
    }
}

/// Resolves the concrete targets of a run in `namespace`
pub async fn resolve_targets(
    hosts: &Objects<Host>,
    clusters: &Objects<Cluster>,
    inventory: &dyn NodeInventory,
    namespace: &str,
    task: &TaskSpec,
    fields: &TargetFields,
    default_image: &str,
) -> Result<Vec<Target>, TargetError> {
    match fields.type_ref {
        TargetKind::Host => resolve_hosts(hosts, namespace, task, fields).await,
        TargetKind::Cluster => {
            let cluster = resolve_cluster(clusters, namespace, &fields.name_ref).await?;
            let nodes = inventory.list_nodes(&cluster).await?;
            let selected = select_nodes(&nodes, &fields.node_name, task.all).ok_or_else(|| {
                TargetError::NoNode {
                    cluster: cluster.name.clone(),
                    node: fields.node_name.clone(),
                }
            })?;

            let image = if task.runtime_image.is_empty() {
                default_image
            } else {
                &task.runtime_image
            };

            Ok(selected
                .into_iter()
                .map(|node| Target::Node {
                    cluster: cluster.clone(),
                    node,
                    image: image.to_string(),
                })
                .collect())
        }
    }
}

async fn resolve_hosts(
    hosts: &Objects<Host>,
    namespace: &str,
    task: &TaskSpec,
    fields: &TargetFields,
) -> Result<Vec<Target>, TargetError> {
    if !fields.name_ref.is_empty() {
        let key = NamespacedName::new(namespace, &fields.name_ref);
        let host = hosts
            .get_opt(&key)
            .await?
            .ok_or_else(|| TargetError::HostNotFound(fields.name_ref.clone()))?;
        return Ok(vec![host_target(host)]);
    }

    if task.host_selector.is_empty() {
        return Err(TargetError::Unspecified);
    }

    let filter = task
        .host_selector
        .iter()
        .fold(ListFilter::namespace(namespace), |f, (k, v)| {
            f.with_label(k, v)
        });
    let matched = hosts.list(&filter).await?;
    if matched.is_empty() {
        let selector = task
            .host_selector
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        return Err(TargetError::NoHostMatches(selector));
    }

    Ok(matched.into_iter().map(host_target).collect())
}

pub(crate) fn host_target(host: Host) -> Target {
    Target::Host {
        name: host.metadata.name,
        spec: host.spec,
    }
}

/// Looks up a stored Cluster, falling back to the ambient one for `current`
async fn resolve_cluster(
    clusters: &Objects<Cluster>,
    namespace: &str,
    name: &str,
) -> Result<ClusterRef, TargetError> {
    let name = if name.is_empty() { CURRENT_CLUSTER } else { name };

    match clusters.get_opt(&NamespacedName::new(namespace, name)).await? {
        Some(cluster) => Ok(ClusterRef {
            name: cluster.metadata.name,
            spec: cluster.spec,
        }),
        None if name == CURRENT_CLUSTER => Ok(ClusterRef {
            name: CURRENT_CLUSTER.to_string(),
            spec: ClusterSpec::default(),
        }),
        None => Err(TargetError::ClusterNotFound(name.to_string())),
    }
}

/// Picks node names among the ready nodes
///
/// - `all`: every ready node
/// - empty node name: the first ready master
/// - `anymaster`: a random ready master
/// - otherwise the node with that exact name
///
/// Returns `None` when nothing matches.
pub fn select_nodes(nodes: &[NodeInfo], node_name: &str, all: bool) -> Option<Vec<String>> {
    let ready: Vec<&NodeInfo> = nodes.iter().filter(|n| n.ready).collect();

    let selected: Vec<String> = if all {
        ready.iter().map(|n| n.name.clone()).collect()
    } else if node_name.is_empty() {
        ready
            .iter()
            .find(|n| n.master)
            .map(|n| vec![n.name.clone()])
            .unwrap_or_default()
    } else if node_name == ANY_MASTER {
        let masters: Vec<&&NodeInfo> = ready.iter().filter(|n| n.master).collect();
        if masters.is_empty() {
            Vec::new()
        } else {
            let pick = (Uuid::new_v4().as_u128() % masters.len() as u128) as usize;
            vec![masters[pick].name.clone()]
        }
    } else {
        ready
            .iter()
            .find(|n| n.name == node_name)
            .map(|n| vec![n.name.clone()])
            .unwrap_or_default()
    };

    if selected.is_empty() {
        None
    } else {
        Some(selected)
    }
}
