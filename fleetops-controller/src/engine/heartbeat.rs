//! Target heartbeats
//!
//! A heartbeat probes one Host or Cluster and records the outcome in its
//! status. Hosts report machine facts gathered over ssh; clusters report
//! their node counts from the api server.

use chrono::Utc;
use fleetops_core::domain::target::{Cluster, Host, HostStatus};
use fleetops_core::domain::{Kind, NamespacedName, RunStatus};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::executor::{ClusterRef, Executor, NodeInventory};
use crate::store::{ObjectStore, Objects, StoreError};

use super::EngineSettings;
use super::status::commit_status;
use super::targets::host_target;

/// Prints one `key=value` fact per line
const HOST_FACTS: &str = r#"echo "hostname=$(hostname)"
echo "kernel=$(uname -r)"
echo "arch=$(uname -m)"
echo "distribution=$(. /etc/os-release 2>/dev/null && echo "$PRETTY_NAME")"
echo "cpus=$(nproc)"
echo "load1=$(cut -d' ' -f1 /proc/loadavg)"
awk '/^MemTotal:/ {t=$2} /^MemAvailable:/ {a=$2} END {print "mem_total_kb=" t; print "mem_available_kb=" a}' /proc/meminfo
df -kP / | awk 'NR==2 {print "disk_total_kb=" $2; print "disk_used_kb=" $3}'"#;

pub struct Heartbeat {
    hosts: Objects<Host>,
    clusters: Objects<Cluster>,
    executor: Arc<dyn Executor>,
    inventory: Arc<dyn NodeInventory>,
    settings: EngineSettings,
}

impl Heartbeat {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        executor: Arc<dyn Executor>,
        inventory: Arc<dyn NodeInventory>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            hosts: Objects::new(store.clone()),
            clusters: Objects::new(store),
            executor,
            inventory,
            settings,
        }
    }

    /// Probes the Host or Cluster at `key` and commits the result
    ///
    /// An object deleted before or during the probe is not an error.
    pub async fn beat(&self, kind: Kind, key: &NamespacedName) -> Result<(), StoreError> {
        let result = match kind {
            Kind::Host => self.beat_host(key).await,
            Kind::Cluster => self.beat_cluster(key).await,
            other => {
                debug!("No heartbeat for {} {}", other, key);
                return Ok(());
            }
        };

        match result {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn beat_host(&self, key: &NamespacedName) -> Result<(), StoreError> {
        let Some(mut host) = self.hosts.get_opt(key).await? else {
            return Ok(());
        };

        let target = host_target(host.clone());
        match self.executor.run_command(&target, HOST_FACTS, false).await {
            Ok(output) => {
                host.status = parse_host_facts(&output);
                host.status.heart_status = RunStatus::Successed;
            }
            Err(e) => {
                warn!("Heartbeat of Host {} failed: {}", key, e);
                host.status.heart_status = RunStatus::Failed;
            }
        }
        host.status.heart_time = Some(Utc::now());

        commit_status(&self.hosts, &host, &self.settings).await
    }

    async fn beat_cluster(&self, key: &NamespacedName) -> Result<(), StoreError> {
        let Some(mut cluster) = self.clusters.get_opt(key).await? else {
            return Ok(());
        };

        let target = ClusterRef {
            name: cluster.metadata.name.clone(),
            spec: cluster.spec.clone(),
        };
        match self.inventory.list_nodes(&target).await {
            Ok(nodes) => {
                cluster.status.nodes = nodes.len() as u32;
                cluster.status.ready_nodes = nodes.iter().filter(|n| n.ready).count() as u32;
                cluster.status.heart_status = RunStatus::Successed;
            }
            Err(e) => {
                warn!("Heartbeat of Cluster {} failed: {}", key, e);
                cluster.status.heart_status = RunStatus::Failed;
            }
        }
        cluster.status.heart_time = Some(Utc::now());

        commit_status(&self.clusters, &cluster, &self.settings).await
    }
}

/// Reads the output of the facts script
///
/// Missing or malformed facts are left at zero.
fn parse_host_facts(output: &str) -> HostStatus {
    let mut status = HostStatus::default();
    let (mut mem_available, mut disk_used) = (0u64, 0u64);

    for (key, value) in output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
    {
        match key {
            "hostname" => status.hostname = value.to_string(),
            "kernel" => status.kernel_version = value.to_string(),
            "arch" => status.arch = value.to_string(),
            "distribution" => status.distribution = value.trim_matches('"').to_string(),
            "cpus" => status.cpu_total = value.parse().unwrap_or_default(),
            "load1" => status.cpu_load1 = value.parse().unwrap_or_default(),
            "mem_total_kb" => status.mem_total = kib(value),
            "mem_available_kb" => mem_available = kib(value),
            "disk_total_kb" => status.disk_total = kib(value),
            "disk_used_kb" => disk_used = kib(value),
            _ => {}
        }
    }

    let mem_used = status.mem_total.saturating_sub(mem_available);
    status.mem_usage_percent = percent(mem_used, status.mem_total);
    status.disk_usage_percent = percent(disk_used, status.disk_total);
    status
}

fn kib(value: &str) -> u64 {
    value.parse::<u64>().unwrap_or_default() * 1024
}

/// `part / total` as a percentage with two decimals
fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 * 10_000.0 / total as f64).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeExecutor, FakeInventory, HOST, Harness, NAMESPACE, cluster, node};
    use fleetops_core::domain::Resource;

    const FACTS: &str = "hostname=web-1\n\
        kernel=6.1.0-18-amd64\n\
        arch=x86_64\n\
        distribution=Debian GNU/Linux 12 (bookworm)\n\
        cpus=4\n\
        load1=0.42\n\
        mem_total_kb=8000000\n\
        mem_available_kb=2000000\n\
        disk_total_kb=100000000\n\
        disk_used_kb=25000000\n";

    fn heartbeat(h: &Harness, inventory: FakeInventory) -> Heartbeat {
        Heartbeat::new(
            h.store.clone(),
            h.executor.clone(),
            Arc::new(inventory),
            crate::testing::settings(),
        )
    }

    fn host_key() -> NamespacedName {
        NamespacedName::new(NAMESPACE, HOST)
    }

    #[test]
    fn test_parse_host_facts() {
        let status = parse_host_facts(FACTS);
        assert_eq!(status.hostname, "web-1");
        assert_eq!(status.kernel_version, "6.1.0-18-amd64");
        assert_eq!(status.distribution, "Debian GNU/Linux 12 (bookworm)");
        assert_eq!(status.cpu_total, 4);
        assert_eq!(status.cpu_load1, 0.42);
        assert_eq!(status.mem_total, 8_000_000 * 1024);
        assert_eq!(status.mem_usage_percent, 75.0);
        assert_eq!(status.disk_usage_percent, 25.0);
    }

    #[test]
    fn test_parse_host_facts_tolerates_garbage() {
        let status = parse_host_facts("cpus=many\nnot a fact\nmem_total_kb=\n");
        assert_eq!(status.cpu_total, 0);
        assert_eq!(status.mem_total, 0);
        assert_eq!(status.mem_usage_percent, 0.0);
    }

    #[tokio::test]
    async fn test_host_heartbeat_records_facts() {
        let h = Harness::new(FakeExecutor::new().reply("/proc/meminfo", FACTS)).await;
        let beat = heartbeat(&h, FakeInventory::default());

        beat.beat(Kind::Host, &host_key()).await.unwrap();

        let host = Objects::<Host>::new(h.store.clone())
            .get(&host_key())
            .await
            .unwrap();
        assert_eq!(host.status.heart_status, RunStatus::Successed);
        assert!(host.status.heart_time.is_some());
        assert_eq!(host.status.arch, "x86_64");
        assert_eq!(host.spec.address, "10.0.0.10");

        let calls = h.executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].target, HOST);
    }

    #[tokio::test]
    async fn test_unreachable_host_keeps_last_facts() {
        let h = Harness::new(FakeExecutor::new().reply("/proc/meminfo", FACTS)).await;
        heartbeat(&h, FakeInventory::default())
            .beat(Kind::Host, &host_key())
            .await
            .unwrap();

        let down = Harness {
            executor: Arc::new(FakeExecutor::new().fail("/proc/meminfo", "no route to host")),
            ..h
        };
        heartbeat(&down, FakeInventory::default())
            .beat(Kind::Host, &host_key())
            .await
            .unwrap();

        let host = Objects::<Host>::new(down.store.clone())
            .get(&host_key())
            .await
            .unwrap();
        assert_eq!(host.status.heart_status, RunStatus::Failed);
        assert_eq!(host.status.hostname, "web-1");
        assert_eq!(host.status.cpu_total, 4);
    }

    #[tokio::test]
    async fn test_cluster_heartbeat_counts_ready_nodes() {
        let h = Harness::new(FakeExecutor::new()).await;
        let clusters = Objects::<Cluster>::new(h.store.clone());
        let prod = clusters.create(&cluster(NAMESPACE, "prod")).await.unwrap();

        let inventory = FakeInventory::with_nodes(vec![
            node("master-1", true, true),
            node("worker-1", false, true),
            node("worker-2", false, false),
        ]);
        heartbeat(&h, inventory)
            .beat(Kind::Cluster, &prod.key())
            .await
            .unwrap();

        let prod = clusters.get(&prod.key()).await.unwrap();
        assert_eq!(prod.status.heart_status, RunStatus::Successed);
        assert_eq!(prod.status.nodes, 3);
        assert_eq!(prod.status.ready_nodes, 2);
    }

    #[tokio::test]
    async fn test_unreachable_cluster_fails_heartbeat() {
        let h = Harness::new(FakeExecutor::new()).await;
        let clusters = Objects::<Cluster>::new(h.store.clone());
        let prod = clusters.create(&cluster(NAMESPACE, "prod")).await.unwrap();

        heartbeat(&h, FakeInventory::unreachable())
            .beat(Kind::Cluster, &prod.key())
            .await
            .unwrap();

        let prod = clusters.get(&prod.key()).await.unwrap();
        assert_eq!(prod.status.heart_status, RunStatus::Failed);
        assert!(prod.status.heart_time.is_some());
    }

    #[tokio::test]
    async fn test_deleted_target_is_not_an_error() {
        let h = Harness::new(FakeExecutor::new()).await;
        let beat = heartbeat(&h, FakeInventory::default());

        let gone = NamespacedName::new(NAMESPACE, "gone");
        beat.beat(Kind::Host, &gone).await.unwrap();
        beat.beat(Kind::Cluster, &gone).await.unwrap();
        assert_eq!(h.executor.call_count(), 0);
    }
}
