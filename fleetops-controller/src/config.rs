//! Controller configuration
//!
//! Every setting can be given as a flag or an environment variable; flags win.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Fleet-execution controller
#[derive(Debug, Clone, Parser)]
#[command(name = "fleetops-controller", version, about)]
pub struct Config {
    /// Address the HTTP API listens on
    #[arg(long, env = "FLEETOPS_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Postgres connection string; objects are kept in memory when unset
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Only reconcile objects in this namespace
    #[arg(long, env = "ACTIVE_NAMESPACE")]
    pub active_namespace: Option<String>,

    /// Verbose logging
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// Concurrent TaskRun reconciles
    #[arg(long, env = "TASKRUN_CONCURRENCY", default_value_t = 10)]
    pub taskrun_concurrency: usize,

    /// Concurrent PipelineRun reconciles
    #[arg(long, env = "PIPELINERUN_CONCURRENCY", default_value_t = 10)]
    pub pipelinerun_concurrency: usize,

    /// Concurrent Task and Pipeline reconciles
    #[arg(long, env = "RESOURCE_CONCURRENCY", default_value_t = 1)]
    pub resource_concurrency: usize,

    /// Finished TaskRuns kept per Task
    #[arg(long, env = "TASKRUN_HISTORY_LIMIT", default_value_t = 10)]
    pub taskrun_history_limit: usize,

    /// Finished PipelineRuns kept per Pipeline; unlimited when unset
    #[arg(long, env = "PIPELINERUN_HISTORY_LIMIT")]
    pub pipelinerun_history_limit: Option<usize>,

    /// Seconds between full resyncs of every watched object
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value_t = 300)]
    pub resync_interval_secs: u64,

    /// Seconds between polls of a child TaskRun or a waited-on run
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 3)]
    pub poll_interval_secs: u64,

    /// Seconds a create-and-wait request waits for a terminal status
    #[arg(long, env = "WAIT_TIMEOUT_SECS", default_value_t = 600)]
    pub wait_timeout_secs: u64,

    /// Image used for node execution pods when a Task sets none
    #[arg(long, env = "DEFAULT_RUNTIME_IMAGE", default_value = "docker.io/library/ubuntu:22.04")]
    pub default_runtime_image: String,

    /// Namespace node execution pods are created in
    #[arg(long, env = "RUNTIME_NAMESPACE", default_value = "fleetops-system")]
    pub runtime_namespace: String,

    #[arg(long, env = "KUBECTL_BIN", default_value = "kubectl")]
    pub kubectl: String,

    #[arg(long, env = "SSH_BIN", default_value = "ssh")]
    pub ssh_bin: String,

    #[arg(long, env = "SCP_BIN", default_value = "scp")]
    pub scp_bin: String,

    /// Six-field crontab (with seconds) for Host and Cluster heartbeats;
    /// empty disables them
    #[arg(long, env = "HEARTBEAT_CRONTAB", default_value = "0 * * * * *")]
    pub heartbeat_crontab: String,

    /// Read declared variables from the controller environment
    #[arg(long, env = "ENV_VARIABLES")]
    pub env_variables: bool,
}

impl Config {
    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid bind_addr '{}': {}", self.bind_addr, e))?;

        if self.taskrun_concurrency == 0
            || self.pipelinerun_concurrency == 0
            || self.resource_concurrency == 0
        {
            anyhow::bail!("concurrency settings must be greater than 0");
        }

        if self.resync_interval_secs == 0 {
            anyhow::bail!("resync_interval_secs must be greater than 0");
        }

        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than 0");
        }

        if self.wait_timeout_secs < self.poll_interval_secs {
            anyhow::bail!("wait_timeout_secs must not be shorter than poll_interval_secs");
        }

        if self.taskrun_history_limit == 0 {
            anyhow::bail!("taskrun_history_limit must be greater than 0");
        }

        if self.default_runtime_image.is_empty() {
            anyhow::bail!("default_runtime_image cannot be empty");
        }

        if !self.heartbeat_crontab.trim().is_empty() {
            crate::reconcile::schedule::parse_crontab(&self.heartbeat_crontab)
                .map_err(|e| anyhow::anyhow!("invalid heartbeat_crontab: {}", e))?;
        }

        Ok(())
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Default `RUST_LOG` filter when the variable is unset
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "fleetops_controller=debug,tower_http=debug"
        } else {
            "fleetops_controller=info,tower_http=info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::parse_from(["fleetops-controller"]);
        assert_eq!(config.taskrun_history_limit, 10);
        assert_eq!(config.pipelinerun_history_limit, None);
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.wait_timeout(), Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::parse_from([
            "fleetops-controller",
            "--active-namespace",
            "ops",
            "--taskrun-concurrency",
            "50",
            "--pipelinerun-history-limit",
            "5",
        ]);
        assert_eq!(config.active_namespace.as_deref(), Some("ops"));
        assert_eq!(config.taskrun_concurrency, 50);
        assert_eq!(config.pipelinerun_history_limit, Some(5));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::parse_from(["fleetops-controller"]);

        config.bind_addr = "not-an-addr".to_string();
        assert!(config.validate().is_err());
        config.bind_addr = "127.0.0.1:9000".to_string();
        assert!(config.validate().is_ok());

        config.taskrun_concurrency = 0;
        assert!(config.validate().is_err());
        config.taskrun_concurrency = 1;

        config.poll_interval_secs = 0;
        assert!(config.validate().is_err());
        config.poll_interval_secs = 3;

        config.heartbeat_crontab = "every minute".to_string();
        assert!(config.validate().is_err());
        config.heartbeat_crontab = String::new();
        assert!(config.validate().is_ok());
    }
}
