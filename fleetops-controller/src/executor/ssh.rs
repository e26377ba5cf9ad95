//! Remote hosts over ssh and scp
//!
//! Password authentication goes through `sshpass -e` so the secret never
//! appears in the process list. Exit status 255 from ssh means the session
//! itself failed and is reported as a connection error.

use fleetops_core::domain::target::HostSpec;
use fleetops_core::domain::task::Direction;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ExecError;
use super::process::{self, Finished, shell_quote};

const SSH_CONNECTION_FAILURE: i32 = 255;

pub struct SshExecutor {
    ssh_bin: String,
    scp_bin: String,
}

impl SshExecutor {
    pub fn new(ssh_bin: impl Into<String>, scp_bin: impl Into<String>) -> Self {
        Self {
            ssh_bin: ssh_bin.into(),
            scp_bin: scp_bin.into(),
        }
    }

    /// Runs `content` on the host and returns stdout
    ///
    /// # Arguments
    /// * `name` - Host object name, used in error messages
    /// * `host` - Connection details
    /// * `content` - Shell script to run
    /// * `sudo` - Wrap the script in `sudo -n sh -c`
    pub async fn run_command(
        &self,
        name: &str,
        host: &HostSpec,
        content: &str,
        sudo: bool,
    ) -> Result<String, ExecError> {
        debug!("Running command on host {} ({})", name, host.address);

        let mut cmd = self.base_command(&self.ssh_bin, host);
        cmd.arg("-p")
            .arg(host.port.to_string())
            .arg(destination(host))
            .arg(wrap_sudo(content, sudo));

        let finished = process::run(cmd, None).await?;
        if finished.success() {
            return Ok(finished.stdout_lossy());
        }
        Err(classify(name, finished))
    }

    pub async fn transfer_file(
        &self,
        name: &str,
        host: &HostSpec,
        direction: Direction,
        local_path: &str,
        remote_path: &str,
        sudo: bool,
    ) -> Result<(), ExecError> {
        info!(
            "Transferring {} {} {} on host {}",
            local_path,
            match direction {
                Direction::Upload => "->",
                Direction::Download => "<-",
            },
            remote_path,
            name
        );

        if !sudo {
            return match direction {
                Direction::Upload => self.copy(name, host, local_path, &remote(host, remote_path)).await,
                Direction::Download => self.copy(name, host, &remote(host, remote_path), local_path).await,
            };
        }

        // Privileged paths are staged through a temporary file the login user owns
        let staging = format!("/tmp/.fleetops-{}", Uuid::new_v4().simple());
        let result = match direction {
            Direction::Upload => {
                self.copy(name, host, local_path, &remote(host, &staging)).await?;
                self.run_command(
                    name,
                    host,
                    &format!("mv {} {}", shell_quote(&staging), shell_quote(remote_path)),
                    true,
                )
                .await
                .map(|_| ())
            }
            Direction::Download => {
                self.run_command(
                    name,
                    host,
                    &format!(
                        "cp {src} {dst} && chmod 644 {dst}",
                        src = shell_quote(remote_path),
                        dst = shell_quote(&staging)
                    ),
                    true,
                )
                .await?;
                self.copy(name, host, &remote(host, &staging), local_path).await
            }
        };

        if direction == Direction::Download {
            let cleanup = format!("rm -f {}", shell_quote(&staging));
            if let Err(e) = self.run_command(name, host, &cleanup, true).await {
                warn!("Failed to remove staging file on {}: {}", name, e);
            }
        }

        result
    }

    async fn copy(&self, name: &str, host: &HostSpec, from: &str, to: &str) -> Result<(), ExecError> {
        let mut cmd = self.base_command(&self.scp_bin, host);
        cmd.arg("-P").arg(host.port.to_string()).arg(from).arg(to);

        let finished = process::run(cmd, None).await?;
        if finished.success() {
            return Ok(());
        }
        Err(classify(name, finished))
    }

    fn base_command(&self, program: &str, host: &HostSpec) -> Command {
        let mut cmd = if host.password.is_empty() {
            Command::new(program)
        } else {
            let mut cmd = Command::new("sshpass");
            cmd.arg("-e").arg(program).env("SSHPASS", &host.password);
            cmd
        };

        cmd.arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("LogLevel=ERROR")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", host.timeout_seconds.max(1)));

        if host.password.is_empty() {
            cmd.arg("-o").arg("BatchMode=yes");
        }
        if !host.private_key_path.is_empty() {
            cmd.arg("-i").arg(&host.private_key_path);
        }

        cmd
    }
}

fn destination(host: &HostSpec) -> String {
    if host.username.is_empty() {
        host.address.clone()
    } else {
        format!("{}@{}", host.username, host.address)
    }
}

fn remote(host: &HostSpec, path: &str) -> String {
    format!("{}:{}", destination(host), path)
}

fn wrap_sudo(content: &str, sudo: bool) -> String {
    if sudo {
        format!("sudo -n sh -c {}", shell_quote(content))
    } else {
        content.to_string()
    }
}

fn classify(name: &str, finished: Finished) -> ExecError {
    let unreachable = finished.code == Some(SSH_CONNECTION_FAILURE)
        || ["Connection refused", "Connection timed out", "Could not resolve hostname", "No route to host"]
            .iter()
            .any(|needle| finished.stderr.contains(needle));

    if unreachable {
        ExecError::Connection {
            target: name.to_string(),
            message: finished.stderr.trim().to_string(),
        }
    } else {
        finished.into_command_error()
    }
}
