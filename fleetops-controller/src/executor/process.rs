//! Child process helpers shared by the executor backends

use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::ExecError;

/// Captured result of a finished process
pub struct Finished {
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl Finished {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stdout followed by stderr, as shown for a failed step
    pub fn combined(&self) -> String {
        let mut out = self.stdout_lossy();
        out.push_str(&self.stderr);
        out
    }

    pub fn into_command_error(self) -> ExecError {
        ExecError::Command {
            code: self.code,
            output: self.combined(),
        }
    }
}

/// Runs `cmd` to completion, optionally feeding `stdin`
pub async fn run(mut cmd: Command, stdin: Option<Vec<u8>>) -> Result<Finished, ExecError> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    // Feed stdin concurrently so a chatty child cannot fill its stdout pipe first
    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => Some(tokio::spawn(async move {
            pipe.write_all(&input).await?;
            pipe.shutdown().await
        })),
        _ => None,
    };

    let output = child.wait_with_output().await?;
    if let Some(writer) = writer {
        writer.await.map_err(std::io::Error::other)??;
    }
    let finished = Finished {
        code: output.status.code(),
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    debug!(code = ?finished.code, "process exited");
    if !finished.stdout.is_empty() {
        debug!("stdout: {}", String::from_utf8_lossy(&finished.stdout).trim_end());
    }
    if !finished.stderr.is_empty() {
        debug!("stderr: {}", finished.stderr.trim_end());
    }

    Ok(finished)
}

/// Quotes `s` for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
