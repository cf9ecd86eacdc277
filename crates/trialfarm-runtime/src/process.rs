//! Shell transport implementation
//!
//! Commands for remote hosts go through the SSH client; hosts listed in
//! `local_hosts` run them through the local shell. Standard error of the
//! command is merged into standard output so the caller sees one combined
//! stream.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};
use trialfarm_core::{FarmError, FarmResult, TransportConfig};

use crate::traits::Transport;

/// Transport that shells out to `ssh` (or the local shell) for every call
pub struct ShellTransport {
    host: String,
    status_command: String,
    config: TransportConfig,
}

impl ShellTransport {
    /// Create a new shell transport for one host
    pub fn new(host: impl Into<String>, status_command: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            host: host.into(),
            status_command: status_command.into(),
            config,
        }
    }

    /// Build the process invocation for a command
    fn build_command(&self, command: &str) -> Command {
        let merged = format!("exec 2>&1; {}", command);

        let mut cmd = if self.config.is_local(&self.host) {
            let mut cmd = Command::new(&self.config.shell);
            cmd.arg("-c").arg(merged);
            cmd
        } else {
            let mut cmd = Command::new(&self.config.ssh_program);
            cmd.args(&self.config.ssh_args);
            cmd.arg(&self.host);
            cmd.arg(merged);
            cmd
        };

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        cmd
    }

    async fn run(&self, command: &str, stdin: &str) -> FarmResult<String> {
        let mut child = self.build_command(command).spawn().map_err(|e| {
            error!(host = %self.host, error = %e, "Failed to spawn command");
            FarmError::Transport(format!("Failed to spawn command on {}: {}", self.host, e))
        })?;

        // Input is written while output is drained, so neither pipe can fill up
        // and stall the other. Dropping the handle closes the command's stdin.
        let input = child.stdin.take();
        let feed = async {
            if let Some(mut input) = input {
                // The command may exit without reading its input.
                if let Err(e) = input.write_all(stdin.as_bytes()).await {
                    debug!(host = %self.host, error = %e, "Command did not consume stdin");
                }
            }
        };

        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| {
            FarmError::Transport(format!("Failed to collect output from {}: {}", self.host, e))
        })?;

        debug!(
            host = %self.host,
            status = %output.status,
            stdout_bytes = output.stdout.len(),
            "Command finished"
        );

        // Anything on our own stderr comes from the SSH client, ahead of the
        // command's output.
        let mut combined = String::from_utf8_lossy(&output.stderr).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stdout));
        Ok(combined)
    }
}

#[async_trait]
impl Transport for ShellTransport {
    async fn status_report(&self) -> FarmResult<String> {
        self.run(&self.status_command, "").await
    }

    async fn execute(&self, command: &str, stdin: &str) -> FarmResult<String> {
        self.run(command, stdin).await
    }

    fn name(&self) -> &'static str {
        if self.config.is_local(&self.host) {
            "local"
        } else {
            "ssh"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(status_command: &str) -> ShellTransport {
        ShellTransport::new("localhost", status_command, TransportConfig::default())
    }

    #[test]
    fn test_build_remote_command() {
        let transport = ShellTransport::new("gpu-07", "nvidia-smi", TransportConfig::default());
        let cmd = transport.build_command("nvidia-smi");
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "ssh");
        let args: Vec<_> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["-o", "BatchMode=yes", "gpu-07", "exec 2>&1; nvidia-smi"]);
        assert_eq!(transport.name(), "ssh");
    }

    #[test]
    fn test_build_local_command() {
        let transport = local("nvidia-smi");
        let cmd = transport.build_command("echo hi");
        assert_eq!(cmd.as_std().get_program(), "sh");
        assert_eq!(transport.name(), "local");
    }

    #[tokio::test]
    async fn test_execute_feeds_stdin() {
        let transport = local("true");
        let output = transport.execute("cat", "/exp/net-7").await.unwrap();
        assert_eq!(output, "/exp/net-7");
    }

    #[tokio::test]
    async fn test_execute_large_input_while_writing_output() {
        let transport = local("true");
        let payload = "x".repeat(1 << 20);
        let command = "head -c 1048576 /dev/zero | tr '\\0' y; echo; wc -c";

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            transport.execute(command, &payload),
        )
        .await
        .expect("command stalled on its pipes")
        .unwrap();

        assert!(output.starts_with("yyyy"));
        assert_eq!(output.lines().last().map(str::trim), Some("1048576"));
    }

    #[tokio::test]
    async fn test_execute_merges_stderr() {
        let transport = local("true");
        let output = transport
            .execute("echo first; echo second 1>&2; echo third", "")
            .await
            .unwrap();
        assert_eq!(output, "first\nsecond\nthird\n");
    }

    #[tokio::test]
    async fn test_status_report_runs_status_command() {
        let transport = local("echo '| 30%   45C    P2    70W / 250W |   10MiB / 100MiB |   5%   Default |'");
        let report = transport.status_report().await.unwrap();
        assert!(report.contains("10MiB / 100MiB"));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let config = TransportConfig {
            shell: "/nonexistent/shell".to_string(),
            ..TransportConfig::default()
        };
        let transport = ShellTransport::new("localhost", "true", config);
        let result = transport.execute("true", "").await;
        assert!(matches!(result, Err(FarmError::Transport(_))));
    }
}
