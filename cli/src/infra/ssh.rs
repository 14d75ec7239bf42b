//! OpenSSH-backed implementation of the `RemoteExecutor` port.
//!
//! A session is a verified set of connection parameters plus a private
//! `known_hosts` file. Each `exec` is its own `ssh` invocation; closing the
//! session drops the host keys learned during it. Host keys are pinned on
//! first use within a session (`StrictHostKeyChecking=accept-new`) because
//! cloud addresses are recycled between machines.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::application::ports::{CommandOutput, CommandRunner, RemoteExecutor, RemoteSession};
use crate::domain::SshCredentials;
use crate::domain::recipe::shell_quote;

/// Exit status `ssh` uses for its own failures.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Slack for the local `ssh` process beyond its own `ConnectTimeout`, so the
/// client reports its failure before the runner kills it.
const SSH_PROCESS_GRACE: Duration = Duration::from_secs(5);

/// Opens sessions by running the system `ssh` binary.
#[derive(Debug, Clone)]
pub struct SshExecutor<R> {
    runner: R,
    command_timeout: Duration,
}

impl<R> SshExecutor<R> {
    pub fn new(runner: R, command_timeout: Duration) -> Self {
        Self {
            runner,
            command_timeout,
        }
    }
}

/// Everything needed to address one host.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SshTarget {
    user: String,
    ip: String,
    identity: PathBuf,
    known_hosts: PathBuf,
    connect_timeout_secs: u64,
}

/// Build the `ssh` argument vector for `target` running `remote` (if any).
fn ssh_args(target: &SshTarget, remote: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        target.identity.display().to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "IdentitiesOnly=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-o".to_string(),
        format!("UserKnownHostsFile={}", target.known_hosts.display()),
        "-o".to_string(),
        format!("ConnectTimeout={}", target.connect_timeout_secs.max(1)),
        "-o".to_string(),
        "ServerAliveInterval=15".to_string(),
        "-o".to_string(),
        "ServerAliveCountMax=4".to_string(),
        "-o".to_string(),
        "LogLevel=ERROR".to_string(),
        format!("{}@{}", target.user, target.ip),
    ];
    if let Some(remote) = remote {
        args.push(format!("bash -lc {}", shell_quote(remote)));
    }
    args
}

fn to_command_output(output: &std::process::Output) -> CommandOutput {
    CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

impl<R: CommandRunner + Clone> RemoteExecutor for SshExecutor<R> {
    type Session = SshSession<R>;

    async fn connect(
        &self,
        ip: &str,
        credentials: &SshCredentials,
        timeout: Duration,
    ) -> Result<SshSession<R>> {
        let dir = tempfile::Builder::new()
            .prefix("devmachine-ssh-")
            .tempdir()
            .context("creating session directory")?;
        let target = SshTarget {
            user: credentials.user.clone(),
            ip: ip.to_string(),
            identity: credentials.private_key_path.clone(),
            known_hosts: dir.path().join("known_hosts"),
            connect_timeout_secs: timeout.as_secs(),
        };

        let args = ssh_args(&target, Some("true"));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self
            .runner
            .run("ssh", &arg_refs, timeout + SSH_PROCESS_GRACE)
            .await
            .with_context(|| format!("connecting to {ip}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "ssh {}@{ip} failed: {}",
                target.user,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(SshSession {
            runner: self.runner.clone(),
            target,
            command_timeout: self.command_timeout,
            dir,
        })
    }
}

/// An established session to one host.
pub struct SshSession<R> {
    runner: R,
    target: SshTarget,
    command_timeout: Duration,
    dir: TempDir,
}

impl<R> SshSession<R> {
    #[must_use]
    pub fn known_hosts(&self) -> &Path {
        &self.target.known_hosts
    }
}

impl<R: CommandRunner> RemoteSession for SshSession<R> {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        let args = ssh_args(&self.target, Some(command));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self
            .runner
            .run("ssh", &arg_refs, self.command_timeout)
            .await
            .with_context(|| format!("running command on {}", self.target.ip))?;
        let result = to_command_output(&output);
        if result.exit_code == SSH_TRANSPORT_FAILURE {
            anyhow::bail!(
                "ssh transport failure on {}: {}",
                self.target.ip,
                result.stderr.trim()
            );
        }
        Ok(result)
    }

    async fn close(self) {
        let path = self.dir.path().display().to_string();
        if let Err(e) = self.dir.close() {
            tracing::debug!(path, error = %e, "removing ssh session directory");
        }
        tracing::debug!(ip = %self.target.ip, "remote shell session closed");
    }
}
